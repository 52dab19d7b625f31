mod manifest;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use vkguard_core::config::LayerSettings;
use vkguard_gpuav::spirv::{bytes_from_words, words_from_bytes};
use vkguard_gpuav::{instrument, InstrumentOptions};

#[derive(Parser)]
#[command(name = "vkguard")]
#[command(about = "vkguard - Vulkan validation layer tooling")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add descriptor-index bounds checks to a SPIR-V module
    Instrument {
        /// Input SPIR-V binary
        input: PathBuf,

        /// Output path for the instrumented binary
        #[arg(short, long)]
        output: PathBuf,

        /// Id stamped into out-of-bounds reports
        #[arg(long, default_value_t = 0)]
        shader_id: u16,

        /// Descriptor set index of the debug output buffer
        #[arg(long, default_value_t = 7)]
        desc_set: u32,

        /// Leave out-of-bounds indices unclamped
        #[arg(long)]
        unsafe_mode: bool,
    },

    /// Print the resolved layer settings as TOML
    Settings {
        /// Settings file to load instead of the default search path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the loader manifest JSON for the layer library
    Manifest {
        /// Path the loader should load the layer from
        #[arg(short, long)]
        library: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    vkguard_common::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Instrument {
            input,
            output,
            shader_id,
            desc_set,
            unsafe_mode,
        } => {
            let bytes = std::fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let words = words_from_bytes(&bytes)?;
            let opts = InstrumentOptions {
                desc_set,
                binding: 0,
                shader_id,
                safe_mode: !unsafe_mode,
            };
            let instrumented = instrument(&words, &opts)?;
            std::fs::write(&output, bytes_from_words(&instrumented.words))
                .with_context(|| format!("writing {}", output.display()))?;
            info!(
                sites = instrumented.sites,
                words = instrumented.words.len(),
                "instrumented {}",
                input.display()
            );
            println!("{} check(s) written to {}", instrumented.sites, output.display());
        }

        Commands::Settings { config } => {
            let settings = match config {
                Some(path) => LayerSettings::load(&path)?,
                None => LayerSettings::from_environment(),
            };
            print!("{}", settings.to_toml()?);
        }

        Commands::Manifest { library } => {
            let library =
                library.unwrap_or_else(|| PathBuf::from(".").join(vkguard_common::platform::layer_library_name()));
            let manifest = manifest::layer_manifest(&library);
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
    }

    Ok(())
}
