use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CoreError;

/// Top-level layer configuration, loaded from vkguard.toml and the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSettings {
    /// Textual enable flags, see [`EnableFlag`]
    #[serde(default)]
    pub enables: Vec<String>,
    /// Textual disable flags, see [`DisableFlag`]
    #[serde(default)]
    pub disables: Vec<String>,
    /// Per-call lock mode of the validation units
    #[serde(default)]
    pub locking: LockingMode,
    #[serde(default)]
    pub messages: MessageSettings,
    #[serde(default)]
    pub gpu_assisted: GpuAvSettings,
}

/// How validation units serialize their per-call work.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum LockingMode {
    /// One reader/writer lock per unit
    #[default]
    #[serde(rename = "fine")]
    Fine,
    /// One process-wide lock shared by every unit
    #[serde(rename = "coarse")]
    Coarse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSettings {
    /// Stop reporting a VUID after it fired this many times (0 = unlimited)
    #[serde(default = "default_duplicate_limit")]
    pub duplicate_limit: u32,
    /// VUIDs that are never reported
    #[serde(default)]
    pub mute: Vec<String>,
    #[serde(default = "default_true")]
    pub report_warnings: bool,
    #[serde(default = "default_true")]
    pub report_performance: bool,
    #[serde(default)]
    pub report_info: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuAvSettings {
    /// Descriptor sets per internal descriptor pool
    #[serde(default = "default_chunk_size")]
    pub descriptor_chunk_size: u32,
    /// Upper bound on descriptor set slots the instrumentation may reserve
    #[serde(default = "default_max_binding_slots")]
    pub max_binding_slots: u32,
    /// Clamp out-of-bounds descriptor indices in instrumented shaders
    #[serde(default = "default_true")]
    pub safe_mode: bool,
    /// Hide the debug slot from the application-visible device limits
    #[serde(default = "default_true")]
    pub reserve_binding_slot: bool,
    /// Size in bytes of the per-command-buffer output buffer
    #[serde(default = "default_output_buffer_size")]
    pub output_buffer_size: u64,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            enables: Vec::new(),
            disables: Vec::new(),
            locking: LockingMode::default(),
            messages: MessageSettings::default(),
            gpu_assisted: GpuAvSettings::default(),
        }
    }
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            duplicate_limit: default_duplicate_limit(),
            mute: Vec::new(),
            report_warnings: true,
            report_performance: true,
            report_info: false,
        }
    }
}

impl Default for GpuAvSettings {
    fn default() -> Self {
        Self {
            descriptor_chunk_size: default_chunk_size(),
            max_binding_slots: default_max_binding_slots(),
            safe_mode: true,
            reserve_binding_slot: true,
            output_buffer_size: default_output_buffer_size(),
        }
    }
}

/// Validation units that are off unless enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnableFlag {
    GpuAssisted,
    BestPractices,
    SyncHazard,
    DebugPrintf,
}

/// Validation units that are on unless disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisableFlag {
    ThreadSafety,
    Stateless,
    ObjectLifetime,
    CoreChecks,
    All,
}

impl FromStr for EnableFlag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu_assisted" | "gpuav" | "validation_check_enable_gpu_assisted" => {
                Ok(Self::GpuAssisted)
            }
            "best_practices" | "validation_check_enable_best_practices" => Ok(Self::BestPractices),
            "sync_hazard" | "synchronization" | "validation_check_enable_synchronization" => {
                Ok(Self::SyncHazard)
            }
            "debug_printf" => Ok(Self::DebugPrintf),
            other => Err(CoreError::UnknownFlag(other.to_string())),
        }
    }
}

impl FromStr for DisableFlag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread_safety" | "validation_check_disable_thread_safety" => Ok(Self::ThreadSafety),
            "stateless" | "validation_check_disable_stateless" => Ok(Self::Stateless),
            "object_lifetime" | "validation_check_disable_object_lifetimes" => {
                Ok(Self::ObjectLifetime)
            }
            "core_checks" | "validation_check_disable_core" => Ok(Self::CoreChecks),
            "all" => Ok(Self::All),
            other => Err(CoreError::UnknownFlag(other.to_string())),
        }
    }
}

/// The resolved, immutable set of units a context attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSelection {
    pub thread_safety: bool,
    pub object_lifetime: bool,
    pub stateless: bool,
    pub core_checks: bool,
    pub best_practices: bool,
    pub gpu_assisted: bool,
    pub sync_hazard: bool,
}

impl Default for UnitSelection {
    fn default() -> Self {
        Self {
            thread_safety: true,
            object_lifetime: true,
            stateless: true,
            core_checks: true,
            best_practices: false,
            gpu_assisted: false,
            sync_hazard: false,
        }
    }
}

impl UnitSelection {
    pub fn enable(&mut self, flag: EnableFlag) {
        match flag {
            EnableFlag::GpuAssisted => self.gpu_assisted = true,
            EnableFlag::BestPractices => self.best_practices = true,
            EnableFlag::SyncHazard => self.sync_hazard = true,
            EnableFlag::DebugPrintf => {
                warn!("debug_printf is not supported by this layer and is ignored");
            }
        }
    }

    pub fn disable(&mut self, flag: DisableFlag) {
        match flag {
            DisableFlag::ThreadSafety => self.thread_safety = false,
            DisableFlag::Stateless => self.stateless = false,
            DisableFlag::ObjectLifetime => self.object_lifetime = false,
            DisableFlag::CoreChecks => self.core_checks = false,
            DisableFlag::All => {
                *self = Self {
                    thread_safety: false,
                    object_lifetime: false,
                    stateless: false,
                    core_checks: false,
                    best_practices: false,
                    gpu_assisted: false,
                    sync_hazard: false,
                }
            }
        }
    }
}

impl LayerSettings {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let settings: LayerSettings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(CoreError::Io(_)) => Self::default(),
            Err(e) => {
                warn!("ignoring settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve settings the way the layer does at instance creation: the
    /// first settings file found on the search path, then environment
    /// overrides.
    pub fn from_environment() -> Self {
        let lookup = |key: &str| std::env::var(key).ok();
        let mut settings = match default_settings_path(&lookup) {
            Some(path) => Self::load_or_default(&path),
            None => Self::default(),
        };
        settings.apply_env(lookup);
        settings
    }

    /// Apply `VKGUARD_*` overrides. `lookup` stands in for `std::env::var`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(enables) = lookup("VKGUARD_ENABLES") {
            self.enables.extend(split_list(&enables));
        }
        if let Some(disables) = lookup("VKGUARD_DISABLES") {
            self.disables.extend(split_list(&disables));
        }
        if let Some(mode) = lookup("VKGUARD_LOCKING") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "fine" => self.locking = LockingMode::Fine,
                "coarse" => self.locking = LockingMode::Coarse,
                other => warn!("VKGUARD_LOCKING: unknown mode '{}', keeping {:?}", other, self.locking),
            }
        }
        if let Some(limit) = lookup("VKGUARD_DUPLICATE_LIMIT") {
            match limit.trim().parse() {
                Ok(n) => self.messages.duplicate_limit = n,
                Err(_) => warn!("VKGUARD_DUPLICATE_LIMIT: '{}' is not a number", limit),
            }
        }
        if let Some(mute) = lookup("VKGUARD_MUTE") {
            self.messages.mute.extend(split_list(&mute));
        }
    }

    /// Turn the textual flags plus any extension-provided flags into the
    /// unit selection. Unknown flags are reported as warnings and skipped.
    pub fn resolve_units(
        &self,
        extra_enables: &[EnableFlag],
        extra_disables: &[DisableFlag],
    ) -> UnitSelection {
        let mut selection = UnitSelection::default();

        for text in &self.enables {
            match text.parse::<EnableFlag>() {
                Ok(flag) => selection.enable(flag),
                Err(e) => warn!("{}", e),
            }
        }
        for flag in extra_enables {
            selection.enable(*flag);
        }
        // Disables win over enables regardless of where they came from.
        for text in &self.disables {
            match text.parse::<DisableFlag>() {
                Ok(flag) => selection.disable(flag),
                Err(e) => warn!("{}", e),
            }
        }
        for flag in extra_disables {
            selection.disable(*flag);
        }
        selection
    }

    pub fn to_toml(&self) -> Result<String, CoreError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Returns the settings file to use.
/// Search order:
/// 1. `VKGUARD_CONFIG`
/// 2. Local: `./vkguard.toml`
/// 3. Per-user: `$XDG_CONFIG_HOME/vkguard/vkguard.toml` (or `%APPDATA%\vkguard\vkguard.toml`)
pub fn default_settings_path(lookup: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(path) = lookup("VKGUARD_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(vkguard_common::platform::SETTINGS_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    vkguard_common::platform::user_settings_path().filter(|p| p.exists())
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split([',', ';', ':'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn default_duplicate_limit() -> u32 {
    10
}

fn default_chunk_size() -> u32 {
    512
}

fn default_max_binding_slots() -> u32 {
    33
}

fn default_output_buffer_size() -> u64 {
    1024
}

fn default_true() -> bool {
    true
}
