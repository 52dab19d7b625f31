#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("settings file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("settings could not be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("unknown validation flag: {0}")]
    UnknownFlag(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
