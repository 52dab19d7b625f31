use std::path::PathBuf;

/// File name of the settings file looked up in every search location.
pub const SETTINGS_FILE_NAME: &str = "vkguard.toml";

/// Returns the per-user settings path for this platform, if a config
/// directory can be determined.
pub fn user_settings_path() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var_os("APPDATA")
            .map(|dir| PathBuf::from(dir).join("vkguard").join(SETTINGS_FILE_NAME))
    }
    #[cfg(not(windows))]
    {
        let base = match std::env::var_os("XDG_CONFIG_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(std::env::var_os("HOME")?).join(".config"),
        };
        Some(base.join("vkguard").join(SETTINGS_FILE_NAME))
    }
}

/// Returns the platform name string.
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "windows")]
    { "windows" }
    #[cfg(target_os = "linux")]
    { "linux" }
    #[cfg(target_os = "macos")]
    { "macos" }
    #[cfg(target_os = "android")]
    { "android" }
    #[cfg(not(any(
        target_os = "windows",
        target_os = "linux",
        target_os = "macos",
        target_os = "android"
    )))]
    { "unknown" }
}

/// File name of the layer shared library for this platform.
pub fn layer_library_name() -> &'static str {
    #[cfg(windows)]
    { "vkguard_layer.dll" }
    #[cfg(target_os = "macos")]
    { "libvkguard_layer.dylib" }
    #[cfg(not(any(windows, target_os = "macos")))]
    { "libvkguard_layer.so" }
}
