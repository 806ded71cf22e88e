//! Standard locations for Ripple configuration files

use std::path::PathBuf;

/// Config file name inside the config directory
const CONFIG_FILE_NAME: &str = "engine.yaml";

/// Get the default config directory
///
/// Returns: `{config_dir}/ripple` (e.g. `~/.config/ripple` on Linux), falling
/// back to `./.ripple` when the platform reports no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("ripple"))
        .unwrap_or_else(|| PathBuf::from(".ripple"))
}

/// Get the default engine config path
///
/// Returns: `{config_dir}/ripple/engine.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join(CONFIG_FILE_NAME)
}
