use std::env;
use std::path::PathBuf;

/// Return the user's home directory.
///
/// Uses HOME on Unix-like systems and USERPROFILE on Windows.
pub fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// `~/.config/navbill/config.json`, if a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".config").join("navbill").join("config.json"))
}
