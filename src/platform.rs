//! Cross-platform path resolution.

use std::path::PathBuf;

const APP_DIR: &str = "zerotrust-scan";

/// Directory for the on-disk response cache.
///
/// - Linux: `~/.cache/zerotrust-scan/`
/// - macOS: `~/Library/Caches/zerotrust-scan/`
/// - Windows: `%LOCALAPPDATA%\zerotrust-scan\`
///
/// Falls back to `./.zerotrust-scan-cache` when the platform has no cache directory.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".zerotrust-scan-cache"))
}

/// Directory holding `config.toml`.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}
