//! On-disk TTL cache for HTTP source responses.
//!
//! Registry documents and OSV responses are stored as JSON files so that
//! repeated scans (`--offline-cache`) can skip the network. The engine itself
//! never reads this cache; it keeps its own per-scan in-memory cache.
//!
//! # Cache Location
//!
//! - Linux: `~/.cache/zerotrust-scan/`
//! - macOS: `~/Library/Caches/zerotrust-scan/`
//! - Windows: `%LOCALAPPDATA%\zerotrust-scan\`
//!
//! # Example
//!
//! ```no_run
//! use zerotrust_scan::Cache;
//!
//! let cache = Cache::with_ttl_hours(24);
//! cache.set("npm_lodash", &"cached document".to_string()).unwrap();
//!
//! let value: Option<String> = cache.get("npm_lodash");
//! assert_eq!(value, Some("cached document".to_string()));
//! ```

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::platform::cache_dir;

/// Default cache TTL in hours.
const CACHE_TTL_HOURS: u64 = 24;

/// A file-based cache with TTL support. Entries expire `ttl` after they were written.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
    ttl: Duration,
}

impl Cache {
    pub fn new() -> Self {
        Self::with_ttl_hours(CACHE_TTL_HOURS)
    }

    pub fn with_ttl_hours(hours: u64) -> Self {
        Self::in_dir(cache_dir(), Duration::from_secs(hours * 3600))
    }

    /// A cache rooted somewhere other than the platform cache directory.
    pub fn in_dir(dir: PathBuf, ttl: Duration) -> Self {
        Self { dir, ttl }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    /// Converts a cache key to a safe filename. `@` and `/` from scoped
    /// package names become `_`.
    fn cache_path(&self, key: &str) -> PathBuf {
        let safe_key: String = key
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe_key))
    }

    /// Returns `None` if the key doesn't exist, has expired, or no longer
    /// deserializes into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.cache_path(key);

        if !path.exists() {
            return None;
        }

        if let Ok(metadata) = fs::metadata(&path) {
            if let Ok(modified) = metadata.modified() {
                if let Ok(elapsed) = SystemTime::now().duration_since(modified) {
                    if elapsed > self.ttl {
                        let _ = fs::remove_file(&path);
                        return None;
                    }
                }
            }
        }

        let content = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.cache_path(key);
        let content = serde_json::to_string(value)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Removes every cached entry. Returns how many files were deleted.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)?.flatten() {
                let path = entry.path();
                if path.extension().map(|e| e == "json").unwrap_or(false)
                    && fs::remove_file(&path).is_ok()
                {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::in_dir(dir.path().join("cache"), Duration::from_secs(3600));

        assert_eq!(cache.get::<String>("npm_@types/node"), None);
        cache.set("npm_@types/node", &"doc".to_string()).unwrap();
        assert_eq!(cache.get::<String>("npm_@types/node"), Some("doc".to_string()));

        assert_eq!(cache.clear().unwrap(), 1);
        assert_eq!(cache.get::<String>("npm_@types/node"), None);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::in_dir(dir.path().to_path_buf(), Duration::ZERO);
        cache.set("k", &1u32).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get::<u32>("k"), None);
    }

    #[test]
    fn test_wrong_type_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::in_dir(dir.path().to_path_buf(), Duration::from_secs(60));
        cache.set("k", &"text").unwrap();
        assert_eq!(cache.get::<u32>("k"), None);
    }
}
