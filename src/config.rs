//! Configuration file handling.
//!
//! Configuration is read from a TOML file. Every field has a default, so a
//! missing file or a partial file is fine.
//!
//! # Configuration Location
//!
//! - Linux: `~/.config/zerotrust-scan/config.toml`
//! - macOS: `~/Library/Application Support/zerotrust-scan/config.toml`
//! - Windows: `%APPDATA%\zerotrust-scan\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! cache_ttl_hours = 24
//! default_format = "table"
//!
//! [engine]
//! max_concurrency = 0          # 0 = host parallelism
//! per_source_rate_limit = 10.0 # requests per second, per source
//! task_timeout_secs = 10
//! scan_timeout_secs = 120
//!
//! [typosquat]
//! short_name_max_len = 8
//! short_name_distance = 2
//! long_name_distance = 3
//! allow = ["@internal/*"]
//!
//! [forensics]
//! rapid_release_grace_hours = 72
//!
//! [scripts]
//! patterns = ["\\bpowershell\\b"]
//!
//! [ignore]
//! advisories = ["GHSA-xxxx-xxxx-xxxx"]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ecosystem name passed to the vulnerability database.
    ///
    /// Default: "npm"
    pub ecosystem: String,

    /// Base URL of the package registry.
    pub registry_url: String,

    /// Base URL of the OSV.dev API.
    pub osv_url: String,

    /// How long to keep registry and vulnerability responses on disk, in hours.
    /// Only used when `use_cache` is on.
    pub cache_ttl_hours: u64,

    /// Whether the HTTP sources may reuse responses cached by earlier runs.
    ///
    /// Default: false (every run queries the live sources)
    pub use_cache: bool,

    /// Default output format: "table", "json" or "sarif".
    pub default_format: String,

    /// Default log filter when `RUST_LOG` is not set.
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    pub engine: EngineConfig,
    pub typosquat: TyposquatConfig,
    pub forensics: ForensicsConfig,
    pub scripts: ScriptConfig,
    pub scoring: ScoringConfig,

    /// Ignore list for accepted risks.
    pub ignore: IgnoreConfig,
}

/// Scheduling limits for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of tasks in flight. `0` means host parallelism.
    pub max_concurrency: usize,

    /// Requests per second allowed against each external source.
    pub per_source_rate_limit: f64,

    /// Deadline for a single fetch or detector evaluation.
    pub task_timeout_secs: u64,

    /// Deadline for the whole scan.
    pub scan_timeout_secs: u64,
}

impl EngineConfig {
    /// Slowest accepted refill rate, one request every ~17 minutes.
    pub const MIN_RATE_LIMIT: f64 = 0.001;

    pub fn effective_concurrency(&self) -> usize {
        if self.max_concurrency > 0 {
            return self.max_concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            per_source_rate_limit: 10.0,
            task_timeout_secs: 10,
            scan_timeout_secs: 120,
        }
    }
}

/// Length-scaled edit distance thresholds for typosquat detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TyposquatConfig {
    /// Names up to this many characters use `short_name_distance`.
    pub short_name_max_len: usize,
    pub short_name_distance: usize,
    pub long_name_distance: usize,

    /// Newline-separated list of popular names replacing the bundled list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popular_packages_file: Option<PathBuf>,

    /// Names never reported as typosquats. Supports `*` wildcards.
    pub allow: Vec<String>,
}

impl TyposquatConfig {
    pub fn threshold_for(&self, name_len: usize) -> usize {
        if name_len <= self.short_name_max_len {
            self.short_name_distance
        } else {
            self.long_name_distance
        }
    }

    pub fn max_distance(&self) -> usize {
        self.short_name_distance.max(self.long_name_distance)
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allow.iter().any(|pattern| glob_match(pattern, name))
    }
}

impl Default for TyposquatConfig {
    fn default() -> Self {
        Self {
            short_name_max_len: 8,
            short_name_distance: 2,
            long_name_distance: 3,
            popular_packages_file: None,
            allow: Vec::new(),
        }
    }
}

/// Thresholds for publication-history anomalies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForensicsConfig {
    /// A release this soon after the previous one is a "rapid release".
    pub rapid_release_grace_hours: u64,

    /// A gap longer than this before a release is a "dormant package revival".
    pub dormant_days: u64,

    /// Weekly downloads at which a package counts as widely depended on.
    pub widely_used_weekly_downloads: u64,

    /// A version published this recently before the scan is "fresh".
    pub fresh_release_hours: u64,

    /// Packages with fewer published versions are "immature".
    pub min_version_count: usize,
}

impl ForensicsConfig {
    /// Upper bound for the hour-valued windows (ten years).
    pub const MAX_HOURS: u64 = 87_600;
    /// Upper bound for `dormant_days` (a hundred years).
    pub const MAX_DORMANT_DAYS: u64 = 36_500;

    pub fn rapid_release_grace(&self) -> chrono::Duration {
        hours(self.rapid_release_grace_hours)
    }

    pub fn dormant_period(&self) -> chrono::Duration {
        i64::try_from(self.dormant_days)
            .ok()
            .and_then(chrono::Duration::try_days)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn fresh_release_window(&self) -> chrono::Duration {
        hours(self.fresh_release_hours)
    }
}

/// Out-of-range values saturate instead of panicking.
fn hours(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .unwrap_or(chrono::Duration::MAX)
}

impl Default for ForensicsConfig {
    fn default() -> Self {
        Self {
            rapid_release_grace_hours: 72,
            dormant_days: 365,
            widely_used_weekly_downloads: 10_000,
            fresh_release_hours: 48,
            min_version_count: 3,
        }
    }
}

/// Lifecycle script audit patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Include the built-in pattern set.
    pub use_default_patterns: bool,

    /// Extra regular expressions, matched case-insensitively.
    pub patterns: Vec<String>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            use_default_patterns: true,
            patterns: Vec::new(),
        }
    }
}

/// Severity weights and classification bands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub info: u32,
    /// Scores at or above this fail.
    pub fail_threshold: u32,
    /// Scores at or above this (and below `fail_threshold`) warn.
    pub warn_threshold: u32,
}

impl ScoringConfig {
    pub const MAX_SCORE: u32 = 100;
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            critical: 100,
            high: 40,
            medium: 15,
            low: 5,
            info: 0,
            fail_threshold: 70,
            warn_threshold: 20,
        }
    }
}

/// Configuration for suppressing accepted risks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Advisory IDs or aliases to ignore (e.g., "CVE-2021-12345", "GHSA-xxxx").
    pub advisories: Vec<String>,
}

impl IgnoreConfig {
    pub fn should_ignore_advisory(&self, id: &str, aliases: &[String]) -> bool {
        self.advisories
            .iter()
            .any(|ignored| ignored == id || aliases.iter().any(|a| a == ignored))
    }
}

/// Simple glob matching (supports * as wildcard).
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return pattern == text;
    }

    let mut remaining = text;

    if !parts[0].is_empty() {
        if !remaining.starts_with(parts[0]) {
            return false;
        }
        remaining = &remaining[parts[0].len()..];
    }

    let last_part = parts[parts.len() - 1];
    if !last_part.is_empty() {
        if !remaining.ends_with(last_part) {
            return false;
        }
        remaining = &remaining[..remaining.len() - last_part.len()];
    }

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        if let Some(pos) = remaining.find(part) {
            remaining = &remaining[pos + part.len()..];
        } else {
            return false;
        }
    }

    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ecosystem: "npm".to_string(),
            registry_url: "https://registry.npmjs.org".to_string(),
            osv_url: "https://api.osv.dev".to_string(),
            cache_ttl_hours: 24,
            use_cache: false,
            default_format: "table".to_string(),
            log_level: "warn".to_string(),
            log_format: "pretty".to_string(),
            engine: EngineConfig::default(),
            typosquat: TyposquatConfig::default(),
            forensics: ForensicsConfig::default(),
            scripts: ScriptConfig::default(),
            scoring: ScoringConfig::default(),
            ignore: IgnoreConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the default config file, or defaults if the
    /// file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Loads configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Saves the configuration to the default config file.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        crate::platform::config_dir().join("config.toml")
    }

    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Checks every option the engine consumes. A scan refuses to start on error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ecosystem.trim().is_empty() {
            return Err(ConfigError::invalid("ecosystem", "must not be empty"));
        }

        let engine = &self.engine;
        if !engine.per_source_rate_limit.is_finite()
            || engine.per_source_rate_limit < EngineConfig::MIN_RATE_LIMIT
        {
            return Err(ConfigError::invalid(
                "engine.per_source_rate_limit",
                format!(
                    "must be at least {} requests per second",
                    EngineConfig::MIN_RATE_LIMIT
                ),
            ));
        }
        if engine.task_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "engine.task_timeout_secs",
                "must be greater than 0",
            ));
        }
        if engine.scan_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "engine.scan_timeout_secs",
                "must be greater than 0",
            ));
        }
        if engine.task_timeout_secs > engine.scan_timeout_secs {
            return Err(ConfigError::invalid(
                "engine.task_timeout_secs",
                "must not exceed engine.scan_timeout_secs",
            ));
        }

        let typo = &self.typosquat;
        if typo.short_name_max_len == 0 {
            return Err(ConfigError::invalid(
                "typosquat.short_name_max_len",
                "must be greater than 0",
            ));
        }
        if typo.short_name_distance > typo.short_name_max_len {
            return Err(ConfigError::invalid(
                "typosquat.short_name_distance",
                "must not exceed typosquat.short_name_max_len",
            ));
        }

        let forensics = &self.forensics;
        if forensics.dormant_days == 0 || forensics.dormant_days > ForensicsConfig::MAX_DORMANT_DAYS {
            return Err(ConfigError::invalid(
                "forensics.dormant_days",
                format!("must be between 1 and {}", ForensicsConfig::MAX_DORMANT_DAYS),
            ));
        }
        for (field, value) in [
            ("forensics.rapid_release_grace_hours", forensics.rapid_release_grace_hours),
            ("forensics.fresh_release_hours", forensics.fresh_release_hours),
        ] {
            if value > ForensicsConfig::MAX_HOURS {
                return Err(ConfigError::invalid(
                    field,
                    format!("must not exceed {}", ForensicsConfig::MAX_HOURS),
                ));
            }
        }

        for pattern in &self.scripts.patterns {
            regex::Regex::new(pattern).map_err(|e| ConfigError::Pattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }

        let scoring = &self.scoring;
        let max = ScoringConfig::MAX_SCORE;
        for (field, weight) in [
            ("scoring.critical", scoring.critical),
            ("scoring.high", scoring.high),
            ("scoring.medium", scoring.medium),
            ("scoring.low", scoring.low),
            ("scoring.info", scoring.info),
        ] {
            if weight > max {
                return Err(ConfigError::invalid(field, format!("must not exceed {}", max)));
            }
        }
        if scoring.warn_threshold == 0 || scoring.warn_threshold >= scoring.fail_threshold {
            return Err(ConfigError::invalid(
                "scoring.warn_threshold",
                "must be greater than 0 and below scoring.fail_threshold",
            ));
        }
        if scoring.fail_threshold > max {
            return Err(ConfigError::invalid(
                "scoring.fail_threshold",
                format!("must not exceed {}", max),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match_exact() {
        assert!(glob_match("lodash", "lodash"));
        assert!(!glob_match("lodash", "underscore"));
    }

    #[test]
    fn test_glob_match_prefix_and_scope() {
        assert!(glob_match("lodash*", "lodash.debounce"));
        assert!(glob_match("@internal/*", "@internal/logger"));
        assert!(!glob_match("@internal/*", "@babel/core"));
    }

    #[test]
    fn test_glob_match_contains() {
        assert!(glob_match("*lodash*", "my-lodash-plugin"));
        assert!(!glob_match("*lodash*", "underscore"));
    }

    #[test]
    fn test_ignore_advisories_by_id_or_alias() {
        let ignore = IgnoreConfig {
            advisories: vec!["CVE-2021-23337".to_string()],
        };
        assert!(ignore.should_ignore_advisory("CVE-2021-23337", &[]));
        assert!(ignore.should_ignore_advisory(
            "GHSA-35jh-r3h4-6jhm",
            &["CVE-2021-23337".to_string()]
        ));
        assert!(!ignore.should_ignore_advisory("GHSA-other", &[]));
    }

    #[test]
    fn test_typosquat_threshold_is_length_scaled() {
        let typo = TyposquatConfig::default();
        assert_eq!(typo.threshold_for(8), 2);
        assert_eq!(typo.threshold_for(9), 3);
        assert_eq!(typo.max_distance(), 3);
    }

    #[test]
    fn test_config_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.task_timeout(), Duration::from_secs(10));
        assert_eq!(config.engine.scan_timeout(), Duration::from_secs(120));
        assert_eq!(config.forensics.rapid_release_grace_hours, 72);
        assert!(config.engine.effective_concurrency() >= 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.engine.per_source_rate_limit = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "engine.per_source_rate_limit"
        ));

        let mut config = Config::default();
        config.engine.per_source_rate_limit = 1e-30;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "engine.per_source_rate_limit"
        ));

        let mut config = Config::default();
        config.engine.task_timeout_secs = 500;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scripts.patterns = vec!["(unclosed".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::Pattern { .. })));

        let mut config = Config::default();
        config.scoring.warn_threshold = 80;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_windows() {
        let mut config = Config::default();
        config.forensics.dormant_days = 1_000_000_000_000_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "forensics.dormant_days"
        ));

        let mut config = Config::default();
        config.forensics.rapid_release_grace_hours = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "forensics.rapid_release_grace_hours"
        ));

        let mut config = Config::default();
        config.forensics.fresh_release_hours = ForensicsConfig::MAX_HOURS + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "forensics.fresh_release_hours"
        ));

        let mut config = Config::default();
        config.forensics.dormant_days = ForensicsConfig::MAX_DORMANT_DAYS;
        config.forensics.fresh_release_hours = ForensicsConfig::MAX_HOURS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_forensics_windows_saturate_instead_of_panicking() {
        let forensics = ForensicsConfig {
            rapid_release_grace_hours: u64::MAX,
            dormant_days: 1_000_000_000_000_000,
            fresh_release_hours: i64::MAX as u64,
            ..Default::default()
        };
        assert_eq!(forensics.rapid_release_grace(), chrono::Duration::MAX);
        assert_eq!(forensics.dormant_period(), chrono::Duration::MAX);
        assert_eq!(forensics.fresh_release_window(), chrono::Duration::MAX);
        assert_eq!(ForensicsConfig::default().dormant_period(), chrono::Duration::days(365));
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[engine]\ntask_timeout_secs = 5\n\n[ignore]\nadvisories = [\"GHSA-1\"]\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.engine.task_timeout_secs, 5);
        assert_eq!(config.engine.scan_timeout_secs, 120);
        assert_eq!(config.ignore.advisories, vec!["GHSA-1".to_string()]);
        assert_eq!(config.ecosystem, "npm");
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "engine = [").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = Config::generate_default_config();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.scoring, ScoringConfig::default());
    }
}
