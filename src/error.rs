//! Error taxonomy.
//!
//! - [`ConfigError`] - invalid options; aborts a scan before any task runs
//! - [`SourceError`] - a registry, vulnerability database or local artifact
//!   lookup failed; recorded per task, never fatal
//! - [`ScanError`] - everything the engine can surface, including timeouts and
//!   internal invariant violations

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config value: {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("invalid script pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of an external data source. `Clone` so a cached failure can be
/// handed to every task that asks for the same key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("local artifact missing: {0}")]
    FileMissing(String),

    #[error("failed to compute hash: {0}")]
    HashCompute(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::NOT_FOUND) {
            SourceError::NotFound(err.to_string())
        } else if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            SourceError::RateLimited(err.to_string())
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("{scope} timed out after {}ms", .after.as_millis())]
    Timeout { scope: String, after: Duration },

    #[error("internal invariant violated: {0}")]
    Internal(String),
}
