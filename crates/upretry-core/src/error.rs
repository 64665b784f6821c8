//! Typed errors for policy validation and configuration loading.

use std::path::PathBuf;

/// A retry policy that cannot be used as configured.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolicyError {
    /// A trigger name in `retry_on` is not known.
    #[error("unknown retry trigger `{0}`")]
    UnknownTrigger(String),
    /// Backoff base interval must be at least one millisecond.
    #[error("retry base interval must be > 0ms")]
    ZeroBaseInterval,
    /// Max interval is smaller than the base interval.
    #[error("retry max interval {max_ms}ms is below base interval {base_ms}ms")]
    InvertedIntervals { base_ms: u64, max_ms: u64 },
    /// A configured retriable status code is not an HTTP status.
    #[error("invalid retriable status code {0}")]
    InvalidStatusCode(u16),
}

/// Failure to load or validate the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid retry policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("duplicate cluster `{0}`")]
    DuplicateCluster(String),
}
