//! Error types for providers, scans and configuration.

use std::path::PathBuf;

use cfgtree_core::SourceId;

/// Failure reported by a [`SourceProvider`](crate::provider::SourceProvider).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown source '{0}'")]
    NotFound(SourceId),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// Operational scan failures. Content problems are diagnostics, never
/// `ScanError`s.
///
/// Cloneable so that one build result can be shared by every caller that
/// waited on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// The provider could not produce the source. Isolated per source.
    #[error("source '{source_id}' is unavailable: {reason}")]
    SourceUnavailable { source_id: SourceId, reason: String },

    /// Caller misuse, raised immediately.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("scan cancelled before '{0}' was dispatched")]
    Cancelled(SourceId),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ScanError {
    pub fn unavailable(source_id: &SourceId, error: impl std::fmt::Display) -> Self {
        ScanError::SourceUnavailable {
            source_id: source_id.clone(),
            reason: error.to_string(),
        }
    }
}

impl From<ConfigError> for ScanError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::OutOfRange(_) => ScanError::InvalidArgument(error.to_string()),
            other => ScanError::Config(other.to_string()),
        }
    }
}

/// Errors from loading or validating `cfgtree.toml`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// A numeric bound such as a worker count or cache capacity is zero.
    #[error("configuration value out of range: {0}")]
    OutOfRange(String),
}
