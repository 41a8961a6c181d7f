//! Error types for cache and persistence operations.

use std::path::PathBuf;

/// Errors raised by the cache manager and the on-disk hierarchy store.
///
/// Corruption is never fatal: the store logs it, drops the file and reports
/// a miss to its caller.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A persisted entry failed to decode or verify.
    #[error("corrupt cache file {path}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// Misuse by the caller, such as a zero capacity.
    #[error("invalid cache argument: {reason}")]
    InvalidArgument { reason: String },
}

impl CacheError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, CacheError::Corruption { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::Io {
            path: PathBuf::from("/tmp/cfgtree/mod-a.bin"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("mod-a.bin"));
    }

    #[test]
    fn corruption_display() {
        let err = CacheError::Corruption {
            path: PathBuf::from("x.bin"),
            reason: "bad magic".to_string(),
        };
        assert!(err.is_corruption());
        assert_eq!(err.to_string(), "corrupt cache file x.bin: bad magic");
    }

    #[test]
    fn invalid_argument_display() {
        let err = CacheError::InvalidArgument {
            reason: "capacity must be at least 1".to_string(),
        };
        assert!(!err.is_corruption());
        assert!(err.to_string().contains("capacity must be at least 1"));
    }
}
