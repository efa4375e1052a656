//! Error types for forkq.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pool operations.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool has already been started")]
    AlreadyRunning,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn worker '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Supervisor thread is no longer running")]
    SupervisorGone,
}

impl PoolError {
    /// Check if this is the double-start usage error.
    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning)
    }
}

/// Result type alias for forkq operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_already_running_message() {
        let err = PoolError::AlreadyRunning;
        assert!(err.is_already_running());
        assert!(err.to_string().contains("already been started"));
    }

    #[test]
    fn test_spawn_error_message() {
        let err = PoolError::Spawn {
            program: PathBuf::from("/no/such/worker"),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/no/such/worker"));
        assert!(msg.contains("not found"));
        assert!(!err.is_already_running());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: PoolError = io_err.into();
        assert!(matches!(err, PoolError::Io(_)));
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: PoolError = json_err.into();
        assert!(matches!(err, PoolError::Json(_)));
    }
}
