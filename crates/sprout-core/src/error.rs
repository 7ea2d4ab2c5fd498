//! Error types and handling for Sprout operations

use std::path::PathBuf;
use thiserror::Error;

use crate::cache::CacheComputeError;
use crate::interpreter::{CompileError, EvaluationError};
use crate::normalize::NormalizeError;
use crate::parser::ParseError;

/// Main error type for Sprout operations
#[derive(Debug, Error)]
pub enum SproutError {
    /// Malformed grammar source
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Unknown symbol or operation while building a pipeline
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Failure raised inside a live evaluation stream
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// A cached computation failed
    #[error(transparent)]
    CacheCompute(#[from] CacheComputeError),

    /// AST transform failures (recursive inlining, dangling symbols)
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    /// Configuration loading or validation errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// File system I/O errors
    #[error("IO error for path '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

/// Error kind enumeration for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Compile,
    Evaluation,
    Cache,
    Normalize,
    Config,
    Io,
    Internal,
}

impl SproutError {
    /// Get the error kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SproutError::Parse(_) => ErrorKind::Parse,
            SproutError::Compile(_) => ErrorKind::Compile,
            SproutError::Evaluation(_) => ErrorKind::Evaluation,
            SproutError::CacheCompute(_) => ErrorKind::Cache,
            SproutError::Normalize(_) => ErrorKind::Normalize,
            SproutError::ConfigError { .. } => ErrorKind::Config,
            SproutError::IoError { .. } => ErrorKind::Io,
            SproutError::InternalError { .. } => ErrorKind::Internal,
        }
    }

    /// Check if this error is recoverable (can continue processing other grammars)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Parse | ErrorKind::Compile | ErrorKind::Normalize
        )
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create an IO error with path context
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for SproutError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            path: PathBuf::from("<unknown>"),
            source: err,
        }
    }
}

impl From<serde_json::Error> for SproutError {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigError {
            message: format!("JSON error: {err}"),
        }
    }
}

impl From<toml::de::Error> for SproutError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError {
            message: format!("TOML error: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let config = SproutError::config_error("bad depth");
        assert_eq!(config.kind(), ErrorKind::Config);
        assert!(!config.is_recoverable());
        assert_eq!(config.to_string(), "Configuration error: bad depth");

        let io = SproutError::io_error(
            "grammar.sprout",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(io.to_string().contains("grammar.sprout"));
    }

    #[test]
    fn test_wrapped_errors_keep_their_message() {
        let err = SproutError::from(EvaluationError::DepthExceeded {
            rule: "A".to_string(),
            limit: 100,
        });
        assert_eq!(err.kind(), ErrorKind::Evaluation);
        assert!(err.to_string().contains("'A'"));
    }
}
