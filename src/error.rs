//! Error types for the manifest layer.

use std::io;
use thiserror::Error;

use crate::types::FileNum;

/// Result type alias for manifest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for manifest operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// I/O error while reading or writing a manifest record.
    #[error("I/O error: {0}")]
    Io(String),

    /// The manifest, or a version built from it, is inconsistent.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Two files compared equal under a level's B-tree ordering.
    #[error("files {a} and {b} collided on sort keys")]
    KeyCollision { a: FileNum, b: FileNum },

    /// The caller passed an argument the operation cannot work with.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The L0 sublevels cannot be updated incrementally and must be
    /// recomputed from scratch.
    #[error("L0 sublevels cannot be updated incrementally")]
    InvalidL0SublevelsOpt,

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// The generic error returned for any malformed manifest record.
    pub fn corrupt_manifest() -> Self {
        Error::Corruption("corrupt manifest".to_string())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration<S: Into<String>>(msg: S) -> Self {
        Error::InvalidConfiguration(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Prefix the message of a corruption or internal error with more context.
    pub fn with_context<S: AsRef<str>>(self, ctx: S) -> Self {
        match self {
            Error::Corruption(msg) => Error::Corruption(format!("{}: {}", ctx.as_ref(), msg)),
            Error::Internal(msg) => Error::Internal(format!("{}: {}", ctx.as_ref(), msg)),
            other => other,
        }
    }

    /// Check if this error indicates corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::KeyCollision { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("bad data");
        assert_eq!(format!("{}", err), "Corruption detected: bad data");

        let err = Error::KeyCollision {
            a: FileNum(4),
            b: FileNum(12),
        };
        assert_eq!(
            format!("{}", err),
            "files 000004 and 000012 collided on sort keys"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::corruption("out of order").with_context("L1 files 000001 and 000002");
        assert_eq!(
            err,
            Error::Corruption("L1 files 000001 and 000002: out of order".into())
        );
        // Non-message variants pass through untouched.
        assert_eq!(
            Error::InvalidL0SublevelsOpt.with_context("x"),
            Error::InvalidL0SublevelsOpt
        );
    }

    #[test]
    fn test_error_is_corruption() {
        assert!(Error::corrupt_manifest().is_corruption());
        assert!(Error::KeyCollision {
            a: FileNum(1),
            b: FileNum(2)
        }
        .is_corruption());
        assert!(!Error::invalid_argument("nope").is_corruption());
    }
}
