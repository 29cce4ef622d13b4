//! Error types for the query federator.

use std::error::Error as StdError;
use std::fmt;
use std::result;

/// A specialized Result type for federation operations.
pub type Result<T> = result::Result<T, Error>;

/// The error type for federation operations.
#[derive(Debug)]
pub enum Error {
    /// A recognized entry point was called with an unsupported overload or shape
    UnsupportedOperation(String),
    /// `First` found no element across all sources
    EmptySequence(String),
    /// A source cannot be viewed as the requested element type
    TypeDispatch(String),
    /// Invalid data or query shape
    InvalidData(String),
    /// Storage backend errors
    Storage(String),
    /// Configuration errors
    Config(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// I/O errors
    Io(std::io::Error),
    /// Internal errors
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {}", msg),
            Error::EmptySequence(msg) => {
                if msg.is_empty() {
                    write!(f, "Sequence contains no elements.")
                } else {
                    write!(f, "Sequence contains no elements. {}", msg)
                }
            }
            Error::TypeDispatch(msg) => write!(f, "Type dispatch error: {}", msg),
            Error::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sequence_message() {
        let err = Error::EmptySequence(String::new());
        assert_eq!(err.to_string(), "Sequence contains no elements.");

        let err = Error::EmptySequence("x => (x.id > 2)".into());
        assert_eq!(
            err.to_string(),
            "Sequence contains no elements. x => (x.id > 2)"
        );
    }

    #[test]
    fn test_io_error_source() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(err.source().is_some());
        assert!(Error::Internal("x".into()).source().is_none());
    }
}
