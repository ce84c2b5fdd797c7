//! Error types for the collector

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::extract::ExtractError;

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while collecting
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed descriptor or unusable process configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Cannot connect, cannot authenticate, or the connection dropped mid-call
    #[error("connection error: {0}")]
    Connection(String),

    /// Attribute or operation missing, or the agent rejected the request
    #[error("query error: {0}")]
    Query(String),

    /// Value path could not be walked
    #[error("query error: {0}")]
    Extract(#[from] ExtractError),

    /// Call did not complete within its bound
    #[error("timeout: {0}")]
    Timeout(String),

    /// Controller rejected or failed a request
    #[error("controller error: {0}")]
    Controller(String),

    /// Dispatcher has been stopped
    #[error("dispatcher is shut down")]
    Shutdown,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Map this error onto the classification reported to the controller
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) | Self::Toml(_) => ErrorClass::Configuration,
            Self::Connection(_) | Self::Http(_) | Self::Io(_) => ErrorClass::Connection,
            Self::Timeout(_) => ErrorClass::Timeout,
            Self::Query(_)
            | Self::Extract(_)
            | Self::Controller(_)
            | Self::Shutdown
            | Self::Serialization(_) => ErrorClass::Query,
        }
    }
}

/// Error classification reported per descriptor
///
/// `Connection` is kept distinct so the controller can suppress duplicate
/// alerts while an agent is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Configuration,
    Connection,
    Query,
    Timeout,
}

impl ErrorClass {
    /// Wire name of the classification
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Connection => "connection",
            Self::Query => "query",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transport_failures_as_connection() {
        let err = Error::Connection("refused".to_string());
        assert_eq!(err.class(), ErrorClass::Connection);
        assert_eq!(err.class().to_string(), "connection");
    }

    #[test]
    fn extract_failures_are_query_errors() {
        let err = Error::from(ExtractError::FieldNotFound("blam".to_string()));
        assert_eq!(err.class(), ErrorClass::Query);
        assert!(err.to_string().contains("blam"));
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&ErrorClass::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
    }
}
