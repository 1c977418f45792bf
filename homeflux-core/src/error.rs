//! Error types for the Homeflux core library.
//!
//! The taxonomy follows the cycle model of the scheduler: `Connection`
//! means an agent session could not be established and the cycle is lost;
//! `Agent` means a connected source returned unusable telemetry; both are
//! caught and logged at the job-cycle boundary. `NotConnected` marks caller
//! misuse. A fetch that merely returns no data is not an error at all and
//! surfaces as an empty record list.

use thiserror::Error;

use crate::config::ConfigError;

/// The main error type for the Homeflux core library.
#[derive(Debug, Error)]
pub enum HomefluxError {
    /// Could not establish a session with a source. Fatal to the cycle,
    /// not to the job loop.
    #[error("failed to connect to {source_name}: {message}")]
    Connection {
        source_name: String,
        message: String,
    },

    /// An operation was attempted while the agent was disconnected.
    #[error("{0} is not connected")]
    NotConnected(String),

    /// A connected source produced unusable data, e.g. a missing
    /// telemetry key. Fatal to the cycle and surfaced to the scheduler.
    #[error("agent error from {source_name}: {message}")]
    Agent {
        source_name: String,
        message: String,
    },

    /// The time-series store rejected a connection or write.
    #[error("store error: {0}")]
    Store(String),

    /// An HTTP client could not be constructed or used.
    #[error("http error: {0}")]
    Http(String),

    /// A timescale name outside second/minute/hour/day/week.
    #[error("invalid timescale: {0}")]
    InvalidTimescale(String),

    /// Configuration load or validation failure.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HomefluxError {
    /// Create a connection error for the named source.
    pub fn connection(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        HomefluxError::Connection {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create an agent error for the named source.
    pub fn agent(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        HomefluxError::Agent {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error means the agent session could not be
    /// established at all.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, HomefluxError::Connection { .. })
    }
}

/// Result type alias for Homeflux operations.
pub type HomefluxResult<T> = Result<T, HomefluxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HomefluxError::connection("gwp_opower", "connection refused");
        assert!(err.to_string().contains("gwp_opower"));
        assert!(err.to_string().contains("connection refused"));

        let err = HomefluxError::NotConnected("nut".to_string());
        assert_eq!(err.to_string(), "nut is not connected");
    }

    #[test]
    fn test_error_categorization() {
        assert!(HomefluxError::connection("nut", "refused").is_connection_error());
        assert!(!HomefluxError::agent("nut", "missing key").is_connection_error());
        assert!(!HomefluxError::Store("write failed".to_string()).is_connection_error());
    }
}
