//! Error types

use std::io;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure class, used by topology consumers to decide what to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed descriptor or option; rejected before any network activity
    Configuration,
    /// Capability mismatch, TLS or authentication failure while connecting
    Handshake,
    /// I/O failure mid read/write; the session is unusable afterwards
    Transport,
    /// Unexpected response shape or statement-scoped failure
    Protocol,
    /// Timeout or explicit cancel of a running statement
    Cancellation,
}

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid descriptor, option or configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Server closed the connection
    #[error("connection closed")]
    ConnectionClosed,

    /// Server greeting or capabilities unusable
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// TLS negotiation failed
    #[error("tls error: {0}")]
    Tls(String),

    /// Protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error packet returned by the server
    #[error("server error {code} ({sql_state}): {message}")]
    Server {
        /// Server error number
        code: u16,
        /// Five character SQLSTATE
        sql_state: String,
        /// Human-readable message
        message: String,
    },

    /// A bound parameter was never set (1-based index)
    #[error("parameter at position {index} is not set")]
    MissingParameter {
        /// 1-based parameter index
        index: usize,
    },

    /// Invalid state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Connection busy with another command
    #[error("connection busy: {0}")]
    ConnectionBusy(String),

    /// Statement exceeded its configured timeout
    #[error("query timed out")]
    QueryTimeout,

    /// Statement cancelled on request
    #[error("query cancelled")]
    QueryCancelled,

    /// The cancellation attempt itself failed
    #[error("query cancellation failed: {0}")]
    CancelFailed(String),

    /// Every endpoint of a topology failed; one `address: error` entry each
    #[error("no endpoint reachable ({})", .0.join("; "))]
    EndpointsExhausted(Vec<String>),
}

impl Error {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Configuration,
            Error::Handshake(_) | Error::Authentication(_) | Error::Tls(_) => {
                ErrorCategory::Handshake
            }
            Error::Io(_) | Error::ConnectionClosed | Error::EndpointsExhausted(_) => {
                ErrorCategory::Transport
            }
            Error::QueryTimeout | Error::QueryCancelled | Error::CancelFailed(_) => {
                ErrorCategory::Cancellation
            }
            Error::Server { .. }
            | Error::Protocol(_)
            | Error::MissingParameter { .. }
            | Error::InvalidState { .. }
            | Error::ConnectionBusy(_) => ErrorCategory::Protocol,
        }
    }

    /// Whether trying another endpoint of the same topology may succeed
    ///
    /// Credential rejections and configuration errors would fail identically on
    /// every host, so they stop an endpoint walk.
    pub fn is_endpoint_failure(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionClosed | Error::Tls(_) | Error::Handshake(_) => true,
            // ER_CON_COUNT_ERROR, ER_HOST_IS_BLOCKED, ER_HOST_NOT_PRIVILEGED, ER_SERVER_SHUTDOWN
            Error::Server { code, .. } => matches!(code, 1040 | 1129 | 1130 | 1053),
            _ => false,
        }
    }

    /// Whether the server reported that the running query was interrupted
    pub fn is_query_interrupted(&self) -> bool {
        // ER_QUERY_INTERRUPTED, ER_STATEMENT_TIMEOUT (MariaDB), ER_QUERY_TIMEOUT (MySQL)
        matches!(self, Error::Server { code, .. } if matches!(code, 1317 | 1969 | 3024))
    }

    /// Whether the session that produced this error can no longer be used
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Handshake
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(code: u16) -> Error {
        Error::Server {
            code,
            sql_state: "HY000".into(),
            message: "boom".into(),
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            Error::Config("x".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            Error::Authentication("x".into()).category(),
            ErrorCategory::Handshake
        );
        assert_eq!(Error::ConnectionClosed.category(), ErrorCategory::Transport);
        assert_eq!(Error::QueryTimeout.category(), ErrorCategory::Cancellation);
        assert_eq!(
            Error::MissingParameter { index: 2 }.category(),
            ErrorCategory::Protocol
        );
        assert_eq!(server(1064).category(), ErrorCategory::Protocol);
    }

    #[test]
    fn test_endpoint_failure() {
        assert!(Error::ConnectionClosed.is_endpoint_failure());
        assert!(server(1040).is_endpoint_failure());
        assert!(!server(1045).is_endpoint_failure());
        assert!(!Error::Authentication("denied".into()).is_endpoint_failure());
        assert!(!Error::Config("bad".into()).is_endpoint_failure());
    }

    #[test]
    fn test_query_interrupted() {
        assert!(server(1317).is_query_interrupted());
        assert!(server(1969).is_query_interrupted());
        assert!(!server(1064).is_query_interrupted());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            server(1064).to_string(),
            "server error 1064 (HY000): boom"
        );
        assert_eq!(
            Error::MissingParameter { index: 3 }.to_string(),
            "parameter at position 3 is not set"
        );
        assert_eq!(
            Error::EndpointsExhausted(vec!["a:3306: connection closed".into(), "b:3306: x".into()])
                .to_string(),
            "no endpoint reachable (a:3306: connection closed; b:3306: x)"
        );
    }
}
