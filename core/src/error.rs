//! Error types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported service: {0}")]
    UnsupportedService(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Relocation error: {0}")]
    Relocation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Push delivery error: {0}")]
    Push(#[from] PushError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// True for errors raised synchronously while validating a submission
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::UnsupportedService(_))
    }
}

/// Classified failure of the remote session
///
/// Raw transport errors are ambiguous, so every failure is mapped onto one of
/// these classes and reported with a message that tells the operator what to
/// check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connection refused by {host}: check that the SSH daemon is running and the port is correct")]
    Refused { host: String },

    #[error("connection to {host} was reset: the network or the remote host dropped the session")]
    Reset { host: String },

    #[error("timed out connecting to {host}: the host may be offline or unreachable")]
    Timeout { host: String },

    #[error("authentication rejected by {host} for user '{user}': check the password or private key")]
    AuthFailed { host: String, user: String },

    #[error("unexpected connection failure with {host}: {detail}")]
    Unknown { host: String, detail: String },
}

impl ConnectionError {
    /// Reset and timeout failures may succeed on a second attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectionError::Reset { .. } | ConnectionError::Timeout { .. })
    }

    /// Short machine-readable class name
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionError::Refused { .. } => "refused",
            ConnectionError::Reset { .. } => "reset",
            ConnectionError::Timeout { .. } => "timeout",
            ConnectionError::AuthFailed { .. } => "authFailed",
            ConnectionError::Unknown { .. } => "unknown",
        }
    }

    /// Classify an I/O error raised by the transport
    pub fn from_io(host: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        let host = host.to_string();
        match err.kind() {
            ErrorKind::ConnectionRefused => ConnectionError::Refused { host },
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ConnectionError::Reset { host },
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ConnectionError::Timeout { host },
            _ => Self::from_message(&host, &err.to_string()),
        }
    }

    /// Classify from an error message when no structured kind is available
    pub fn from_message(host: &str, message: &str) -> Self {
        let lower = message.to_lowercase();
        let host = host.to_string();

        if lower.contains("refused") {
            ConnectionError::Refused { host }
        } else if lower.contains("reset")
            || lower.contains("broken pipe")
            || lower.contains("disconnect")
            || lower.contains("eof")
        {
            ConnectionError::Reset { host }
        } else if lower.contains("timed out") || lower.contains("timeout") {
            ConnectionError::Timeout { host }
        } else {
            ConnectionError::Unknown {
                host,
                detail: message.to_string(),
            }
        }
    }
}

/// Outcome of a failed push delivery
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// The endpoint no longer exists; the subscription should be dropped
    #[error("subscription endpoint is gone (HTTP {status})")]
    Gone { status: u16 },

    #[error("push delivery failed: {0}")]
    Failed(String),
}

impl PushError {
    pub fn is_gone(&self) -> bool {
        matches!(self, PushError::Gone { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_classification() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "nope");
        assert_eq!(ConnectionError::from_io("pi", &refused).kind(), "refused");

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "peer reset");
        assert_eq!(ConnectionError::from_io("pi", &reset).kind(), "reset");

        let timeout = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(ConnectionError::from_io("pi", &timeout).kind(), "timeout");
    }

    #[test]
    fn test_message_classification() {
        assert_eq!(
            ConnectionError::from_message("pi", "Connection reset by peer").kind(),
            "reset"
        );
        assert_eq!(
            ConnectionError::from_message("pi", "operation timed out").kind(),
            "timeout"
        );
        assert_eq!(
            ConnectionError::from_message("pi", "no matching key exchange").kind(),
            "unknown"
        );
    }

    #[test]
    fn test_transient_classes() {
        let host = "pi".to_string();
        assert!(ConnectionError::Reset { host: host.clone() }.is_transient());
        assert!(ConnectionError::Timeout { host: host.clone() }.is_transient());
        assert!(!ConnectionError::Refused { host: host.clone() }.is_transient());
        assert!(!ConnectionError::AuthFailed {
            host,
            user: "raspberry".into()
        }
        .is_transient());
    }

    #[test]
    fn test_messages_are_distinct() {
        let host = "pi".to_string();
        let messages = [
            ConnectionError::Refused { host: host.clone() }.to_string(),
            ConnectionError::Reset { host: host.clone() }.to_string(),
            ConnectionError::Timeout { host: host.clone() }.to_string(),
            ConnectionError::AuthFailed {
                host: host.clone(),
                user: "u".into(),
            }
            .to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in messages.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
