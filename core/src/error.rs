//! Error types for the batch HTTP client.
//!
//! # Design
//! Network failures are never errors here: they resolve to
//! [`Outcome`](crate::outcome::Outcome) values. `HttpClientError` covers only
//! conditions the caller caused or must fix (re-submitting an attempted
//! request, unidentifiable items, bad configuration, a failing credential
//! provider). `TransportError` is what a transport reports when no HTTP
//! response was produced at all.

use std::fmt;

/// Errors returned to the caller of `HttpClient`.
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    /// `send_with_retries` expects a fresh request with all counters at zero.
    #[error(
        "request was already attempted (connect: {connect}, read: {read}, status: {status}); \
         only fresh requests can be passed to send_with_retries"
    )]
    AlreadyAttempted { connect: u32, read: u32, status: u32 },

    /// An item identifier could not be extracted.
    #[error("failed to extract item identifier: {0}")]
    ItemId(String),

    #[error("failed to serialize request body: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to compress request body: {0}")]
    Compression(#[from] std::io::Error),

    #[error("credential provider failed: {0}")]
    Credentials(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// How a transport failure is classified for retry accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// DNS resolution, refused connection or connect timeout.
    Connect,
    /// Timed out or failed after the connection was established.
    Read,
    /// Anything else. Never retried.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Connect => write!(f, "connect"),
            TransportErrorKind::Read => write!(f, "read"),
            TransportErrorKind::Other => write!(f, "transport"),
        }
    }
}

/// A call that produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connect,
            message: message.into(),
        }
    }

    pub fn read(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Read,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Other,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_attempted_names_counters() {
        let err = HttpClientError::AlreadyAttempted {
            connect: 0,
            read: 1,
            status: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("status: 3"), "{msg}");
        assert!(msg.contains("read: 1"), "{msg}");
    }

    #[test]
    fn transport_error_display_includes_kind() {
        assert_eq!(
            TransportError::connect("connection refused").to_string(),
            "connect error: connection refused"
        );
        assert_eq!(
            TransportError::read("timed out").to_string(),
            "read error: timed out"
        );
        assert_eq!(TransportError::other("bad uri").kind, TransportErrorKind::Other);
    }
}
