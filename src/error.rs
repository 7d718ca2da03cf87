//! Typed errors returned across the pool boundary.

use std::time::Duration;

use thiserror::Error;

/// Failure of a pooled transport. Every variant evicts the session it
/// happened on before it reaches the caller.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Initial handshake or authentication failed
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    /// Mid-session failure: select, search, fetch or send rejected
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The operation did not complete within the configured bound
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    pub fn connect(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn protocol(reason: impl ToString) -> Self {
        Self::Protocol(reason.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The message could not be built; no session was touched
    #[error("invalid message: {0}")]
    Compose(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Management endpoint answered with a non-2xx status
    #[error("management API returned {status}: {body}")]
    Status { status: u16, body: String },
    /// Response body was not the expected JSON
    #[error("malformed management API response: {0}")]
    Malformed(String),
    /// The call went through but the control panel refused it
    #[error("management API rejected the call: {}", .0.join("; "))]
    Rejected(Vec<String>),
}

impl ApiError {
    /// Whether the session that produced this error must be discarded.
    pub fn evicts_session(&self) -> bool {
        !matches!(self, ApiError::Rejected(_))
    }
}

/// A message that could not be decoded. Never leaves the decoder: the raw
/// payload is substituted and the error is only logged.
#[derive(Debug, Error)]
#[error("failed to decode message {id}: {reason}")]
pub struct DecodeError {
    pub id: u32,
    pub reason: String,
}
