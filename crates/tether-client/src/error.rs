use crate::transport::TransportError;

/// Error types surfaced by the session manager
///
/// Only `MissingCredential` and `InvalidConfig` are returned synchronously from
/// commands; the remaining kinds reach callers through `last_error` and the
/// `on_error` observer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("No credential provided, skipping connection")]
    MissingCredential,

    #[error("{0}")]
    TransportConnect(String),

    #[error("Authentication failed: {0}")]
    AuthRejected(String),

    #[error("Cannot send message - not connected")]
    NotConnected,

    #[error("Max reconnection attempts reached")]
    RetryExhausted { attempts: u32 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// Whether the Retry Decision applies to this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportConnect(_))
    }
}
