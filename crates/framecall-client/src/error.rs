use std::time::Duration;

use framecall_frame::RemoteError;
use framecall_transport::TransportError;

/// Errors surfaced by client operations and call settlements.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error, including framing and encoding failures.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The host answered with a nonzero error code.
    #[error("{0}")]
    Remote(#[from] RemoteError),

    /// The handshake was rejected, malformed, or abandoned.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Client configuration is unusable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Call data is not a JSON object.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// No reply arrived in time.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The client was torn down before the call settled.
    #[error("client shut down")]
    Shutdown,
}

impl ClientError {
    /// The host's `{code, message}` when this is a remote error.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
