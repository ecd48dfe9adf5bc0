use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single RPC against a single peer.
///
/// These never abort a broadcast: the dispatcher wraps them into the
/// per-peer `Response` and keeps collecting the other replies.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RpcError {
    /// Dial or write failure on the underlying connection.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection was closed before the reply arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The remote handler ran and returned an error.
    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Codec error: {0}")]
    Codec(String),

    /// The remote has no handler registered under this method name.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// No reply within the caller's deadline.
    #[error("Call timed out")]
    Timeout,
}

impl From<bincode::Error> for RpcError {
    fn from(err: bincode::Error) -> Self {
        RpcError::Codec(err.to_string())
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => RpcError::ConnectionClosed,
            _ => RpcError::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(RpcError::from(eof), RpcError::ConnectionClosed);

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(RpcError::from(refused), RpcError::Transport(_)));
    }

    #[test]
    fn test_error_display() {
        let err = RpcError::UnknownMethod("AcceptorRole.Vote".into());
        assert_eq!(err.to_string(), "Unknown method: AcceptorRole.Vote");
    }
}
