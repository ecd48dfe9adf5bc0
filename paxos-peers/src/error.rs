use paxos_common::{RoleId, RpcError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Dialing a peer failed during `Cluster::connect`.
    #[error("Failed to connect to {role} at {address}: {source}")]
    Connection {
        role: RoleId,
        address: String,
        #[source]
        source: RpcError,
    },

    #[error("Already connected to peers")]
    AlreadyConnected,

    #[error("Peer {0} is not part of the cluster")]
    UnknownPeer(RoleId),

    #[error("Peer {0} has no established connection")]
    NotConnected(RoleId),

    #[error("Failed to encode request: {0}")]
    Encode(#[source] RpcError),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
