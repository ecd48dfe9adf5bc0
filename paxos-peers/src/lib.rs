pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod ports;
pub mod rpc;

pub use cluster::{
    quorum_size,
    Cluster,
    ClusterBuilder,
    PeerStatus,
    Response,
    ResponseStream,
};
pub use config::{BroadcastSettings, ClusterConfig};
pub use error::ClusterError;
pub use ports::{Connection, Connector};
pub use rpc::Method;
