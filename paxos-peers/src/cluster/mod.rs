pub mod aggregator;
pub mod broadcast;
pub mod builder;
pub mod core;
pub mod peers;
pub mod quorum;

pub use aggregator::{Response, ResponseStream};
pub use builder::ClusterBuilder;
pub use self::core::Cluster;
pub use peers::PeerStatus;
pub use quorum::quorum_size;
