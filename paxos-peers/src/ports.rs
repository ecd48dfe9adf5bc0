use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use paxos_common::{RoleId, RpcError};

use crate::rpc::Method;

/// An established, multiplexed RPC channel to one peer.
///
/// `call` may be invoked concurrently; every call is independent and resolves
/// to the raw reply body or the per-peer failure.
#[async_trait]
pub trait Connection: Send + Sync + Debug {
    async fn call(&self, method: Method, body: Vec<u8>) -> Result<Vec<u8>, RpcError>;
}

/// Opens connections to peers. Swapped for an in-process version in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, role: RoleId, address: &str) -> Result<Arc<dyn Connection>, RpcError>;
}
