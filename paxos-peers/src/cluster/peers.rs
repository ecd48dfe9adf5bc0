use paxos_common::RoleId;
use tracing::{info, warn};

use super::core::Cluster;
use crate::error::{ClusterError, Result};

/// Point-in-time view of one peer, for status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    pub role_id: RoleId,
    pub address: String,
    pub connected: bool,
    pub require_promise: bool,
}

impl Cluster {
    /// Dials every peer once.
    ///
    /// Stops at the first failing dial: peers dialed before it keep their
    /// connection, the cluster stays unconnected, and a later call only dials
    /// the peers still missing one. After a successful call every further
    /// call fails with `AlreadyConnected`.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.has_connected {
            return Err(ClusterError::AlreadyConnected);
        }

        let mut roles: Vec<RoleId> = state.nodes.keys().copied().collect();
        roles.sort();

        for role in roles {
            let Some(peer) = state.nodes.get_mut(&role) else {
                continue;
            };
            if peer.connection.is_some() {
                continue;
            }

            match self.connector.dial(role, &peer.address).await {
                Ok(conn) => peer.connection = Some(conn),
                Err(source) => {
                    warn!("Failed to connect to {} at {}: {}", role, peer.address, source);
                    return Err(ClusterError::Connection {
                        role,
                        address: peer.address.clone(),
                        source,
                    });
                }
            }
        }

        state.has_connected = true;
        info!("Connected to {} peers", state.nodes.len());
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.has_connected
    }

    /// Number of peers; fixed for the lifetime of the cluster.
    pub async fn peer_count(&self) -> usize {
        self.state.lock().await.nodes.len()
    }

    pub async fn role_ids(&self) -> Vec<RoleId> {
        let state = self.state.lock().await;
        let mut roles: Vec<RoleId> = state.nodes.keys().copied().collect();
        roles.sort();
        roles
    }

    pub async fn peer_statuses(&self) -> Vec<PeerStatus> {
        let state = self.state.lock().await;
        let mut statuses: Vec<PeerStatus> = state
            .nodes
            .values()
            .map(|peer| PeerStatus {
                role_id: peer.role_id,
                address: peer.address.clone(),
                connected: peer.connection.is_some(),
                require_promise: peer.require_promise,
            })
            .collect();
        statuses.sort_by_key(|s| s.role_id);
        statuses
    }
}
