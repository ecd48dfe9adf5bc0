use std::collections::HashMap;
use std::sync::Arc;

use paxos_common::RoleId;
use tokio::sync::Mutex;

use crate::{
    config::{BroadcastSettings, ClusterConfig},
    error::{ClusterError, Result},
    ports::{Connection, Connector},
    rpc::TcpConnector,
};

/// One remote cluster member.
pub struct Peer {
    pub(crate) role_id: RoleId,
    pub(crate) address: String,
    /// Set once by `Cluster::connect`, never cleared.
    pub(crate) connection: Option<Arc<dyn Connection>>,
    pub(crate) require_promise: bool,
}

impl Peer {
    fn new(role_id: RoleId, address: String) -> Self {
        Self {
            role_id,
            address,
            connection: None,
            require_promise: true,
        }
    }
}

/// Everything guarded by the cluster lock.
pub(crate) struct ClusterState {
    pub(crate) nodes: HashMap<RoleId, Peer>,
    pub(crate) has_connected: bool,
    /// Number of peers with `require_promise == false`.
    pub(crate) skip_promise_count: usize,
}

impl ClusterState {
    /// Fails with the lowest role still lacking a connection until
    /// `Cluster::connect` has succeeded.
    fn ensure_connected(&self) -> Result<()> {
        if self.has_connected {
            return Ok(());
        }
        match self
            .nodes
            .values()
            .filter(|peer| peer.connection.is_none())
            .map(|peer| peer.role_id)
            .min()
        {
            Some(role) => Err(ClusterError::NotConnected(role)),
            // Empty cluster: there is nobody to talk to either way.
            None => Ok(()),
        }
    }

    /// Peers matching `filter` with their connections, in role order.
    pub(crate) fn connected_peers<F>(&self, filter: F) -> Result<Vec<(RoleId, Arc<dyn Connection>)>>
    where
        F: Fn(&Peer) -> bool,
    {
        self.ensure_connected()?;

        let mut peers: Vec<&Peer> = self.nodes.values().filter(|p| filter(p)).collect();
        peers.sort_by_key(|p| p.role_id);

        peers
            .into_iter()
            .map(|peer| match &peer.connection {
                Some(conn) => Ok((peer.role_id, Arc::clone(conn))),
                None => Err(ClusterError::NotConnected(peer.role_id)),
            })
            .collect()
    }
}

/// The set of remote peers of this node and the only way to talk to them.
///
/// Every piece of mutable state sits behind one lock. Broadcasts hold it just
/// long enough to pick their targets and spawn the calls; replies are
/// collected without it.
pub struct Cluster {
    pub(crate) state: Mutex<ClusterState>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) settings: BroadcastSettings,
}

impl Cluster {
    /// Builds the peer table from `role id -> address`. Performs no I/O.
    pub fn new(addresses: HashMap<RoleId, String>, connector: Arc<dyn Connector>) -> Self {
        Self::with_settings(addresses, connector, BroadcastSettings::default())
    }

    pub fn with_settings(
        addresses: HashMap<RoleId, String>,
        connector: Arc<dyn Connector>,
        settings: BroadcastSettings,
    ) -> Self {
        let nodes = addresses
            .into_iter()
            .map(|(role, address)| (role, Peer::new(role, address)))
            .collect();

        Cluster {
            state: Mutex::new(ClusterState {
                nodes,
                has_connected: false,
                skip_promise_count: 0,
            }),
            connector,
            settings,
        }
    }

    /// Cluster over TCP as described by a config file.
    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;
        let connector = Arc::new(TcpConnector::new(config.connect_timeout()));
        Ok(Self::with_settings(
            config.addresses(),
            connector,
            config.broadcast_settings(),
        ))
    }

    pub fn settings(&self) -> BroadcastSettings {
        self.settings
    }
}
