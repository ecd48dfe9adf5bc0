use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use paxos_common::RoleId;

use super::core::Cluster;
use crate::{config::BroadcastSettings, ports::Connector, rpc::TcpConnector};

pub struct ClusterBuilder {
    addresses: HashMap<RoleId, String>,
    connector: Option<Arc<dyn Connector>>,
    settings: BroadcastSettings,
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self {
            addresses: HashMap::new(),
            connector: None,
            settings: BroadcastSettings::default(),
        }
    }

    pub fn with_peer(mut self, role: RoleId, address: impl Into<String>) -> Self {
        self.addresses.insert(role, address.into());
        self
    }

    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = (RoleId, S)>,
        S: Into<String>,
    {
        self.addresses
            .extend(peers.into_iter().map(|(role, addr)| (role, addr.into())));
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_aggregation_timeout(mut self, timeout: Duration) -> Self {
        self.settings.aggregation_timeout = timeout;
        self
    }

    /// Falls back to a TCP connector with default timeouts.
    pub fn build(self) -> Cluster {
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::default()));
        Cluster::with_settings(self.addresses, connector, self.settings)
    }
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
