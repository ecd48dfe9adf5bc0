use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use std::{fs, io};

use paxos_common::RoleId;
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};

pub const DEFAULT_AGGREGATION_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;

/// Tuning shared by every broadcast of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Single window, armed when aggregation starts, after which no more
    /// replies are delivered for that broadcast.
    pub aggregation_timeout: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            aggregation_timeout: Duration::from_millis(DEFAULT_AGGREGATION_TIMEOUT_MS),
        }
    }
}

fn default_aggregation_timeout_ms() -> u64 {
    DEFAULT_AGGREGATION_TIMEOUT_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Static description of the remote members of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Role id -> `host:port` of every remote peer.
    pub peers: BTreeMap<RoleId, String>,
    #[serde(default = "default_aggregation_timeout_ms")]
    pub aggregation_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl ClusterConfig {
    pub fn new(peers: BTreeMap<RoleId, String>) -> Self {
        Self {
            peers,
            aggregation_timeout_ms: DEFAULT_AGGREGATION_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some((role, _)) = self.peers.iter().find(|(_, addr)| addr.trim().is_empty()) {
            return Err(ClusterError::Config(format!("peer {} has an empty address", role)));
        }
        if self.aggregation_timeout_ms == 0 {
            return Err(ClusterError::Config("aggregation_timeout_ms must be positive".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ClusterError::Config("connect_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn addresses(&self) -> HashMap<RoleId, String> {
        self.peers.iter().map(|(role, addr)| (*role, addr.clone())).collect()
    }

    pub fn broadcast_settings(&self) -> BroadcastSettings {
        BroadcastSettings {
            aggregation_timeout: Duration::from_millis(self.aggregation_timeout_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        fs::write(path, json)
    }

    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let parsed = serde_json::from_str::<ClusterConfig>(&data)
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }
}
