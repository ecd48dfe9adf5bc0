use paxos_common::RoleId;
use tracing::debug;

use super::core::{Cluster, ClusterState};
use crate::error::{ClusterError, Result};

/// Majority of `n` peers: `floor(n / 2) + 1`.
pub fn quorum_size(peer_count: usize) -> usize {
    peer_count / 2 + 1
}

impl ClusterState {
    /// A majority of peers already hold a valid promise, so the prepare
    /// phase can be bypassed.
    pub(crate) fn skip_prepare(&self) -> bool {
        self.skip_promise_count >= quorum_size(self.nodes.len())
    }
}

impl Cluster {
    /// Marks whether a promise is required from `role` before accept
    /// requests may be sent to it.
    ///
    /// Only toggle this to `false` when the protocol allows it: the prepare
    /// phase is skipped as soon as a majority of peers is exempt.
    pub async fn set_promise_requirement(&self, role: RoleId, required: bool) -> Result<()> {
        let mut state = self.state.lock().await;

        let peer = state
            .nodes
            .get_mut(&role)
            .ok_or(ClusterError::UnknownPeer(role))?;

        if peer.require_promise == required {
            return Ok(());
        }
        peer.require_promise = required;

        if required {
            state.skip_promise_count -= 1;
        } else {
            state.skip_promise_count += 1;
        }
        debug!(
            "Promise from {} {}; skipping {} of {}",
            role,
            if required { "required" } else { "waived" },
            state.skip_promise_count,
            state.nodes.len()
        );
        Ok(())
    }

    /// Number of peers from which no promise is required.
    pub async fn skip_promise_count(&self) -> usize {
        self.state.lock().await.skip_promise_count
    }

    pub async fn should_skip_prepare(&self) -> bool {
        self.state.lock().await.skip_prepare()
    }
}
