use std::sync::Arc;
use std::time::Duration;

use paxos_common::{
    messages, Heartbeat, HeartbeatAck, PrepareReq, PrepareResp, ProposalReq, ProposalResp, RoleId,
    RpcError, SuccessNotify, SuccessResp,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::aggregator::{aggregate, Completion, ResponseStream};
use super::core::Cluster;
use crate::{
    error::{ClusterError, Result},
    ports::Connection,
    rpc::Method,
};

fn encode_request<T: Serialize>(request: &T) -> Result<Vec<u8>> {
    messages::encode(request).map_err(ClusterError::Encode)
}

/// A reply later than `window` would be discarded anyway; giving up frees the
/// call task and its slot on the connection.
async fn call_within(
    conn: &dyn Connection,
    method: Method,
    body: Vec<u8>,
    window: Duration,
) -> std::result::Result<Vec<u8>, RpcError> {
    tokio::time::timeout(window, conn.call(method, body))
        .await
        .unwrap_or(Err(RpcError::Timeout))
}

impl Cluster {
    /// Sends a pulse to every peer. Replies are not collected; failures are
    /// only logged.
    ///
    /// Returns the number of peers pinged.
    pub async fn broadcast_heartbeat(&self, from: RoleId) -> Result<usize> {
        let body = encode_request(&Heartbeat { from })?;

        let state = self.state.lock().await;
        let targets = state.connected_peers(|_| true)?;

        let window = self.settings.aggregation_timeout;
        for (role, conn) in &targets {
            let (role, conn, body) = (*role, Arc::clone(conn), body.clone());
            tokio::spawn(async move {
                if let Err(e) = call_within(conn.as_ref(), Method::Heartbeat, body, window).await {
                    debug!("Heartbeat to {} failed: {}", role, e);
                }
            });
        }

        Ok(targets.len())
    }

    /// Heartbeat whose acknowledgements are collected like any other
    /// broadcast. Awaiting the stream guarantees every send has finished.
    pub async fn heartbeat_with_acks(&self, from: RoleId) -> Result<ResponseStream<HeartbeatAck>> {
        let body = encode_request(&Heartbeat { from })?;

        let state = self.state.lock().await;
        let targets = state.connected_peers(|_| true)?;
        Ok(self.fan_out(Method::Heartbeat, body, targets))
    }

    /// Prepare phase. Goes only to peers whose promise is still required,
    /// and to nobody when a majority of peers is already exempt.
    pub async fn broadcast_prepare_request(
        &self,
        request: &PrepareReq,
    ) -> Result<(usize, ResponseStream<PrepareResp>)> {
        let body = encode_request(request)?;

        let state = self.state.lock().await;
        if state.skip_prepare() {
            info!(
                "Skipping prepare phase: {} of {} peers hold a promise",
                state.skip_promise_count,
                state.nodes.len()
            );
            return Ok((0, ResponseStream::empty()));
        }

        let targets = state.connected_peers(|peer| peer.require_promise)?;
        let stream = self.fan_out(Method::Prepare, body, targets);
        Ok((stream.expected(), stream))
    }

    /// Accept phase. Always goes to every peer.
    pub async fn broadcast_proposal_request(
        &self,
        request: &ProposalReq,
    ) -> Result<(usize, ResponseStream<ProposalResp>)> {
        let body = encode_request(request)?;

        let state = self.state.lock().await;
        let targets = state.connected_peers(|_| true)?;
        let stream = self.fan_out(Method::Accept, body, targets);
        Ok((stream.expected(), stream))
    }

    /// Tells a single peer about a chosen value.
    pub async fn notify_of_success(
        &self,
        role: RoleId,
        info: &SuccessNotify,
    ) -> Result<ResponseStream<SuccessResp>> {
        let body = encode_request(info)?;

        let state = self.state.lock().await;
        let peer = state.nodes.get(&role).ok_or(ClusterError::UnknownPeer(role))?;
        let conn = peer
            .connection
            .as_ref()
            .filter(|_| state.has_connected)
            .map(Arc::clone)
            .ok_or(ClusterError::NotConnected(role))?;

        Ok(self.fan_out(Method::Success, body, vec![(role, conn)]))
    }

    /// Spawns one call per target and hands their completions to a fresh
    /// aggregation task. Never awaits, so it is safe under the cluster lock.
    fn fan_out<T>(
        &self,
        method: Method,
        body: Vec<u8>,
        targets: Vec<(RoleId, Arc<dyn Connection>)>,
    ) -> ResponseStream<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let peer_count = targets.len();
        let window = self.settings.aggregation_timeout;
        let (endpoint, completions) = mpsc::channel(peer_count.max(1));

        for (peer, conn) in targets {
            let endpoint = endpoint.clone();
            let body = body.clone();
            debug!("Dispatching {} to {}", method, peer);
            tokio::spawn(async move {
                let outcome = call_within(conn.as_ref(), method, body, window).await;
                let _ = endpoint.send(Completion { peer, outcome }).await;
            });
        }

        aggregate(peer_count, completions, self.settings.aggregation_timeout)
    }
}
