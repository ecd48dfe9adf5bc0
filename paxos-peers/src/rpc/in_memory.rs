use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paxos_common::{RoleId, RpcError};

use super::{Method, MethodHandler};
use crate::ports::{Connection, Connector};

/// A cluster member living in the same process.
///
/// Counts every call it receives, can be slowed down, refuse dials or go
/// down mid-run. Used to exercise the cluster without sockets.
pub struct InMemoryPeer {
    handlers: HashMap<Method, Arc<dyn MethodHandler>>,
    latency: Duration,
    refuse_dial: AtomicBool,
    down: AtomicBool,
    calls: [AtomicUsize; 4],
    in_flight: AtomicUsize,
}

/// Counts a call as in flight until its future completes or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryPeer {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            latency: Duration::ZERO,
            refuse_dial: AtomicBool::new(false),
            down: AtomicBool::new(false),
            calls: Default::default(),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_handler(mut self, method: Method, handler: Arc<dyn MethodHandler>) -> Self {
        self.handlers.insert(method, handler);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn refusing_dials(self) -> Self {
        self.refuse_dial.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_refuse_dial(&self, refuse: bool) {
        self.refuse_dial.store(refuse, Ordering::SeqCst);
    }

    /// A peer that is down fails every call with `ConnectionClosed`.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self, method: Method) -> usize {
        self.calls[slot(method)].load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    /// Calls received that have neither answered nor been abandoned.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn dispatch(&self, method: Method, body: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        self.calls[slot(method)].fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(RpcError::ConnectionClosed);
        }

        match self.handlers.get(&method) {
            Some(handler) => handler.handle(body).await,
            None => Err(RpcError::UnknownMethod(method.as_str().to_string())),
        }
    }
}

impl Default for InMemoryPeer {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(method: Method) -> usize {
    match method {
        Method::Heartbeat => 0,
        Method::Prepare => 1,
        Method::Accept => 2,
        Method::Success => 3,
    }
}

/// Resolves addresses to in-process peers.
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    peers: HashMap<String, Arc<InMemoryPeer>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer(mut self, address: impl Into<String>, peer: Arc<InMemoryPeer>) -> Self {
        self.peers.insert(address.into(), peer);
        self
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn dial(&self, role: RoleId, address: &str) -> Result<Arc<dyn Connection>, RpcError> {
        let peer = self
            .peers
            .get(address)
            .ok_or_else(|| RpcError::Transport(format!("no route to {}", address)))?;

        if peer.refuse_dial.load(Ordering::SeqCst) {
            return Err(RpcError::Transport(format!("connection refused by {}", address)));
        }

        Ok(Arc::new(InMemoryConnection {
            role,
            peer: Arc::clone(peer),
        }))
    }
}

struct InMemoryConnection {
    role: RoleId,
    peer: Arc<InMemoryPeer>,
}

impl fmt::Debug for InMemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryConnection").field("role", &self.role).finish()
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn call(&self, method: Method, body: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        self.peer.dispatch(method, body).await
    }
}
