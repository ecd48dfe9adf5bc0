use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use paxos_common::{RoleId, RpcError};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::frame::{read_frame, write_frame, ReplyFrame, RequestFrame};
use super::Method;
use crate::ports::{Connection, Connector};

const OUTBOUND_QUEUE: usize = 256;

type Waiters = HashMap<u64, oneshot::Sender<Result<Vec<u8>, RpcError>>>;
type Pending = Arc<Mutex<Waiters>>;

/// Never held across an await.
fn lock(pending: &Pending) -> MutexGuard<'_, Waiters> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Unregisters a waiter when its call ends early, e.g. when the caller's
/// timeout drops the call future.
struct WaiterGuard<'a> {
    pending: &'a Pending,
    seq: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.seq);
    }
}

/// Dials peers over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn dial(&self, role: RoleId, address: &str) -> Result<Arc<dyn Connection>, RpcError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| RpcError::Transport(format!("dial {} timed out", address)))??;
        stream.set_nodelay(true)?;

        debug!("Connected to {} at {}", role, address);
        Ok(Arc::new(TcpConnection::start(role, stream)))
    }
}

/// One TCP stream per peer, shared by all in-flight calls.
///
/// Requests are tagged with a sequence number; a reader task routes each
/// reply back to the caller waiting on that number.
pub struct TcpConnection {
    role: RoleId,
    next_seq: AtomicU64,
    outbound: mpsc::Sender<RequestFrame>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl TcpConnection {
    pub fn start(role: RoleId, stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_replies(
            role,
            read_half,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));
        let writer = tokio::spawn(write_requests(
            role,
            write_half,
            outbound_rx,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Self {
            role,
            next_seq: AtomicU64::new(0),
            outbound,
            pending,
            closed,
            reader,
            writer,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn call(&self, method: Method, body: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = lock(&self.pending);
            if self.is_closed() {
                return Err(RpcError::ConnectionClosed);
            }
            pending.insert(seq, tx);
        }
        let _waiter = WaiterGuard {
            pending: &self.pending,
            seq,
        };

        let frame = RequestFrame {
            seq,
            method: method.as_str().to_string(),
            body,
        };
        if self.outbound.send(frame).await.is_err() {
            return Err(RpcError::ConnectionClosed);
        }

        rx.await.unwrap_or(Err(RpcError::ConnectionClosed))
    }
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_replies(role: RoleId, mut reader: OwnedReadHalf, pending: Pending, closed: Arc<AtomicBool>) {
    loop {
        match read_frame::<_, ReplyFrame>(&mut reader).await {
            Ok(Some(reply)) => {
                let waiter = lock(&pending).remove(&reply.seq);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply.outcome);
                    }
                    None => debug!("Dropping reply {} from {}: no caller waiting", reply.seq, role),
                }
            }
            Ok(None) => {
                debug!("Connection to {} closed by peer", role);
                break;
            }
            Err(e) => {
                warn!("Read from {} failed: {}", role, e);
                break;
            }
        }
    }

    fail_pending(&pending, &closed);
}

async fn write_requests(
    role: RoleId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<RequestFrame>,
    pending: Pending,
    closed: Arc<AtomicBool>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            warn!("Write to {} failed: {}", role, e);
            fail_pending(&pending, &closed);
            return;
        }
    }
}

fn fail_pending(pending: &Pending, closed: &AtomicBool) {
    closed.store(true, Ordering::Release);
    for (_, tx) in lock(pending).drain() {
        let _ = tx.send(Err(RpcError::ConnectionClosed));
    }
}
