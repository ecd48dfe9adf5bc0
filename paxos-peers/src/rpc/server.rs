use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paxos_common::{messages, RpcError};
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::frame::{read_frame, write_frame, ReplyFrame, RequestFrame};
use super::Method;

/// Server side of one RPC method.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, body: Vec<u8>) -> Result<Vec<u8>, RpcError>;
}

struct TypedHandler<Req, Resp, F> {
    f: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

#[async_trait]
impl<Req, Resp, F, Fut> MethodHandler for TypedHandler<Req, Resp, F>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, String>> + Send + 'static,
{
    async fn handle(&self, body: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let request: Req = messages::decode(&body)?;
        let response = (self.f)(request).await.map_err(RpcError::Remote)?;
        messages::encode(&response)
    }
}

/// Wraps an async function over typed payloads into a [`MethodHandler`].
///
/// Errors returned by `f` reach the caller as `RpcError::Remote`.
pub fn typed_handler<Req, Resp, F, Fut>(f: F) -> Arc<dyn MethodHandler>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, String>> + Send + 'static,
{
    Arc::new(TypedHandler {
        f,
        _marker: PhantomData,
    })
}

type Handlers = Arc<HashMap<String, Arc<dyn MethodHandler>>>;

/// Pause after a failed `accept`, e.g. while out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serves role methods to cluster peers over TCP.
pub struct RpcServer {
    listener: TcpListener,
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl RpcServer {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handlers: HashMap::new(),
        })
    }

    pub fn register(mut self, method: Method, handler: Arc<dyn MethodHandler>) -> Self {
        self.handlers.insert(method.as_str().to_string(), handler);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` fires (or its sender is dropped).
    /// Open connections are closed on shutdown as well.
    pub async fn serve(self, shutdown: oneshot::Receiver<()>) {
        let handlers: Handlers = Arc::new(self.handlers);
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    if let Some((stream, remote)) = accepted_or_backoff(accepted).await {
                        debug!("Accepted connection from {}", remote);
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(serve_connection(stream, Arc::clone(&handlers), stop_rx.clone()));
                    }
                }
            }
        }

        let _ = stop_tx.send(true);
        info!("RPC server stopped");
    }

    /// Runs the server in the background.
    pub fn spawn(self) -> std::io::Result<RpcServerHandle> {
        let addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        info!("RPC server listening on {}", addr);

        let task = tokio::spawn(self.serve(shutdown_rx));
        Ok(RpcServerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }
}

pub struct RpcServerHandle {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RpcServerHandle {
    /// Stops accepting, drops every open connection and waits for the loop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

async fn accepted_or_backoff<T>(accepted: std::io::Result<T>) -> Option<T> {
    match accepted {
        Ok(conn) => Some(conn),
        Err(e) => {
            warn!("Accept failed: {}", e);
            tokio::time::sleep(ACCEPT_BACKOFF).await;
            None
        }
    }
}

async fn serve_connection(stream: TcpStream, handlers: Handlers, mut stop: watch::Receiver<bool>) {
    let (mut reader, mut writer) = stream.into_split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ReplyFrame>(256);

    let mut writer_task = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &reply).await {
                debug!("Reply write failed: {}", e);
                break;
            }
        }
    });

    loop {
        let request = tokio::select! {
            _ = stop.changed() => {
                writer_task.abort();
                return;
            }
            frame = read_frame::<_, RequestFrame>(&mut reader) => frame,
        };

        let request = match request {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                debug!("Request read failed: {}", e);
                break;
            }
        };

        let handler = handlers.get(&request.method).cloned();
        let reply_tx = reply_tx.clone();
        tokio::spawn(async move {
            let outcome = match handler {
                Some(handler) => handler.handle(request.body).await,
                None => Err(RpcError::UnknownMethod(request.method)),
            };
            let _ = reply_tx.send(ReplyFrame { seq: request.seq, outcome }).await;
        });
    }

    // The client stopped sending; answer what is still in flight.
    drop(reply_tx);
    tokio::select! {
        _ = &mut writer_task => {}
        _ = stop.changed() => writer_task.abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paxos_common::{SuccessNotify, SuccessResp};
    use tokio::io::AsyncWriteExt;

    fn slow_success_handler(delay: Duration) -> Arc<dyn MethodHandler> {
        typed_handler(move |note: SuccessNotify| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, String>(SuccessResp { first_unchosen_index: note.index + 1 })
        })
    }

    #[tokio::test]
    async fn test_in_flight_reply_survives_client_half_close() {
        let server = RpcServer::bind("127.0.0.1:0")
            .await
            .unwrap()
            .register(Method::Success, slow_success_handler(Duration::from_millis(200)))
            .spawn()
            .unwrap();

        let stream = TcpStream::connect(server.addr).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();

        let request = RequestFrame {
            seq: 7,
            method: Method::Success.as_str().to_string(),
            body: messages::encode(&SuccessNotify { index: 3, value: vec![] }).unwrap(),
        };
        write_frame(&mut writer, &request).await.unwrap();
        // Half-close: no more requests, but the reply must still arrive.
        writer.shutdown().await.unwrap();

        let reply = read_frame::<_, ReplyFrame>(&mut reader).await.unwrap().unwrap();
        assert_eq!(reply.seq, 7);
        let resp: SuccessResp = messages::decode(&reply.outcome.unwrap()).unwrap();
        assert_eq!(resp.first_unchosen_index, 4);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_for_slow_handlers() {
        let server = RpcServer::bind("127.0.0.1:0")
            .await
            .unwrap()
            .register(Method::Success, slow_success_handler(Duration::from_secs(60)))
            .spawn()
            .unwrap();

        let stream = TcpStream::connect(server.addr).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        let request = RequestFrame {
            seq: 1,
            method: Method::Success.as_str().to_string(),
            body: messages::encode(&SuccessNotify { index: 0, value: vec![] }).unwrap(),
        };
        write_frame(&mut writer, &request).await.unwrap();
        writer.shutdown().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), server.shutdown())
            .await
            .unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(5), read_frame::<_, ReplyFrame>(&mut reader))
            .await
            .unwrap();
        assert!(matches!(closed, Ok(None) | Err(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_accept_backs_off() {
        let start = tokio::time::Instant::now();
        let failed = std::io::Error::new(std::io::ErrorKind::Other, "too many open files");

        assert!(accepted_or_backoff::<()>(Err(failed)).await.is_none());
        assert!(start.elapsed() >= ACCEPT_BACKOFF);

        let start = tokio::time::Instant::now();
        assert_eq!(accepted_or_backoff(Ok(5)).await, Some(5));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
