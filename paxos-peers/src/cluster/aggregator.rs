//! Fan-in of one broadcast.
//!
//! Per-peer call tasks report raw completions; a single aggregation task
//! decodes them into [`Response`] values and forwards them to the caller
//! until every peer has answered or the window closes.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use paxos_common::{messages, RoleId, RpcError};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Reply of one peer to one broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    pub peer: RoleId,
    pub outcome: Result<T, RpcError>,
}

impl<T> Response<T> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn reply(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&RpcError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, RpcError> {
        self.outcome
    }
}

/// Raw result of one RPC, before decoding.
#[derive(Debug)]
pub(crate) struct Completion {
    pub peer: RoleId,
    pub outcome: Result<Vec<u8>, RpcError>,
}

impl Completion {
    fn into_response<T: DeserializeOwned>(self) -> Response<T> {
        let outcome = self.outcome.and_then(|body| messages::decode(&body));
        Response {
            peer: self.peer,
            outcome,
        }
    }
}

/// Replies of one broadcast, in arrival order.
///
/// Best effort: the stream ends after `expected()` responses, or earlier if
/// the aggregation window closed first. In that case `is_expired()` turns
/// true before the stream reports its end. Callers do their own quorum
/// counting over whatever arrived.
#[derive(Debug)]
pub struct ResponseStream<T> {
    expected: usize,
    rx: mpsc::Receiver<Response<T>>,
    expired: Arc<AtomicBool>,
}

impl<T> ResponseStream<T> {
    /// A stream that was never fed, e.g. for a skipped prepare phase.
    pub(crate) fn empty() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self {
            expected: 0,
            rx,
            expired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of peers contacted for this broadcast.
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub async fn recv(&mut self) -> Option<Response<T>> {
        self.rx.recv().await
    }

    /// Whether the aggregation window closed before every peer answered.
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    pub async fn collect_all(mut self) -> Vec<Response<T>> {
        let mut responses = Vec::with_capacity(self.expected);
        while let Some(response) = self.rx.recv().await {
            responses.push(response);
        }
        responses
    }
}

impl<T> Stream for ResponseStream<T> {
    type Item = Response<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Starts collecting `peer_count` completions. The window is armed here,
/// once, and is not extended by incoming replies.
pub(crate) fn aggregate<T>(
    peer_count: usize,
    mut completions: mpsc::Receiver<Completion>,
    window: Duration,
) -> ResponseStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let (forward, rx) = mpsc::channel(peer_count.max(1));
    let expired = Arc::new(AtomicBool::new(false));
    let expired_flag = Arc::clone(&expired);

    tokio::spawn(async move {
        let deadline = sleep_until(Instant::now() + window);
        tokio::pin!(deadline);

        let mut received = 0;
        while received < peer_count {
            // Calls are bounded by the same window; once it has passed their
            // timeouts must not be forwarded as replies.
            tokio::select! {
                biased;
                _ = &mut deadline => {
                    expired_flag.store(true, Ordering::Release);
                    warn!("Aggregation window of {:?} closed with {} of {} replies", window, received, peer_count);
                    return;
                }
                completion = completions.recv() => {
                    let Some(completion) = completion else {
                        break;
                    };
                    received += 1;
                    if forward.send(completion.into_response::<T>()).await.is_err() {
                        debug!("Response stream dropped after {} of {} replies", received, peer_count);
                        return;
                    }
                }
            }
        }
    });

    ResponseStream {
        expected: peer_count,
        rx,
        expired,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use paxos_common::SuccessResp;

    fn completion(peer: u64, index: u64) -> Completion {
        Completion {
            peer: RoleId(peer),
            outcome: messages::encode(&SuccessResp { first_unchosen_index: index }),
        }
    }

    #[tokio::test]
    async fn test_forwards_every_completion() {
        let (tx, rx) = mpsc::channel(3);
        let mut stream = aggregate::<SuccessResp>(3, rx, Duration::from_secs(2));

        tx.send(completion(1, 10)).await.unwrap();
        tx.send(Completion { peer: RoleId(2), outcome: Err(RpcError::ConnectionClosed) }).await.unwrap();
        tx.send(completion(3, 12)).await.unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.peer, RoleId(1));
        assert_eq!(first.reply(), Some(&SuccessResp { first_unchosen_index: 10 }));

        let second = stream.next().await.unwrap();
        assert_eq!(second.error(), Some(&RpcError::ConnectionClosed));

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.is_none());
        assert!(!stream.is_expired());
    }

    #[tokio::test]
    async fn test_undecodable_reply_becomes_codec_error() {
        let (tx, rx) = mpsc::channel(1);
        let stream = aggregate::<SuccessResp>(1, rx, Duration::from_secs(2));

        tx.send(Completion { peer: RoleId(4), outcome: Ok(vec![1]) }).await.unwrap();
        let responses = stream.collect_all().await;
        assert_eq!(responses.len(), 1);
        assert!(matches!(responses[0].error(), Some(RpcError::Codec(_))));
    }

    #[tokio::test]
    async fn test_never_delivers_more_than_expected() {
        let (tx, rx) = mpsc::channel(4);
        let stream = aggregate::<SuccessResp>(2, rx, Duration::from_secs(2));

        for peer in 1..=4 {
            let _ = tx.send(completion(peer, peer)).await;
        }
        assert_eq!(stream.collect_all().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_not_extended_by_replies() {
        let (tx, rx) = mpsc::channel(3);
        let stream = aggregate::<SuccessResp>(3, rx, Duration::from_secs(2));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            tx.send(completion(1, 1)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1000)).await;
            let _ = tx.send(completion(2, 2)).await;
        });

        let responses = stream.collect_all().await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].peer, RoleId(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_at_the_deadline_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        let mut stream = aggregate::<SuccessResp>(1, rx, Duration::from_secs(2));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            let _ = tx
                .send(Completion { peer: RoleId(1), outcome: Err(RpcError::Timeout) })
                .await;
        });

        assert!(stream.recv().await.is_none());
        assert!(stream.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_flag_set_before_stream_ends() {
        let (_tx, rx) = mpsc::channel::<Completion>(2);
        let mut stream = aggregate::<SuccessResp>(2, rx, Duration::from_secs(2));

        assert!(stream.recv().await.is_none());
        assert!(stream.is_expired());
    }

    #[tokio::test]
    async fn test_empty_stream_ends_immediately() {
        let mut stream = ResponseStream::<SuccessResp>::empty();
        assert_eq!(stream.expected(), 0);
        assert!(stream.recv().await.is_none());
        assert!(!stream.is_expired());
    }
}
