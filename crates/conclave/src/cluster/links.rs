//! Persistent peer links.
//!
//! Each live WebSocket link (inbound `/ws` or outbound to a peer) gets an
//! entry holding the sending half of a bounded channel; the link task owns
//! the receiving half and the socket. Broadcasting never waits: a link
//! whose task has gone away, or whose queue is full because the remote
//! stopped reading, is dropped from the table on the spot.

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};

use conclave_common::PeerAddress;
use conclave_common::constants::{LINK_QUEUE_CAPACITY, LINK_WRITE_TIMEOUT_SECS};

/// Connection identity inside the link table
pub type LinkId = u64;

struct LinkEntry {
    /// Remote peer, for outbound links
    peer: Option<PeerAddress>,
    tx: mpsc::Sender<String>,
}

/// Observer list of live links keyed by connection id
pub struct LinkTable {
    next_id: LinkId,
    capacity: usize,
    links: HashMap<LinkId, LinkEntry>,
}

impl Default for LinkTable {
    fn default() -> Self {
        Self::with_capacity(LINK_QUEUE_CAPACITY)
    }
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table whose links buffer at most `capacity` pending payloads
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            next_id: 0,
            capacity: capacity.max(1),
            links: HashMap::new(),
        }
    }

    /// Register a link; the returned receiver yields every broadcast payload
    pub fn attach(&mut self, peer: Option<PeerAddress>) -> (LinkId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id;
        self.next_id += 1;
        self.links.insert(id, LinkEntry { peer, tx });
        (id, rx)
    }

    /// Remove a link. Returns false if it was already gone.
    pub fn detach(&mut self, id: LinkId) -> bool {
        self.links.remove(&id).is_some()
    }

    /// Is there a live outbound link to `peer`?
    pub fn has_peer(&self, peer: &PeerAddress) -> bool {
        self.links
            .values()
            .any(|link| link.peer.as_ref() == Some(peer) && !link.tx.is_closed())
    }

    /// Queue `payload` on every link, pruning closed and backed-up ones.
    /// Returns links reached.
    pub fn broadcast(&mut self, payload: &str) -> usize {
        self.links.retain(|id, link| match link.tx.try_send(payload.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(link = *id, "Link queue full, dropping slow link");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        self.links.len()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Pump one link until it closes, errors, or shutdown fires.
///
/// Outbound payloads from `queue` are written as frames built by `frame`.
/// A write that cannot complete within the write timeout ends the link,
/// and shutdown interrupts a pending write. Inbound frames are logged and
/// otherwise ignored: state only flows out of this node through the chain
/// engine.
pub async fn drive_link<L, M, E>(
    link: L,
    mut queue: mpsc::Receiver<String>,
    frame: fn(String) -> M,
    mut shutdown: broadcast::Receiver<()>,
    label: &str,
) where
    L: Stream<Item = Result<M, E>> + Sink<M>,
    <L as Sink<M>>::Error: Display,
    M: Debug + Unpin,
    E: Display,
{
    let write_timeout = Duration::from_secs(LINK_WRITE_TIMEOUT_SECS);
    let (mut sink, mut stream) = link.split();

    'pump: loop {
        tokio::select! {
            outbound = queue.recv() => {
                let Some(payload) = outbound else { break 'pump };
                tokio::select! {
                    written = tokio::time::timeout(write_timeout, sink.send(frame(payload))) => match written {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::debug!(link = label, error = %e, "Link write failed");
                            break 'pump;
                        }
                        Err(_) => {
                            tracing::debug!(link = label, timeout = ?write_timeout, "Link write stalled");
                            break 'pump;
                        }
                    },
                    _ = shutdown.recv() => break 'pump,
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(msg)) => {
                    tracing::debug!(link = label, frame = ?msg, "Inbound link frame (ignored)");
                }
                Some(Err(e)) => {
                    tracing::debug!(link = label, error = %e, "Link read failed");
                    break 'pump;
                }
                None => break 'pump,
            },
            _ = shutdown.recv() => {
                let _ = tokio::time::timeout(Duration::from_secs(1), sink.close()).await;
                break 'pump;
            }
        }
    }

    tracing::info!(link = label, "🔌 Link closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[test]
    fn test_broadcast_reaches_live_links() {
        let mut table = LinkTable::new();
        let (_a, mut rx_a) = table.attach(None);
        let (_b, mut rx_b) = table.attach(Some("peer:1".parse().unwrap()));

        assert_eq!(table.broadcast("chain-1"), 2);
        assert_eq!(rx_a.try_recv().unwrap(), "chain-1");
        assert_eq!(rx_b.try_recv().unwrap(), "chain-1");
    }

    #[test]
    fn test_broadcast_prunes_dead_links() {
        let mut table = LinkTable::new();
        let (_a, rx_a) = table.attach(None);
        let (_b, mut rx_b) = table.attach(None);
        drop(rx_a);

        assert_eq!(table.broadcast("chain-2"), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(rx_b.try_recv().unwrap(), "chain-2");
    }

    #[test]
    fn test_has_peer_and_detach() {
        let mut table = LinkTable::new();
        let peer: PeerAddress = "10.0.0.2:7501".parse().unwrap();
        let (id, _rx) = table.attach(Some(peer.clone()));

        assert!(table.has_peer(&peer));
        assert!(!table.has_peer(&"10.0.0.3:7501".parse().unwrap()));

        assert!(table.detach(id));
        assert!(!table.detach(id));
        assert!(!table.has_peer(&peer));
        assert!(table.is_empty());
    }

    /// In-memory duplex: frames written go to `out`, frames read come from `inbound`
    struct MemLink {
        out: fmpsc::UnboundedSender<String>,
        inbound: fmpsc::UnboundedReceiver<Result<String, String>>,
    }

    impl Stream for MemLink {
        type Item = Result<String, String>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.inbound).poll_next(cx)
        }
    }

    impl Sink<String> for MemLink {
        type Error = String;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: String) -> Result<(), String> {
            self.out.unbounded_send(item).map_err(|e| e.to_string())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_drive_link_forwards_and_exits_on_remote_close() {
        let (out_tx, mut out_rx) = fmpsc::unbounded();
        let (in_tx, in_rx) = fmpsc::unbounded();
        let link = MemLink { out: out_tx, inbound: in_rx };

        let mut table = LinkTable::new();
        let (_id, queue) = table.attach(None);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(async move {
            drive_link(link, queue, |s| s, shutdown_rx, "mem").await;
        });

        table.broadcast("chain-x");
        assert_eq!(out_rx.next().await.unwrap(), "chain-x");

        // Inbound frames are inert
        in_tx.unbounded_send(Ok("hello".to_string())).unwrap();
        drop(in_tx);

        task.await.unwrap();
        assert_eq!(table.broadcast("after-close"), 0);
        drop(shutdown_tx);
    }

    #[tokio::test]
    async fn test_drive_link_stops_on_shutdown() {
        let (out_tx, _out_rx) = fmpsc::unbounded();
        let (_in_tx, in_rx) = fmpsc::unbounded::<Result<String, String>>();
        let link = MemLink { out: out_tx, inbound: in_rx };

        let mut table = LinkTable::new();
        let (_id, queue) = table.attach(None);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(async move {
            drive_link(link, queue, |s| s, shutdown_rx, "mem").await;
        });

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_backed_up_link_is_dropped() {
        let mut table = LinkTable::with_capacity(2);
        let (_slow, _rx_slow) = table.attach(None);

        assert_eq!(table.broadcast("chain-1"), 1);
        assert_eq!(table.broadcast("chain-2"), 1);
        // Queue full: the link goes away instead of growing without bound
        assert_eq!(table.broadcast("chain-3"), 0);
        assert!(table.is_empty());
    }

    /// Sink that never becomes ready, like a peer that stopped reading
    struct Stalled {
        inbound: fmpsc::UnboundedReceiver<Result<String, String>>,
    }

    impl Stream for Stalled {
        type Item = Result<String, String>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.inbound).poll_next(cx)
        }
    }

    impl Sink<String> for Stalled {
        type Error = String;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: String) -> Result<(), String> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_stalled_link_is_pruned_and_exits_on_shutdown() {
        let (_in_tx, in_rx) = fmpsc::unbounded();
        let link = Stalled { inbound: in_rx };

        let mut table = LinkTable::new();
        let (_id, queue) = table.attach(None);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(async move {
            drive_link(link, queue, |s| s, shutdown_rx, "stalled").await;
        });

        for i in 0..=LINK_QUEUE_CAPACITY * 4 {
            table.broadcast(&format!("chain-{}", i));
            tokio::task::yield_now().await;
        }
        assert_eq!(table.len(), 0);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
