//! Outbound gossip.
//!
//! Every cycle walks the known-peer set and, depending on the configured
//! strategy, either pushes a short-lived readiness announcement to each
//! peer or makes sure a persistent WebSocket link to it is up. Peers are
//! tried one after another; a failing peer is logged and retried next
//! cycle, forever.

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use conclave_common::constants::{headers, routes};
use conclave_common::{ConclaveError, PeerAddress, TunnelAck};

use super::drive_link;
use crate::config::{GossipConfig, GossipStrategy};
use crate::state::AppState;

/// Outbound gossip loop
pub struct GossipService {
    state: AppState,
    config: GossipConfig,
    /// Peers with a link task running, from dial until the link drops
    dialing: Arc<Mutex<HashSet<PeerAddress>>>,
}

impl GossipService {
    pub fn new(state: AppState, config: GossipConfig) -> Self {
        Self {
            state,
            config,
            dialing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run gossip cycles until shutdown
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let interval = self.config.cycle_interval();

        tracing::info!(
            strategy = ?self.config.strategy,
            interval = ?interval,
            self_id = %self.state.self_id(),
            "🗣️ Gossip started"
        );

        loop {
            tokio::select! {
                _ = self.run_cycle() => {}
                _ = shutdown.recv() => break,
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("🗣️ Gossip shutting down");
        Ok(())
    }

    /// One pass over the known peers
    pub async fn run_cycle(&self) {
        // Snapshot under the lock, then talk to peers without it
        let peers = self.state.known_peers().await;

        for peer in peers {
            match self.config.strategy {
                GossipStrategy::PushAnnounce => self.announce_to(&peer).await,
                GossipStrategy::PersistentBroadcast => {
                    if !self.state.has_link(&peer).await {
                        self.open_link(peer).await;
                    }
                }
            }
        }

        if self.config.strategy == GossipStrategy::PersistentBroadcast {
            let links = self.state.link_count().await;
            tracing::debug!(links, "Reconnect sweep done");
        }
    }

    async fn announce_to(&self, peer: &PeerAddress) {
        let timeout = self.config.peer_timeout();
        match tokio::time::timeout(timeout, announce(peer, self.state.self_id())).await {
            Ok(Ok(_)) => {
                tracing::debug!(peer = %peer, self_id = %self.state.self_id(), "Informed peer");
            }
            Ok(Err(e)) => {
                tracing::debug!(peer = %peer, error = %e, "Announcement failed, retrying next cycle");
            }
            Err(_) => {
                tracing::debug!(peer = %peer, timeout = ?timeout, "Announcement timed out");
            }
        }
    }

    /// Spawn a task that connects to `peer` and pumps the link until it drops.
    /// A peer whose previous dial is still in progress is skipped.
    async fn open_link(&self, peer: PeerAddress) {
        if !self.dialing.lock().await.insert(peer.clone()) {
            tracing::trace!(peer = %peer, "Dial already in progress");
            return;
        }

        let state = self.state.clone();
        let dialing = self.dialing.clone();
        let timeout = self.config.peer_timeout();

        tokio::spawn(async move {
            let result = match &peer {
                PeerAddress::Tcp { host, port } => {
                    match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), *port))).await {
                        Ok(Ok(stream)) => link_over(&state, &peer, stream, timeout).await,
                        Ok(Err(e)) => Err(ConclaveError::Io(e)),
                        Err(_) => Err(ConclaveError::Timeout(format!("connect to {}", peer))),
                    }
                }
                PeerAddress::Local(path) => {
                    match tokio::time::timeout(timeout, connect_local(path)).await {
                        Ok(Ok(stream)) => link_over(&state, &peer, stream, timeout).await,
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(ConclaveError::Timeout(format!("connect to {}", peer))),
                    }
                }
            };

            if let Err(e) = result {
                tracing::debug!(peer = %peer, error = %e, "Link attempt failed, retrying next cycle");
            }
            dialing.lock().await.remove(&peer);
        });
    }
}

/// Send one readiness announcement to `peer` and read the acknowledgement
pub async fn announce(peer: &PeerAddress, self_id: &str) -> Result<TunnelAck, ConclaveError> {
    match peer {
        PeerAddress::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            announce_over(stream, peer, self_id).await
        }
        PeerAddress::Local(path) => {
            let stream = connect_local(path).await?;
            announce_over(stream, peer, self_id).await
        }
    }
}

#[cfg(unix)]
async fn connect_local(path: &std::path::Path) -> Result<tokio::net::UnixStream, ConclaveError> {
    Ok(tokio::net::UnixStream::connect(path).await?)
}

#[cfg(not(unix))]
async fn connect_local(path: &std::path::Path) -> Result<TcpStream, ConclaveError> {
    Err(ConclaveError::Peer(format!(
        "local-domain peers are not supported on this platform: {}",
        path.display()
    )))
}

/// HTTP/1.1 `POST /tunnel/ready` over an already-connected stream
async fn announce_over<S>(stream: S, peer: &PeerAddress, self_id: &str) -> Result<TunnelAck, ConclaveError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let peer_err = |e: hyper::Error| ConclaveError::Peer(format!("{}: {}", peer, e));

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(peer_err)?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::trace!(error = %e, "Announce connection closed with error");
        }
    });

    let request = Request::post(routes::TUNNEL_READY)
        .header(HOST, peer.authority())
        .header(CONTENT_TYPE, "application/json")
        .header(headers::X_NODE_ID, self_id)
        .body(Empty::<Bytes>::new())
        .map_err(|e| ConclaveError::InvalidInput(format!("announce request: {}", e)))?;

    let response = sender.send_request(request).await.map_err(peer_err)?;
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(peer_err)?
        .to_bytes();

    if !status.is_success() {
        return Err(ConclaveError::Peer(format!(
            "{} answered {}: {}",
            peer,
            status,
            String::from_utf8_lossy(&body)
        )));
    }

    serde_json::from_slice(&body)
        .map_err(|e| ConclaveError::Peer(format!("{} sent a bad acknowledgement: {}", peer, e)))
}

/// WebSocket handshake to the peer's `/ws` (carrying our id, which the peer
/// counts as a readiness announcement), then pump the link until it drops
async fn link_over<S>(
    state: &AppState,
    peer: &PeerAddress,
    stream: S,
    timeout: Duration,
) -> Result<(), ConclaveError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut request = format!("ws://{}{}", peer.authority(), routes::WS)
        .into_client_request()
        .map_err(|e| ConclaveError::Peer(format!("{}: {}", peer, e)))?;
    let node_id = HeaderValue::from_str(state.self_id())
        .map_err(|e| ConclaveError::InvalidInput(format!("self id is not a header value: {}", e)))?;
    request.headers_mut().insert(headers::X_NODE_ID, node_id);

    let (socket, _) = tokio::time::timeout(timeout, tokio_tungstenite::client_async(request, stream))
        .await
        .map_err(|_| ConclaveError::Timeout(format!("handshake with {}", peer)))?
        .map_err(|e| ConclaveError::Peer(format!("{}: {}", peer, e)))?;

    let (link_id, queue) = state.attach_link(Some(peer.clone())).await;
    tracing::info!(peer = %peer, link = link_id, "🔗 Persistent link established");

    let label = peer.to_string();
    drive_link(
        socket,
        queue,
        |payload: String| Message::Text(payload.into()),
        state.subscribe_shutdown(),
        &label,
    )
    .await;

    state.detach_link(link_id).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::routes::create_router;
    use conclave_common::ChainUpdate;
    use futures::StreamExt;

    fn node(id: &str, expected: u32) -> AppState {
        AppState::new(AppConfig {
            node_id: Some(id.to_string()),
            expected_peers: expected,
            ..Default::default()
        })
        .unwrap()
    }

    async fn spawn_tcp_node(state: AppState) -> PeerAddress {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = create_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        PeerAddress::tcp("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_announce_over_tcp_registers_readiness() {
        let remote = node("remote", 2);
        let addr = spawn_tcp_node(remote.clone()).await;

        let ack = announce(&addr, "local").await.unwrap();
        assert_eq!(ack, TunnelAck::acknowledged());
        assert!(remote.ready_peers().await.contains(&"local".to_string()));
        assert!(remote.quorum_reached().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_announce_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.sock");

        let remote = node("remote", 3);
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let app = create_router(remote.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let addr = PeerAddress::Local(path);
        announce(&addr, "sidecar-1").await.unwrap();
        assert_eq!(
            remote.ready_peers().await,
            vec!["remote".to_string(), "sidecar-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_an_error() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = announce(&PeerAddress::tcp("127.0.0.1", port), "local")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_push_cycle_survives_dead_peers() {
        let remote = node("remote", 2);
        let good = spawn_tcp_node(remote.clone()).await;

        let local = node("local", 2);
        local.add_peer(PeerAddress::tcp("127.0.0.1", 1)).await;
        local.add_peer(good).await;

        let gossip = GossipService::new(
            local.clone(),
            GossipConfig {
                peer_timeout_secs: 1,
                ..Default::default()
            },
        );
        gossip.run_cycle().await;

        assert!(remote.quorum_reached().await);
    }

    #[tokio::test]
    async fn test_persistent_link_announces_and_receives_chain() {
        let remote = node("remote", 2);
        let addr = spawn_tcp_node(remote.clone()).await;

        // Connect as a plain WebSocket client to observe what the remote pushes
        let mut request = format!("ws://{}/ws", addr.authority())
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert(headers::X_NODE_ID, HeaderValue::from_static("watcher"));
        let (mut socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();

        assert!(remote.ready_peers().await.contains(&"watcher".to_string()));

        // Wait for the link to be registered, then tick
        for _ in 0..50 {
            if remote.link_count().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let (chain, reached) = remote.apply_fingerprint("fp").await;
        assert_eq!(reached, 1);

        let frame = socket.next().await.unwrap().unwrap();
        let update: ChainUpdate = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(update.node_id, "remote");
        assert_eq!(update.service_id, chain);
    }

    #[tokio::test]
    async fn test_broadcast_cycle_opens_one_link_per_peer() {
        let remote = node("remote", 2);
        let addr = spawn_tcp_node(remote.clone()).await;

        let local = node("local", 2);
        local.add_peer(addr.clone()).await;

        let gossip = GossipService::new(
            local.clone(),
            GossipConfig {
                strategy: GossipStrategy::PersistentBroadcast,
                peer_timeout_secs: 2,
                ..Default::default()
            },
        );
        gossip.run_cycle().await;

        for _ in 0..50 {
            if local.has_link(&addr).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(local.has_link(&addr).await);
        assert!(remote.quorum_reached().await);

        // A second cycle reuses the live link
        gossip.run_cycle().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(local.link_count().await, 1);

        local.shutdown();
    }

    #[tokio::test]
    async fn test_announce_over_ipv6_loopback() {
        // Skip where the host has no IPv6 loopback
        let Ok(listener) = tokio::net::TcpListener::bind("[::1]:0").await else {
            return;
        };
        let port = listener.local_addr().unwrap().port();
        let remote = node("remote", 2);
        let app = create_router(remote.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let addr: PeerAddress = format!("[::1]:{}", port).parse().unwrap();
        let ack = announce(&addr, "local").await.unwrap();
        assert_eq!(ack, TunnelAck::acknowledged());
        assert!(remote.quorum_reached().await);
    }

    #[tokio::test]
    async fn test_slow_handshake_is_not_dialed_twice() {
        // Accepts TCP but never answers the WebSocket handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                held.push(stream);
            }
        });

        let local = node("local", 2);
        let addr = PeerAddress::tcp("127.0.0.1", port);
        local.add_peer(addr.clone()).await;

        let gossip = GossipService::new(
            local.clone(),
            GossipConfig {
                strategy: GossipStrategy::PersistentBroadcast,
                peer_timeout_secs: 3,
                ..Default::default()
            },
        );
        gossip.run_cycle().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        gossip.run_cycle().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!local.has_link(&addr).await);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let local = node("local", 2);
        local.add_peer(PeerAddress::tcp("127.0.0.1", 1)).await;
        let gossip = GossipService::new(local.clone(), GossipConfig::default());

        let shutdown = local.subscribe_shutdown();
        let handle = tokio::spawn(async move { gossip.run(shutdown).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        local.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
