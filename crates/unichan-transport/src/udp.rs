use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::stats::Statistics;
use crate::traits::{endpoint_id, measured, Inbound, Transport, TransportKind};

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Default number of datagrams buffered per peer on a server endpoint.
pub const DEFAULT_PEER_INBOX_DEPTH: usize = 256;

enum Source {
    /// Client side: a connected socket owned by this transport.
    Connected(UdpSocket),
    /// Server side: datagrams routed here by a [`UdpEndpoint`].
    Demuxed {
        socket: Arc<UdpSocket>,
        inbox: Mutex<mpsc::Receiver<Bytes>>,
    },
}

/// UDP adapter. Each read returns one datagram and its sender.
pub struct UdpTransport {
    id: String,
    local: SocketAddr,
    remote: SocketAddr,
    source: Source,
    config: Arc<TransportConfig>,
    stats: Arc<Statistics>,
}

impl UdpTransport {
    /// Bind an ephemeral socket and connect it to `addr`.
    pub async fn connect(addr: SocketAddr, config: Arc<TransportConfig>) -> Result<Self> {
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: bind_addr,
                source,
            })?;
        socket
            .connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        let local = socket.local_addr()?;
        debug!(%local, %addr, "connected udp socket");

        Ok(Self {
            id: endpoint_id(TransportKind::Udp, Some(local), addr, None),
            local,
            remote: addr,
            source: Source::Connected(socket),
            config,
            stats: Arc::new(Statistics::default()),
        })
    }

    fn demuxed(
        socket: Arc<UdpSocket>,
        local: SocketAddr,
        remote: SocketAddr,
        inbox: mpsc::Receiver<Bytes>,
        config: Arc<TransportConfig>,
    ) -> Self {
        Self {
            id: endpoint_id(TransportKind::Udp, Some(local), remote, None),
            local,
            remote,
            source: Source::Demuxed {
                socket,
                inbox: Mutex::new(inbox),
            },
            config,
            stats: Arc::new(Statistics::default()),
        }
    }

    fn check_size(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local)
    }

    fn peer_addr(&self) -> SocketAddr {
        self.remote
    }

    fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    async fn read(&self) -> Result<Inbound> {
        let deadline = self.config.read_deadline();
        let payload = match &self.source {
            Source::Connected(socket) => {
                let capacity = self.config.read_buffer_size.min(MAX_DATAGRAM_SIZE);
                measured(
                    &self.stats.receive,
                    deadline,
                    async {
                        let mut buf = vec![0u8; capacity];
                        let n = socket.recv(&mut buf).await?;
                        buf.truncate(n);
                        Ok(Bytes::from(buf))
                    },
                    |payload| payload.len(),
                )
                .await?
            }
            Source::Demuxed { inbox, .. } => {
                let mut inbox = inbox.lock().await;
                measured(
                    &self.stats.receive,
                    deadline,
                    async { inbox.recv().await.ok_or(TransportError::Closed) },
                    |payload| payload.len(),
                )
                .await?
            }
        };
        Ok(Inbound {
            payload,
            remote: Some(self.remote),
            first: false,
        })
    }

    async fn write_by_conn(&self, payload: &[u8]) -> Result<()> {
        let deadline = self.config.write_deadline();
        measured(
            &self.stats.send,
            deadline,
            async {
                self.check_size(payload)?;
                match &self.source {
                    Source::Connected(socket) => socket.send(payload).await?,
                    Source::Demuxed { socket, .. } => socket.send_to(payload, self.remote).await?,
                };
                Ok(())
            },
            |_| payload.len(),
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        // Closing the inbox makes the endpoint treat the peer as unseen again.
        if let Source::Demuxed { inbox, .. } = &self.source {
            inbox.lock().await.close();
        }
        Ok(())
    }
}

/// Server-side UDP socket shared by many logical peers.
///
/// The first datagram from an unseen peer produces a new [`UdpTransport`]
/// from [`UdpEndpoint::accept`]; later datagrams from that peer are routed
/// to the existing transport's inbox.
pub struct UdpEndpoint {
    local: SocketAddr,
    accepted: Mutex<mpsc::Receiver<UdpTransport>>,
    peers: Arc<AtomicUsize>,
    demux: JoinHandle<()>,
}

impl UdpEndpoint {
    /// Bind and start demultiplexing.
    pub async fn bind(addr: SocketAddr, config: Arc<TransportConfig>) -> Result<Self> {
        Self::bind_with_inbox_depth(addr, config, DEFAULT_PEER_INBOX_DEPTH).await
    }

    /// Bind with an explicit per-peer inbox depth.
    pub async fn bind_with_inbox_depth(
        addr: SocketAddr,
        config: Arc<TransportConfig>,
        inbox_depth: usize,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local = socket.local_addr()?;
        info!(%local, "listening on udp");

        let (accepted_tx, accepted_rx) = mpsc::channel(inbox_depth.max(1));
        let peers = Arc::new(AtomicUsize::new(0));
        let demux = tokio::spawn(demux(
            Arc::new(socket),
            local,
            config,
            accepted_tx,
            inbox_depth.max(1),
            peers.clone(),
        ));
        Ok(Self {
            local,
            accepted: Mutex::new(accepted_rx),
            peers,
            demux,
        })
    }

    /// Wait for the next unseen peer.
    pub async fn accept(&self) -> Result<UdpTransport> {
        self.accepted
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Peers currently tracked by the demux table.
    pub fn peer_count(&self) -> usize {
        self.peers.load(Ordering::Acquire)
    }
}

impl Drop for UdpEndpoint {
    fn drop(&mut self) {
        self.demux.abort();
    }
}

async fn demux(
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    config: Arc<TransportConfig>,
    accepted: mpsc::Sender<UdpTransport>,
    inbox_depth: usize,
    tracked: Arc<AtomicUsize>,
) {
    let mut peers: HashMap<SocketAddr, mpsc::Sender<Bytes>> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                // ICMP errors from earlier sends surface here; the socket stays usable.
                warn!(%local, error = %err, "udp receive failed");
                continue;
            }
        };
        let mut datagram = Bytes::copy_from_slice(&buf[..n]);

        if let Some(inbox) = peers.get(&from) {
            match inbox.try_send(datagram) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => {
                    warn!(%from, "udp peer inbox full; dropping datagram");
                    continue;
                }
                Err(TrySendError::Closed(returned)) => datagram = returned,
            }
            debug!(%from, "udp peer inbox closed; treating peer as new");
            peers.remove(&from);
        }

        // Peers whose transport closed and never sent again are dropped here.
        peers.retain(|_, inbox| !inbox.is_closed());

        let (inbox_tx, inbox_rx) = mpsc::channel(inbox_depth);
        // Fresh channel with capacity >= 1 always has room.
        let _ = inbox_tx.try_send(datagram);
        peers.insert(from, inbox_tx);
        tracked.store(peers.len(), Ordering::Release);

        let transport = UdpTransport::demuxed(socket.clone(), local, from, inbox_rx, config.clone());
        if accepted.send(transport).await.is_err() {
            debug!(%local, "udp endpoint dropped; stopping demux");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_datagram_creates_transport_and_later_ones_are_routed() {
        let config = Arc::new(TransportConfig::default());
        let endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), config.clone())
            .await
            .unwrap();
        let addr = endpoint.local_addr();

        let a = UdpTransport::connect(addr, config.clone()).await.unwrap();
        let b = UdpTransport::connect(addr, config).await.unwrap();

        a.write_by_conn(b"a1").await.unwrap();
        let server_a = endpoint.accept().await.unwrap();
        assert_eq!(server_a.peer_addr().port(), a.local_addr().unwrap().port());
        assert_eq!(server_a.read().await.unwrap().payload.as_ref(), b"a1");

        b.write_by_conn(b"b1").await.unwrap();
        let server_b = endpoint.accept().await.unwrap();
        assert_ne!(server_a.id(), server_b.id());

        a.write_by_conn(b"a2").await.unwrap();
        let inbound = server_a.read().await.unwrap();
        assert_eq!(inbound.payload.as_ref(), b"a2");
        assert_eq!(inbound.remote.map(|r| r.port()), a.local_addr().map(|l| l.port()));
        assert_eq!(server_b.read().await.unwrap().payload.as_ref(), b"b1");
    }

    #[tokio::test]
    async fn server_side_reply_reaches_client() {
        let config = Arc::new(TransportConfig::default());
        let endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), config.clone())
            .await
            .unwrap();
        let client = UdpTransport::connect(endpoint.local_addr(), config)
            .await
            .unwrap();

        client.write_by_conn(b"ping").await.unwrap();
        let server = endpoint.accept().await.unwrap();
        server.write_by_conn(b"pong").await.unwrap();

        assert_eq!(client.read().await.unwrap().payload.as_ref(), b"pong");
        assert_eq!(server.stats().send.total_packets(), 1);
    }

    #[tokio::test]
    async fn closed_transport_is_replaced_on_next_datagram() {
        let config = Arc::new(TransportConfig::default());
        let endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), config.clone())
            .await
            .unwrap();
        let client = UdpTransport::connect(endpoint.local_addr(), config)
            .await
            .unwrap();

        client.write_by_conn(b"one").await.unwrap();
        let first = endpoint.accept().await.unwrap();
        first.close().await.unwrap();

        client.write_by_conn(b"two").await.unwrap();
        let second = endpoint.accept().await.unwrap();
        assert_eq!(second.read().await.unwrap().payload.as_ref(), b"two");
    }

    #[tokio::test]
    async fn oversized_datagram_counts_as_failed_send() {
        let config = Arc::new(TransportConfig::default());
        let endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), config.clone())
            .await
            .unwrap();
        let client = UdpTransport::connect(endpoint.local_addr(), config)
            .await
            .unwrap();

        let err = client
            .write_by_conn(&vec![0u8; MAX_DATAGRAM_SIZE + 1])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge { .. }));
        assert_eq!(client.stats().send.total_failures(), 1);
        assert_eq!(client.stats().send.consecutive_failures(), 1);
        assert_eq!(client.stats().send.total_packets(), 0);
    }

    #[tokio::test]
    async fn closed_peers_leave_the_demux_table() {
        let config = Arc::new(TransportConfig::default());
        let endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), config.clone())
            .await
            .unwrap();
        let addr = endpoint.local_addr();

        let gone = UdpTransport::connect(addr, config.clone()).await.unwrap();
        gone.write_by_conn(b"hello").await.unwrap();
        let first = endpoint.accept().await.unwrap();
        assert_eq!(endpoint.peer_count(), 1);
        first.close().await.unwrap();

        // The closed peer never sends again; the next new peer prunes it.
        let next = UdpTransport::connect(addr, config).await.unwrap();
        next.write_by_conn(b"hi").await.unwrap();
        let second = endpoint.accept().await.unwrap();
        assert_eq!(second.read().await.unwrap().payload.as_ref(), b"hi");
        assert_eq!(endpoint.peer_count(), 1);
    }
}
