use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_kcp::{KcpConfig, KcpListener, KcpNoDelayConfig, KcpStream};
use tracing::{debug, info};

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::stats::Statistics;
use crate::traits::{endpoint_id, measured, Inbound, Transport, TransportKind};

/// KCP settings tuned for latency: no-delay mode, fast resend, no
/// congestion window and immediate flush of writes and acks.
pub fn low_latency_config() -> KcpConfig {
    KcpConfig {
        nodelay: KcpNoDelayConfig::fastest(),
        flush_write: true,
        flush_acks_input: true,
        stream: false,
        ..KcpConfig::default()
    }
}

/// Reliable-UDP adapter over a KCP session.
///
/// Each read returns one KCP message. The first successful read is flagged
/// in [`Inbound::first`] so the channel core can treat it as the connect
/// event. The identity includes the session id.
pub struct KcpTransport {
    id: String,
    session: u32,
    local: Option<SocketAddr>,
    remote: SocketAddr,
    reader: Mutex<ReadHalf<KcpStream>>,
    writer: Mutex<WriteHalf<KcpStream>>,
    seen_first_read: AtomicBool,
    config: Arc<TransportConfig>,
    stats: Arc<Statistics>,
}

impl KcpTransport {
    /// Open a session to `addr` with a random conversation id.
    pub async fn connect(addr: SocketAddr, config: Arc<TransportConfig>) -> Result<Self> {
        let conv: u32 = rand::random();
        let stream = KcpStream::connect_with_conv(&low_latency_config(), conv, addr)
            .await
            .map_err(|err| TransportError::Kcp(err.to_string()))?;
        debug!(%addr, conv, "opened kcp session");
        Ok(Self::new(stream, None, addr, conv, config))
    }

    /// Wrap an established session.
    pub fn new(
        stream: KcpStream,
        local: Option<SocketAddr>,
        remote: SocketAddr,
        session: u32,
        config: Arc<TransportConfig>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            id: endpoint_id(TransportKind::Kcp, local, remote, Some(session)),
            session,
            local,
            remote,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            seen_first_read: AtomicBool::new(false),
            config,
            stats: Arc::new(Statistics::default()),
        }
    }

    /// Session id included in the identity.
    pub fn session(&self) -> u32 {
        self.session
    }
}

#[async_trait]
impl Transport for KcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Kcp
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn peer_addr(&self) -> SocketAddr {
        self.remote
    }

    fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    async fn read(&self) -> Result<Inbound> {
        let deadline = self.config.read_deadline();
        let mut reader = self.reader.lock().await;
        let capacity = self.config.read_buffer_size;
        let payload = measured(
            &self.stats.receive,
            deadline,
            async {
                let mut buf = vec![0u8; capacity];
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    return Err(TransportError::Closed);
                }
                buf.truncate(n);
                Ok(Bytes::from(buf))
            },
            |payload| payload.len(),
        )
        .await?;
        let first = !self.seen_first_read.swap(true, Ordering::AcqRel);
        Ok(Inbound {
            payload,
            remote: Some(self.remote),
            first,
        })
    }

    async fn write_by_conn(&self, payload: &[u8]) -> Result<()> {
        let deadline = self.config.write_deadline();
        let mut writer = self.writer.lock().await;
        measured(
            &self.stats.send,
            deadline,
            async {
                writer.write_all(payload).await?;
                writer.flush().await?;
                Ok(())
            },
            |_| payload.len(),
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Server side of the KCP transport.
///
/// Accepted sessions get a listener-local session id for their identity.
pub struct KcpAcceptor {
    listener: Mutex<KcpListener>,
    local: SocketAddr,
    next_session: AtomicU32,
    config: Arc<TransportConfig>,
}

impl KcpAcceptor {
    pub async fn bind(addr: SocketAddr, config: Arc<TransportConfig>) -> Result<Self> {
        let listener = KcpListener::bind(low_latency_config(), addr)
            .await
            .map_err(|err| TransportError::Kcp(err.to_string()))?;
        let local = listener
            .local_addr()
            .map_err(|err| TransportError::Kcp(err.to_string()))?;
        info!(%local, "listening on kcp");
        Ok(Self {
            listener: Mutex::new(listener),
            local,
            next_session: AtomicU32::new(1),
            config,
        })
    }

    /// Wait for the next session.
    pub async fn accept(&self) -> Result<KcpTransport> {
        let (stream, remote) = self
            .listener
            .lock()
            .await
            .accept()
            .await
            .map_err(|err| TransportError::Kcp(err.to_string()))?;
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        debug!(%remote, session, "accepted kcp session");
        Ok(KcpTransport::new(
            stream,
            Some(self.local),
            remote,
            session,
            self.config.clone(),
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}
