use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::stats::Statistics;
use crate::traits::{endpoint_id, measured, Inbound, Transport, TransportKind};

/// TCP stream adapter.
///
/// Each read returns whatever one socket read produced, up to
/// `read_buffer_size` bytes. No message framing is applied.
pub struct TcpTransport {
    id: String,
    local: SocketAddr,
    remote: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    config: Arc<TransportConfig>,
    stats: Arc<Statistics>,
}

impl TcpTransport {
    /// Wrap an established stream, applying socket buffer sizes from `config`.
    pub fn new(stream: TcpStream, config: Arc<TransportConfig>) -> Result<Self> {
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;

        let sock = socket2::SockRef::from(&stream);
        sock.set_recv_buffer_size(config.read_buffer_size)?;
        sock.set_send_buffer_size(config.write_buffer_size)?;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        Ok(Self {
            id: endpoint_id(TransportKind::Tcp, Some(local), remote, None),
            local,
            remote,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            config,
            stats: Arc::new(Statistics::default()),
        })
    }

    /// Dial `addr`.
    pub async fn connect(addr: SocketAddr, config: Arc<TransportConfig>) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        debug!(%addr, "connected tcp stream");
        Self::new(stream, config)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
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
        let mut reader = self.reader.lock().await;
        let capacity = self.config.read_buffer_size;
        let payload = measured(
            &self.stats.receive,
            deadline,
            async {
                let mut buf = BytesMut::with_capacity(capacity);
                let n = reader.read_buf(&mut buf).await?;
                if n == 0 {
                    return Err(TransportError::Closed);
                }
                Ok(buf.freeze())
            },
            |payload| payload.len(),
        )
        .await?;
        Ok(Inbound::new(payload))
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
