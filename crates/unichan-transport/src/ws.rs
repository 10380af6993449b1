use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::stats::Statistics;
use crate::traits::{endpoint_id, measured, Inbound, Transport, TransportKind};

type WsStream = WebSocketStream<TcpStream>;

/// WebSocket adapter. Each read returns one binary or text message.
///
/// The transport is already message-framed, so any read error is fatal:
/// a partial message cannot be resumed.
pub struct WsTransport {
    id: String,
    local: SocketAddr,
    remote: SocketAddr,
    reader: Mutex<SplitStream<WsStream>>,
    writer: Mutex<SplitSink<WsStream, Message>>,
    config: Arc<TransportConfig>,
    stats: Arc<Statistics>,
}

impl WsTransport {
    /// Run the server-side upgrade handshake on an accepted TCP stream.
    pub async fn accept(stream: TcpStream, config: Arc<TransportConfig>) -> Result<Self> {
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        let ws = tokio::time::timeout_at(
            config.read_deadline(),
            tokio_tungstenite::accept_async(stream),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.read_timeout))??;
        debug!(%remote, "accepted websocket upgrade");
        Ok(Self::from_parts(ws, local, remote, config))
    }

    /// Dial `addr` and run the client-side upgrade handshake for `path`.
    pub async fn connect(
        addr: SocketAddr,
        path: &str,
        config: Arc<TransportConfig>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        stream.set_nodelay(true)?;
        let local = stream.local_addr()?;
        let url = format!("ws://{addr}{path}");
        let (ws, _response) = tokio::time::timeout_at(
            config.write_deadline(),
            tokio_tungstenite::client_async(url, stream),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.write_timeout))??;
        debug!(%addr, path, "connected websocket");
        Ok(Self::from_parts(ws, local, addr, config))
    }

    fn from_parts(
        ws: WsStream,
        local: SocketAddr,
        remote: SocketAddr,
        config: Arc<TransportConfig>,
    ) -> Self {
        let (writer, reader) = ws.split();
        Self {
            id: endpoint_id(TransportKind::Ws, Some(local), remote, None),
            local,
            remote,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            config,
            stats: Arc::new(Statistics::default()),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ws
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
        let payload = measured(
            &self.stats.receive,
            deadline,
            async {
                loop {
                    let message = match reader.next().await {
                        Some(message) => message?,
                        None => return Err(TransportError::Closed),
                    };
                    match message {
                        Message::Binary(_) | Message::Text(_) => {
                            return Ok(Bytes::from(message.into_data()));
                        }
                        Message::Close(frame) => {
                            debug!(?frame, "websocket close frame received");
                            return Err(TransportError::Closed);
                        }
                        // Control frames are answered by the protocol layer.
                        other => trace!(?other, "skipping websocket control message"),
                    }
                }
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
                writer.send(Message::binary(payload.to_vec())).await?;
                Ok(())
            },
            |_| payload.len(),
        )
        .await
    }

    fn is_read_loop_continued(
        &self,
        _err: &TransportError,
        _consecutive_failures: u64,
        _threshold: u64,
    ) -> bool {
        false
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.close().await {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = TransportError::from(err);
                if err.is_closed() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }
}
