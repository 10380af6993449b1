use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use unichan_transport::{
    KcpAcceptor, TcpTransport, Transport, TransportError, TransportKind, UdpEndpoint, WsTransport,
};

use crate::channel::Channel;
use crate::context::Context;
use crate::error::{ChannelError, Result};
use crate::handler::HandlerBundle;
use crate::registry::{attach, Registry};
use crate::session;

enum Acceptor {
    Tcp(TcpListener),
    Ws(TcpListener),
    Udp(UdpEndpoint),
    Kcp(KcpAcceptor),
}

/// A connection taken off the acceptor that may still need a handshake.
enum Pending {
    Ready(Arc<dyn Transport>),
    WsUpgrade(TcpStream),
}

/// Everything needed to turn a transport into a registered, started channel.
/// Cloned into per-connection tasks by [`ChannelListener::serve`].
#[derive(Clone)]
struct Admission {
    id: Arc<str>,
    kind: TransportKind,
    ctx: Context,
    template: HandlerBundle,
    registry: Arc<dyn Registry>,
}

impl Admission {
    async fn complete(&self, pending: Pending) -> Result<Channel> {
        let transport: Arc<dyn Transport> = match pending {
            Pending::Ready(transport) => transport,
            Pending::WsUpgrade(stream) => {
                Arc::new(WsTransport::accept(stream, self.ctx.transport().clone()).await?)
            }
        };

        let mut handlers = attach(&self.template, &self.registry);
        if self.kind == TransportKind::Kcp {
            handlers = session::wrap(handlers);
        }
        let channel = Channel::accepted(transport, &self.ctx, handlers, &*self.id);
        self.registry.add(channel.clone());
        channel.start().await?;
        debug!(listener = %self.id, channel = %channel.id(), "accepted channel");
        Ok(channel)
    }
}

/// Accepts connections of one transport kind and turns each into a started
/// [`Channel`].
///
/// Every accepted channel gets its own clone of the template handlers,
/// is added to the registry, and removes itself from it on release.
pub struct ChannelListener {
    local: SocketAddr,
    acceptor: Acceptor,
    admission: Admission,
}

impl ChannelListener {
    /// Bind a listener for `kind` on `addr`.
    pub async fn bind(
        kind: TransportKind,
        addr: SocketAddr,
        ctx: Context,
        template: HandlerBundle,
        registry: Arc<dyn Registry>,
    ) -> Result<Self> {
        let config = ctx.transport().clone();
        let (acceptor, local) = match kind {
            TransportKind::Tcp | TransportKind::Ws => {
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|source| TransportError::Bind { addr, source })?;
                let local = listener.local_addr().map_err(TransportError::from)?;
                info!(%local, %kind, "listening");
                let acceptor = if kind == TransportKind::Tcp {
                    Acceptor::Tcp(listener)
                } else {
                    Acceptor::Ws(listener)
                };
                (acceptor, local)
            }
            TransportKind::Udp => {
                let endpoint = UdpEndpoint::bind(addr, config).await?;
                let local = endpoint.local_addr();
                (Acceptor::Udp(endpoint), local)
            }
            TransportKind::Kcp => {
                let acceptor = KcpAcceptor::bind(addr, config).await?;
                let local = acceptor.local_addr();
                (Acceptor::Kcp(acceptor), local)
            }
        };

        Ok(Self {
            local,
            acceptor,
            admission: Admission {
                id: format!("{kind}-listener:{local}").into(),
                kind,
                ctx,
                template,
                registry,
            },
        })
    }

    pub fn id(&self) -> &str {
        &self.admission.id
    }

    pub fn kind(&self) -> TransportKind {
        self.admission.kind
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.admission.registry
    }

    async fn next_pending(&self) -> Result<Pending> {
        let config = self.admission.ctx.transport().clone();
        let pending = match &self.acceptor {
            Acceptor::Tcp(listener) => {
                let (stream, _) = listener.accept().await.map_err(TransportError::Accept)?;
                Pending::Ready(Arc::new(TcpTransport::new(stream, config)?))
            }
            Acceptor::Ws(listener) => {
                let (stream, _) = listener.accept().await.map_err(TransportError::Accept)?;
                Pending::WsUpgrade(stream)
            }
            Acceptor::Udp(endpoint) => Pending::Ready(Arc::new(endpoint.accept().await?)),
            Acceptor::Kcp(acceptor) => Pending::Ready(Arc::new(acceptor.accept().await?)),
        };
        Ok(pending)
    }

    /// Wait for the next connection, register it and start it.
    ///
    /// WebSocket upgrades complete inline here; [`serve`](Self::serve) runs
    /// them off the accept path.
    pub async fn accept(&self) -> Result<Channel> {
        let pending = self.next_pending().await?;
        self.admission.complete(pending).await
    }

    /// Accept until `shutdown` fires, then stop accepting.
    ///
    /// Upgrade handshakes run in their own tasks so a stalled client cannot
    /// hold up other connections. Per-connection failures (a failed upgrade,
    /// a start hook error) are logged and skipped.
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<()> {
        loop {
            let pending = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                pending = self.next_pending() => pending,
            };
            match pending {
                Ok(upgrade @ Pending::WsUpgrade(_)) => {
                    let admission = self.admission.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            admitted = admission.complete(upgrade) => {
                                if let Err(err) = admitted {
                                    warn!(listener = %admission.id, error = %err, "accept failed");
                                }
                            }
                        }
                    });
                }
                Ok(ready) => {
                    if let Err(err) = self.admission.complete(ready).await {
                        warn!(listener = %self.admission.id, error = %err, "accept failed");
                    }
                }
                Err(ChannelError::Transport(TransportError::Closed)) => {
                    return Err(TransportError::Closed.into());
                }
                Err(err) => warn!(listener = %self.admission.id, error = %err, "accept failed"),
            }
        }
        info!(listener = %self.admission.id, "listener stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connector::connect;
    use crate::packet::Packet;
    use crate::registry::ChannelRegistry;
    use crate::testing::eventually;

    fn echo() -> HandlerBundle {
        HandlerBundle::new(|packet: Packet| async move { packet.channel().write(&packet).await })
    }

    async fn listener(kind: TransportKind, registry: Arc<dyn Registry>) -> ChannelListener {
        ChannelListener::bind(
            kind,
            "127.0.0.1:0".parse().expect("addr"),
            Context::default(),
            echo(),
            registry,
        )
        .await
        .expect("listener should bind")
    }

    #[tokio::test]
    async fn accepted_tcp_channel_is_registered_until_release() {
        let registry: Arc<dyn Registry> = Arc::new(ChannelRegistry::new());
        let listener = listener(TransportKind::Tcp, registry.clone()).await;

        let client_ctx = Context::default();
        let client_handlers = HandlerBundle::new(|_packet: Packet| async { Ok(()) });
        let (client, server) = tokio::join!(
            connect(
                TransportKind::Tcp,
                listener.local_addr(),
                &client_ctx,
                client_handlers
            ),
            listener.accept()
        );
        let client = client.expect("client should connect");
        let server = server.expect("server should accept");

        assert!(server.is_server_side());
        assert_eq!(server.parent(), Some(listener.id()));
        assert_eq!(registry.len(), 1);

        client.stop().await;
        eventually(|| registry.is_empty()).await;
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn serve_echoes_until_shutdown() {
        let registry: Arc<dyn Registry> = Arc::new(ChannelRegistry::new());
        let listener = Arc::new(listener(TransportKind::Ws, registry).await);
        let shutdown = CancellationToken::new();
        let server = {
            let listener = listener.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { listener.serve(shutdown).await })
        };

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let client_handlers = HandlerBundle::new(move |packet: Packet| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(packet.into_payload());
                Ok(())
            }
        });
        let client = connect(
            TransportKind::Ws,
            listener.local_addr(),
            &Context::default(),
            client_handlers,
        )
        .await
        .expect("client should connect");
        client.send("echo me").await.expect("send");

        let echoed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("echo should arrive")
            .expect("channel open");
        assert_eq!(echoed.as_ref(), b"echo me");

        shutdown.cancel();
        server
            .await
            .expect("serve task should join")
            .expect("serve should end cleanly");
        client.stop().await;
    }

    #[tokio::test]
    async fn stalled_upgrade_does_not_block_other_clients() {
        let registry: Arc<dyn Registry> = Arc::new(ChannelRegistry::new());
        let listener = Arc::new(listener(TransportKind::Ws, registry.clone()).await);
        let shutdown = CancellationToken::new();
        let server = {
            let listener = listener.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { listener.serve(shutdown).await })
        };

        // Connects but never sends the upgrade request.
        let _silent = TcpStream::connect(listener.local_addr())
            .await
            .expect("raw tcp connect should succeed");

        let client_ctx = Context::default();
        let client = tokio::time::timeout(
            Duration::from_secs(2),
            connect(
                TransportKind::Ws,
                listener.local_addr(),
                &client_ctx,
                HandlerBundle::new(|_packet: Packet| async { Ok(()) }),
            ),
        )
        .await
        .expect("upgrade should not wait behind the silent client")
        .expect("client should connect");
        eventually(|| registry.len() == 1).await;

        shutdown.cancel();
        server
            .await
            .expect("serve task should join")
            .expect("serve should end cleanly");
        client.stop().await;
    }
}
