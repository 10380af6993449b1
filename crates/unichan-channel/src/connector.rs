use std::net::SocketAddr;
use std::sync::Arc;

use unichan_transport::{
    KcpTransport, TcpTransport, Transport, TransportKind, UdpTransport, WsTransport,
};

use crate::channel::Channel;
use crate::context::Context;
use crate::error::Result;
use crate::handler::HandlerBundle;
use crate::session;

/// Upgrade path used when dialing a WebSocket server.
pub const DEFAULT_WS_PATH: &str = "/";

/// Dial `addr` over `kind` and start a client channel.
///
/// KCP channels run the session protocol, so `handlers` is wrapped with
/// [`session::wrap`].
pub async fn connect(
    kind: TransportKind,
    addr: SocketAddr,
    ctx: &Context,
    handlers: HandlerBundle,
) -> Result<Channel> {
    connect_with_path(kind, addr, DEFAULT_WS_PATH, ctx, handlers).await
}

/// Like [`connect`], with an explicit WebSocket upgrade path.
pub async fn connect_with_path(
    kind: TransportKind,
    addr: SocketAddr,
    ws_path: &str,
    ctx: &Context,
    handlers: HandlerBundle,
) -> Result<Channel> {
    let config = ctx.transport().clone();
    let (transport, handlers): (Arc<dyn Transport>, HandlerBundle) = match kind {
        TransportKind::Tcp => (Arc::new(TcpTransport::connect(addr, config).await?), handlers),
        TransportKind::Udp => (Arc::new(UdpTransport::connect(addr, config).await?), handlers),
        TransportKind::Ws => (
            Arc::new(WsTransport::connect(addr, ws_path, config).await?),
            handlers,
        ),
        TransportKind::Kcp => (
            Arc::new(KcpTransport::connect(addr, config).await?),
            session::wrap(handlers),
        ),
    };

    let channel = Channel::new(transport, ctx, handlers);
    channel.start().await?;
    Ok(channel)
}
