//! Minimal TCP echo server: every accepted channel writes its reads back.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send 127.0.0.1:7701 --data hello --wait

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use unichan::channel::{ChannelListener, ChannelRegistry, Context, HandlerBundle, Packet, Registry};
use unichan::transport::TransportKind;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry: Arc<dyn Registry> = Arc::new(ChannelRegistry::new());
    let handlers = HandlerBundle::new(|packet: Packet| async move {
        eprintln!(
            "{}: {} bytes",
            packet.channel().id(),
            packet.payload().len()
        );
        packet.channel().write(&packet).await
    })
    .on_release(|channel| eprintln!("released {}", channel.id()));

    let listener = ChannelListener::bind(
        TransportKind::Tcp,
        "127.0.0.1:7701".parse()?,
        Context::default(),
        handlers,
        registry,
    )
    .await?;
    eprintln!("Listening on {}", listener.local_addr());

    let shutdown = CancellationToken::new();
    let interrupted = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        interrupted.cancel();
    });

    listener.serve(shutdown).await?;
    Ok(())
}
