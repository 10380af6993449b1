//! End-to-end loopback over every transport kind with default configuration.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use unichan_channel::{
    connect, send_frame, Channel, ChannelListener, ChannelRegistry, Context, HandlerBundle,
    Packet, PoolConfig, Registry,
};
use unichan_frame::Frame;
use unichan_transport::TransportKind;

const COUNT: u32 = 100;

/// Decode big-endian u32 values, reassembling across stream chunks.
fn receiver(kind: TransportKind, values: mpsc::UnboundedSender<u32>) -> HandlerBundle {
    let pending = Arc::new(Mutex::new(BytesMut::new()));
    HandlerBundle::new(move |packet: Packet| {
        let values = values.clone();
        let pending = pending.clone();
        async move {
            let bytes = if kind == TransportKind::Kcp {
                packet.decode_frame()?.payload
            } else {
                packet.into_payload()
            };
            let mut pending = pending.lock().expect("pending lock");
            pending.extend_from_slice(&bytes);
            while pending.len() >= 4 {
                let raw = pending.split_to(4);
                let value = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
                let _ = values.send(value);
            }
            Ok(())
        }
    })
}

struct Server {
    listener: Arc<ChannelListener>,
    registry: Arc<ChannelRegistry>,
    shutdown: CancellationToken,
}

impl Server {
    async fn start(kind: TransportKind, values: mpsc::UnboundedSender<u32>) -> Self {
        let registry = Arc::new(ChannelRegistry::new());
        let ctx = Context::default().with_pool_config(PoolConfig::default());
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
        let listener = ChannelListener::bind(
            kind,
            addr,
            ctx,
            receiver(kind, values),
            registry.clone() as Arc<dyn Registry>,
        )
        .await
        .expect("listener should bind");
        let listener = Arc::new(listener);
        let shutdown = CancellationToken::new();
        {
            let listener = listener.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { listener.serve(shutdown).await });
        }
        Self {
            listener,
            registry,
            shutdown,
        }
    }
}

async fn dial(kind: TransportKind, addr: SocketAddr) -> Channel {
    let handlers = HandlerBundle::new(|_packet: Packet| async { Ok(()) });
    connect(kind, addr, &Context::default(), handlers)
        .await
        .expect("client should connect")
}

async fn send_sequence(kind: TransportKind, client: &Channel) {
    for value in 0..COUNT {
        let payload = value.to_be_bytes().to_vec();
        if kind == TransportKind::Kcp {
            send_frame(client, &Frame::signalling(payload))
                .await
                .expect("frame should send");
        } else {
            client.send(payload).await.expect("payload should send");
        }
    }
}

async fn collect(values: &mut mpsc::UnboundedReceiver<u32>) -> Vec<u32> {
    let mut seen = Vec::with_capacity(COUNT as usize);
    tokio::time::timeout(Duration::from_secs(10), async {
        while seen.len() < COUNT as usize {
            match values.recv().await {
                Some(value) => seen.push(value),
                None => break,
            }
        }
    })
    .await
    .expect("all values should arrive");
    seen
}

async fn run_loopback(kind: TransportKind) -> Server {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = Server::start(kind, tx).await;
    let client = dial(kind, server.listener.local_addr()).await;

    if kind == TransportKind::Kcp {
        send_frame(&client, &Frame::session("loopback"))
            .await
            .expect("registration should send");
    }
    send_sequence(kind, &client).await;

    let seen = collect(&mut rx).await;
    assert_eq!(seen, (0..COUNT).collect::<Vec<_>>(), "{kind} lost or reordered values");
    assert_eq!(client.stats().send.total_failures(), 0);

    client.stop().await;
    server
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tcp_loopback_delivers_in_order() {
    let server = run_loopback(TransportKind::Tcp).await;
    server.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn udp_loopback_delivers_in_order() {
    let server = run_loopback(TransportKind::Udp).await;
    assert_eq!(server.registry.len(), 1);
    server.shutdown.cancel();
    server.registry.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ws_loopback_delivers_in_order() {
    let server = run_loopback(TransportKind::Ws).await;
    server.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn kcp_loopback_registers_and_delivers_in_order() {
    let server = run_loopback(TransportKind::Kcp).await;

    let ids = server.registry.ids();
    assert_eq!(ids.len(), 1);
    let channel = server.registry.get(&ids[0]).expect("server channel");
    assert!(channel.is_active(), "SESSION frame should register the channel");
    assert!(channel.id().contains('#'));

    server.shutdown.cancel();
    server.registry.stop_all().await;
}
