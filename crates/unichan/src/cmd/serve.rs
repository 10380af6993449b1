use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use unichan_channel::{
    send_frame, Channel, ChannelListener, ChannelRegistry, HandlerBundle, Packet, Registry,
    Result,
};
use unichan_frame::{Frame, Opcode};
use unichan_transport::TransportKind;

use crate::cmd::{build_context, ServeArgs};
use crate::exit::{channel_error, CliResult, SUCCESS};
use crate::output::{print_report, ChannelReport, OutputFormat};

#[derive(Serialize)]
struct ListeningOutput<'a> {
    event: &'static str,
    transport: TransportKind,
    addr: String,
    listener: &'a str,
}

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let ctx = build_context(&args.transport_opts, Some(&args.pool))?;
    let registry = Arc::new(ChannelRegistry::new());
    let shutdown = CancellationToken::new();

    let template = echo_handlers(format, args.exit_after, shutdown.clone());
    let listener = ChannelListener::bind(
        args.transport,
        args.addr,
        ctx.clone(),
        template,
        registry.clone() as Arc<dyn Registry>,
    )
    .await
    .map_err(|err| channel_error("bind failed", err))?;

    print_listening(&listener, format);

    let interrupted = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            interrupted.cancel();
        }
    });

    listener
        .serve(shutdown)
        .await
        .map_err(|err| channel_error("serve failed", err))?;

    registry.stop_all().await;
    if let Some(pool) = ctx.pool() {
        pool.shutdown();
    }
    Ok(SUCCESS)
}

fn echo_handlers(
    format: OutputFormat,
    exit_after: Option<usize>,
    shutdown: CancellationToken,
) -> HandlerBundle {
    let released = Arc::new(AtomicUsize::new(0));
    HandlerBundle::new(echo)
        .on_register(|channel: Channel, frame: Frame| async move {
            info!(
                channel = %channel.id(),
                token = frame.text().unwrap_or("<binary>"),
                "session registered"
            );
            Ok(())
        })
        .on_unregister(|channel, _| info!(channel = %channel.id(), "session closed by peer"))
        .on_release(move |channel| {
            let report = ChannelReport {
                channel: channel.id(),
                kind: channel.kind(),
                server_side: channel.is_server_side(),
                stats: channel.stats().snapshot(),
            };
            print_report(&report, format);

            let total = released.fetch_add(1, Ordering::SeqCst) + 1;
            if exit_after.is_some_and(|limit| total >= limit) {
                shutdown.cancel();
            }
        })
}

/// Write every message back; over kcp, answer PING with PONG.
async fn echo(packet: Packet) -> Result<()> {
    if packet.kind() == TransportKind::Kcp {
        let frame = packet.decode_frame()?;
        if frame.opcode == Opcode::Ping {
            return send_frame(packet.channel(), &Frame::pong_for(&frame)).await;
        }
    }
    packet.channel().write(&packet).await
}

fn print_listening(listener: &ChannelListener, format: OutputFormat) {
    let out = ListeningOutput {
        event: "listening",
        transport: listener.kind(),
        addr: listener.local_addr().to_string(),
        listener: listener.id(),
    };
    match format {
        OutputFormat::Pretty | OutputFormat::Table => {
            println!("listening transport={} addr={}", out.transport, out.addr);
        }
        OutputFormat::Json | OutputFormat::Raw => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
    }
}
