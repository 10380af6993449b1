use std::fs;

use bytes::Bytes;
use tokio::sync::mpsc;
use unichan_channel::{connect_with_path, send_frame, Channel, HandlerBundle, Packet};
use unichan_frame::{Frame, Opcode};
use unichan_transport::TransportKind;

use crate::cmd::{build_context, parse_duration, SendArgs};
use crate::exit::{channel_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_message, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;
    if payload.is_empty() {
        return Err(CliError::new(
            USAGE,
            "payload must not be empty (use --data, --json or --file)",
        ));
    }
    let ctx = build_context(&args.transport_opts, None)?;
    let kind = args.transport;

    let (echoes_tx, mut echoes) = mpsc::unbounded_channel::<Bytes>();
    let handlers = HandlerBundle::new(move |packet: Packet| {
        let echoes_tx = echoes_tx.clone();
        async move {
            let payload = if kind == TransportKind::Kcp {
                packet.decode_frame()?.payload
            } else {
                packet.into_payload()
            };
            let _ = echoes_tx.send(payload);
            Ok(())
        }
    });

    let channel = connect_with_path(kind, args.addr, &args.ws_path, &ctx, handlers)
        .await
        .map_err(|err| channel_error("connect failed", err))?;

    if kind == TransportKind::Kcp {
        send_frame(
            &channel,
            &Frame::text_frame(Opcode::Session, &args.session_token),
        )
        .await
        .map_err(|err| channel_error("registration failed", err))?;
    }

    for _ in 0..args.count {
        send_payload(&channel, kind, &payload)
            .await
            .map_err(|err| channel_error("send failed", err))?;
    }

    if args.wait {
        // Stream transports may split or merge echoes, so count bytes.
        let expected = payload.len() * args.count;
        let deadline = tokio::time::Instant::now() + wait_timeout;
        let mut received = 0usize;
        while received < expected {
            match tokio::time::timeout_at(deadline, echoes.recv()).await {
                Ok(Some(echo)) => {
                    received += echo.len();
                    print_message(channel.id(), &echo, format);
                }
                Ok(None) => break,
                Err(_) => {
                    channel.stop().await;
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("timed out after {wait_timeout:?} waiting for echo"),
                    ));
                }
            }
        }
    }

    channel.stop().await;
    Ok(SUCCESS)
}

async fn send_payload(
    channel: &Channel,
    kind: TransportKind,
    payload: &Bytes,
) -> unichan_channel::Result<()> {
    if kind == TransportKind::Kcp {
        send_frame(channel, &Frame::signalling(payload.clone())).await
    } else {
        channel.send(payload.clone()).await
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Bytes> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Bytes::copy_from_slice(json.as_bytes()));
    }
    if let Some(data) = &args.data {
        return Ok(Bytes::copy_from_slice(data.as_bytes()));
    }
    if let Some(path) = &args.file {
        return fs::read(path).map(Bytes::from).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Bytes::new())
}
