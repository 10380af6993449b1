//! Session protocol over the reliable-UDP transport.
//!
//! Wraps a handler bundle so that every inbound packet is decoded as a
//! [`Frame`] and routed by opcode:
//! - the first SESSION frame of an inactive channel runs `on_register`;
//!   success marks the channel active, failure stops it
//! - CLOSE runs `on_unregister` and clears the active flag
//! - everything else (including later SESSION frames) reaches the
//!   application's message handler, whether or not the channel is active

use std::sync::Arc;

use tracing::debug;
use unichan_frame::{Frame, Opcode};

use crate::error::{ChannelError, Result};
use crate::handler::{BoxFuture, HandlerBundle, ReadFn, RegisterFn, UnregisterFn};
use crate::packet::Packet;

/// Layer session routing over `handlers`.
pub fn wrap(handlers: HandlerBundle) -> HandlerBundle {
    let app = handlers.read.clone();
    let register = handlers.register.clone();
    let unregister = handlers.unregister.clone();

    let read: Arc<ReadFn> = Arc::new(move |packet: Packet| -> BoxFuture<Result<()>> {
        Box::pin(route(
            packet,
            app.clone(),
            register.clone(),
            unregister.clone(),
        ))
    });
    handlers.with_read(read)
}

async fn route(
    packet: Packet,
    app: Arc<ReadFn>,
    register: Option<Arc<RegisterFn>>,
    unregister: Option<Arc<UnregisterFn>>,
) -> Result<()> {
    let frame = packet.decode_frame()?;
    let channel = packet.channel().clone();

    match frame.opcode {
        Opcode::Session if !channel.is_active() => {
            if let Some(register) = register {
                register(channel.clone(), frame)
                    .await
                    .map_err(ChannelError::registration)?;
            }
            channel.set_active(true);
            debug!(channel = %channel.id(), "session registered");
            Ok(())
        }
        Opcode::Close => {
            if let Some(unregister) = unregister {
                unregister(&channel, &frame);
            }
            channel.set_active(false);
            debug!(channel = %channel.id(), "session unregistered");
            Ok(())
        }
        _ => app(packet).await,
    }
}

/// Encode and send `frame` on `channel`.
pub async fn send_frame(channel: &crate::channel::Channel, frame: &Frame) -> Result<()> {
    channel.send(frame.encode()?).await
}
