//! Channel core for unichan.
//!
//! A [`Channel`] drives any [`unichan_transport::Transport`] through one
//! lifecycle: start, a read loop that hands packets to the message handler
//! (inline or through a [`ReadPool`]), writes, and an idempotent stop.
//! Failures of every kind funnel through the bundle's error hook.
//!
//! On top of that:
//! - [`session`] runs the SESSION/CLOSE registration protocol for KCP
//! - [`ChannelListener`] and [`connect`] wire transports into channels
//! - [`ChannelRegistry`] tracks accepted channels until they are released

pub mod channel;
pub mod connector;
pub mod context;
pub mod error;
pub mod handler;
pub mod listener;
pub mod packet;
pub mod pool;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::Channel;
pub use connector::{connect, connect_with_path, DEFAULT_WS_PATH};
pub use context::Context;
pub use error::{BoxError, ChannelError, ErrorKind, Result};
pub use handler::{BoxFuture, HandlerBundle};
pub use listener::ChannelListener;
pub use packet::Packet;
pub use pool::{PoolConfig, ReadPool, DEFAULT_QUEUE_DEPTH};
pub use registry::{attach, ChannelRegistry, Registry};
pub use session::send_frame;
