//! Transport abstraction for unichan channels.
//!
//! Provides one raw-byte contract, [`Transport`], over several socket kinds:
//! - TCP streams
//! - UDP datagrams (one server socket shared by many peers)
//! - WebSocket messages
//! - KCP reliable-UDP sessions
//!
//! This is the lowest networking layer. The channel core drives an adapter
//! through the trait and never sees the socket type.

pub mod config;
pub mod error;
pub mod kcp;
pub mod stats;
pub mod tcp;
pub mod traits;
pub mod udp;
pub mod ws;

pub use config::TransportConfig;
pub use error::{Result, TransportError};
pub use kcp::{KcpAcceptor, KcpTransport};
pub use stats::{Counter, CounterSnapshot, Operation, Statistics, StatisticsSnapshot};
pub use tcp::TcpTransport;
pub use traits::{endpoint_id, Inbound, Transport, TransportKind};
pub use udp::{UdpEndpoint, UdpTransport};
pub use ws::WsTransport;
