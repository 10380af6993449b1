//! Binary session frame codec.
//!
//! Frames carry the session protocol (registration, signalling, keepalive,
//! teardown) over the reliable-UDP transport. Every frame is:
//! - A 2-byte big-endian protocol version
//! - A 2-byte big-endian opcode
//! - A 4-byte big-endian payload length, followed by the payload
//! - An optional 7-byte origin trailer (address family, IPv4 address, port)
//!
//! Decoding is stateless and works on one complete datagram at a time.

pub mod codec;
pub mod error;
pub mod opcode;

pub use codec::{
    decode_frame, encode_frame, peek_opcode, Frame, Origin, HEADER_SIZE, ORIGIN_FAMILY_IPV4,
    PROTOCOL_VERSION, TRAILER_SIZE,
};
pub use error::{FrameError, Result};
pub use opcode::{opcode_name, Opcode, CLOSE, PING, PONG, SESSION, SIGNALLING};
