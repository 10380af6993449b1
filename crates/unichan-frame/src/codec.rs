use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::opcode::Opcode;

/// Frame header: version (2) + opcode (2) + payload length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Origin trailer: address family (1) + IPv4 address (4) + port (2) = 7 bytes.
pub const TRAILER_SIZE: usize = 7;

/// Protocol version written by [`Frame::new`].
pub const PROTOCOL_VERSION: u16 = 1;

/// Address family flag for an IPv4 origin trailer.
pub const ORIGIN_FAMILY_IPV4: i8 = 4;

/// Byte range of the opcode field inside the header.
const OPCODE_RANGE: std::ops::Range<usize> = 2..4;

/// Public address of the sender as observed by the remote end.
///
/// Carried in-band so the application can reconcile a peer across NAT
/// rebinding on the UDP-based transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub family: i8,
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Origin {
    /// Build an IPv4 origin from a socket address. IPv6 addresses do not fit
    /// the 4-byte trailer and yield `None`.
    pub fn from_socket_addr(addr: SocketAddr) -> Option<Self> {
        match addr {
            SocketAddr::V4(v4) => Some(Self {
                family: ORIGIN_FAMILY_IPV4,
                addr: *v4.ip(),
                port: v4.port(),
            }),
            SocketAddr::V6(_) => None,
        }
    }

    /// The trailer as a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        if self.family != ORIGIN_FAMILY_IPV4 {
            return Err(FrameError::UnsupportedFamily(self.family));
        }
        Ok(SocketAddr::V4(SocketAddrV4::new(self.addr, self.port)))
    }
}

/// A parsed session frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u16,
    pub opcode: Opcode,
    pub payload: Bytes,
    pub origin: Option<Origin>,
}

impl Frame {
    /// Create a frame with the current protocol version and no trailer.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            opcode,
            payload: payload.into(),
            origin: None,
        }
    }

    /// Registration frame.
    pub fn session(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Session, payload)
    }

    /// Application data frame.
    pub fn signalling(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Signalling, payload)
    }

    /// Unregister frame.
    pub fn close() -> Self {
        Self::new(Opcode::Close, Bytes::new())
    }

    /// Keepalive request.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    /// Keepalive response echoing the payload of `ping`.
    pub fn pong_for(ping: &Frame) -> Self {
        Self {
            version: ping.version,
            opcode: Opcode::Pong,
            payload: ping.payload.clone(),
            origin: None,
        }
    }

    /// Frame whose payload is a UTF-8 string.
    pub fn text_frame(opcode: Opcode, text: &str) -> Self {
        Self::new(opcode, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Attach an origin trailer.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// View the payload as UTF-8 text.
    pub fn text(&self) -> Result<&str> {
        Ok(std::str::from_utf8(&self.payload)?)
    }

    /// The total wire size of this frame (header + payload + trailer).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE
            + self.payload.len()
            + if self.origin.is_some() {
                TRAILER_SIZE
            } else {
                0
            }
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.wire_size());
        encode_frame(self, &mut dst)?;
        Ok(dst.freeze())
    }
}

/// Encode a frame into the wire format.
///
/// Wire format (big-endian):
/// ```text
/// ┌─────────┬─────────┬────────────┬───────────┬─ optional trailer ───────────┐
/// │ Version │ Opcode  │ Length     │ Payload   │ Family │ Addr     │ Port      │
/// │ (2B)    │ (2B)    │ (4B)       │ (Length)  │ (1B)   │ (4B)     │ (2B)      │
/// └─────────┴─────────┴────────────┴───────────┴────────┴──────────┴───────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    if frame.payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: frame.payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(frame.wire_size());
    dst.put_u16(frame.version);
    dst.put_u16(frame.opcode.as_u16());
    dst.put_u32(frame.payload.len() as u32);
    dst.put_slice(&frame.payload);
    if let Some(origin) = &frame.origin {
        dst.put_i8(origin.family);
        dst.put_slice(&origin.addr.octets());
        dst.put_u16(origin.port);
    }
    Ok(())
}

/// Read the opcode field without decoding the rest of the frame.
pub fn peek_opcode(src: &[u8]) -> Result<Opcode> {
    let raw = src.get(OPCODE_RANGE).ok_or(FrameError::Truncated {
        needed: OPCODE_RANGE.end,
        available: src.len(),
    })?;
    Ok(Opcode::from_u16(u16::from_be_bytes([raw[0], raw[1]])))
}

/// Decode one frame from a complete datagram.
///
/// The opcode is peeked first and selects the variant; the remaining fields
/// are then parsed from the same buffer. The trailer is decoded only when at
/// least [`TRAILER_SIZE`] bytes follow the declared payload; anything
/// shorter is ignored.
pub fn decode_frame(src: &Bytes) -> Result<Frame> {
    let opcode = peek_opcode(src)?;
    if src.len() < HEADER_SIZE {
        return Err(FrameError::Truncated {
            needed: HEADER_SIZE,
            available: src.len(),
        });
    }

    let mut buf = src.slice(..);
    let version = buf.get_u16();
    buf.advance(2); // opcode, already peeked
    let payload_len = buf.get_u32() as usize;

    if buf.remaining() < payload_len {
        return Err(FrameError::Truncated {
            needed: HEADER_SIZE + payload_len,
            available: src.len(),
        });
    }
    let payload = buf.split_to(payload_len);

    let origin = if buf.remaining() >= TRAILER_SIZE {
        let family = buf.get_i8();
        let addr = Ipv4Addr::from(buf.get_u32());
        let port = buf.get_u16();
        Some(Origin { family, addr, port })
    } else {
        None
    };

    Ok(Frame {
        version,
        opcode,
        payload,
        origin,
    })
}
