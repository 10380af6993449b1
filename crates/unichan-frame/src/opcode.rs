//! Session protocol opcodes.
//!
//! The opcode set is closed. Any other value on the wire is carried as
//! [`Opcode::Other`] and handled like signalling.

/// Registration / handshake.
pub const SESSION: u16 = 0x01;

/// Application data.
pub const SIGNALLING: u16 = 0x02;

/// Unregister.
pub const CLOSE: u16 = 0x08;

/// Keepalive request.
pub const PING: u16 = 0x09;

/// Keepalive response.
pub const PONG: u16 = 0x0A;

/// Decoded opcode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Session,
    Signalling,
    Close,
    Ping,
    Pong,
    /// Unknown wire value, preserved so it re-encodes unchanged.
    Other(u16),
}

impl Opcode {
    /// Map a raw wire value onto the opcode set.
    pub fn from_u16(raw: u16) -> Self {
        match raw {
            SESSION => Self::Session,
            SIGNALLING => Self::Signalling,
            CLOSE => Self::Close,
            PING => Self::Ping,
            PONG => Self::Pong,
            other => Self::Other(other),
        }
    }

    /// The raw wire value.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Session => SESSION,
            Self::Signalling => SIGNALLING,
            Self::Close => CLOSE,
            Self::Ping => PING,
            Self::Pong => PONG,
            Self::Other(raw) => raw,
        }
    }

    /// True for frames the session layer hands to the message handler as data.
    pub fn is_signalling(self) -> bool {
        matches!(self, Self::Signalling | Self::Other(_))
    }
}

impl From<u16> for Opcode {
    fn from(raw: u16) -> Self {
        Self::from_u16(raw)
    }
}

impl From<Opcode> for u16 {
    fn from(opcode: Opcode) -> Self {
        opcode.as_u16()
    }
}

/// Returns a human-readable name for an opcode.
pub fn opcode_name(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::Session => "SESSION",
        Opcode::Signalling => "SIGNALLING",
        Opcode::Close => "CLOSE",
        Opcode::Ping => "PING",
        Opcode::Pong => "PONG",
        Opcode::Other(_) => "UNKNOWN",
    }
}
