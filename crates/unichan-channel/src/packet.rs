use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::SystemTime;

use bytes::Bytes;
use serde_json::Value;
use unichan_frame::{decode_frame, Frame};
use unichan_transport::{Inbound, TransportKind};

use crate::channel::Channel;
use crate::error::Result;

/// One unit of data flowing through a [`Channel`].
///
/// Dropping a packet releases its payload and attachments; handlers take
/// packets by value, so that happens exactly once after handling.
#[derive(Debug, Clone)]
pub struct Packet {
    channel: Channel,
    kind: TransportKind,
    payload: Bytes,
    remote: Option<SocketAddr>,
    created_at: SystemTime,
    attachments: HashMap<String, Value>,
}

impl Packet {
    /// Outbound packet for `channel`.
    pub fn new(channel: &Channel, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.clone(),
            kind: channel.kind(),
            payload: payload.into(),
            remote: None,
            created_at: SystemTime::now(),
            attachments: HashMap::new(),
        }
    }

    pub(crate) fn inbound(channel: &Channel, inbound: Inbound) -> Self {
        Self {
            remote: inbound.remote,
            ..Self::new(channel, inbound.payload)
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Sender address, when the transport reports one per unit.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Only prepared packets are handed to handlers.
    pub fn is_prepared(&self) -> bool {
        !self.payload.is_empty()
    }

    pub fn attach(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attachments.insert(key.into(), value.into());
    }

    pub fn attachment(&self, key: &str) -> Option<&Value> {
        self.attachments.get(key)
    }

    pub fn attachments(&self) -> &HashMap<String, Value> {
        &self.attachments
    }

    /// Parse the payload as a session frame.
    pub fn decode_frame(&self) -> Result<Frame> {
        Ok(decode_frame(&self.payload)?)
    }
}
