use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{Result, TransportError};
use crate::stats::{Counter, Statistics};

/// Transport kind tag carried by every channel and packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Udp,
    Ws,
    Kcp,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Ws => "ws",
            Self::Kcp => "kcp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "ws" | "websocket" => Ok(Self::Ws),
            "kcp" => Ok(Self::Kcp),
            other => Err(format!("unknown transport kind '{other}'")),
        }
    }
}

/// One application-level unit returned by [`Transport::read`].
#[derive(Debug, Clone)]
pub struct Inbound {
    pub payload: Bytes,
    /// Sender address, for transports that see one per unit.
    pub remote: Option<SocketAddr>,
    /// Set on the first successful read of a connect-on-first-read transport.
    pub first: bool,
}

impl Inbound {
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            remote: None,
            first: false,
        }
    }
}

/// Raw-byte contract every transport adapter implements for the channel core.
///
/// `read` returns exactly one unit per call and `write_by_conn` sends exactly
/// one packet's bytes; both apply a deadline computed at call time and record
/// the outcome in [`Transport::stats`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    /// Stable identity derived from the endpoints (and session id where the
    /// transport has one).
    fn id(&self) -> &str;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn peer_addr(&self) -> SocketAddr;

    fn stats(&self) -> &Arc<Statistics>;

    async fn read(&self) -> Result<Inbound>;

    async fn write_by_conn(&self, payload: &[u8]) -> Result<()>;

    /// Whether the read loop should keep going after `err`.
    ///
    /// `consecutive_failures` already includes `err`. The default retries
    /// anything but a closed transport while the streak is under `threshold`.
    fn is_read_loop_continued(
        &self,
        err: &TransportError,
        consecutive_failures: u64,
        threshold: u64,
    ) -> bool {
        !err.is_closed() && consecutive_failures < threshold
    }

    async fn close(&self) -> Result<()>;
}

/// Build a channel identity from its endpoints.
pub fn endpoint_id(
    kind: TransportKind,
    local: Option<SocketAddr>,
    remote: SocketAddr,
    session: Option<u32>,
) -> String {
    let local = local.map_or_else(|| "-".to_string(), |addr| addr.to_string());
    match session {
        Some(session) => format!("{kind}:{local}->{remote}#{session}"),
        None => format!("{kind}:{local}->{remote}"),
    }
}

/// Run one transport operation under `deadline`, recording the outcome and
/// elapsed time in `counter`.
pub(crate) async fn measured<T, F>(
    counter: &Counter,
    deadline: Instant,
    fut: F,
    size: impl FnOnce(&T) -> usize,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let outcome = match tokio::time::timeout_at(deadline, fut).await {
        Ok(outcome) => outcome,
        Err(_) => Err(TransportError::Timeout(
            deadline.saturating_duration_since(started),
        )),
    };
    let elapsed: Duration = started.elapsed();
    match &outcome {
        Ok(value) => counter.record_success(size(value), elapsed),
        Err(_) => counter.record_failure(elapsed),
    }
    outcome
}
