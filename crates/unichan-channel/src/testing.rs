//! Deterministic transport for driving the channel core in unit tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use unichan_transport::{
    Inbound, Result, Statistics, Transport, TransportError, TransportKind,
};

use crate::channel::Channel;
use crate::context::Context;
use crate::handler::HandlerBundle;
use crate::packet::Packet;

/// One scripted outcome of [`Transport::read`].
pub(crate) enum Step {
    Data(Bytes),
    /// Data flagged as the transport's first successful read.
    First(Bytes),
    Fail(TransportError),
}

/// Replays scripted reads and records writes. Reads wait once the script
/// runs out, like an idle connection.
pub(crate) struct ScriptedTransport {
    id: String,
    kind: TransportKind,
    script: Mutex<VecDeque<Step>>,
    pushed: Notify,
    reads: AtomicUsize,
    written: Mutex<Vec<Bytes>>,
    fail_writes: AtomicBool,
    fail_close: AtomicBool,
    close_calls: AtomicUsize,
    stats: Arc<Statistics>,
}

impl ScriptedTransport {
    pub(crate) fn tcp(name: &str) -> Arc<Self> {
        Self::with_kind(TransportKind::Tcp, name)
    }

    pub(crate) fn kcp(name: &str) -> Arc<Self> {
        Self::with_kind(TransportKind::Kcp, name)
    }

    fn with_kind(kind: TransportKind, name: &str) -> Arc<Self> {
        Arc::new(Self {
            id: format!("{kind}:{name}"),
            kind,
            script: Mutex::new(VecDeque::new()),
            pushed: Notify::new(),
            reads: AtomicUsize::new(0),
            written: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            stats: Arc::new(Statistics::default()),
        })
    }

    pub(crate) fn push(&self, step: Step) {
        self.script.lock().expect("script lock").push_back(step);
        self.pushed.notify_one();
    }

    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Reads that returned a scripted step.
    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn written(&self) -> Vec<Bytes> {
        self.written.lock().expect("written lock").clone()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn peer_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9))
    }

    fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    async fn read(&self) -> Result<Inbound> {
        let step = loop {
            let next = self.script.lock().expect("script lock").pop_front();
            match next {
                Some(step) => break step,
                None => self.pushed.notified().await,
            }
        };
        self.reads.fetch_add(1, Ordering::SeqCst);
        match step {
            Step::Data(payload) => {
                self.stats.receive.record_success(payload.len(), Duration::ZERO);
                Ok(Inbound::new(payload))
            }
            Step::First(payload) => {
                self.stats.receive.record_success(payload.len(), Duration::ZERO);
                Ok(Inbound {
                    first: true,
                    ..Inbound::new(payload)
                })
            }
            Step::Fail(err) => {
                self.stats.receive.record_failure(Duration::ZERO);
                Err(err)
            }
        }
    }

    async fn write_by_conn(&self, payload: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.stats.send.record_failure(Duration::ZERO);
            return Err(TransportError::Io(std::io::ErrorKind::BrokenPipe.into()));
        }
        self.written
            .lock()
            .expect("written lock")
            .push(Bytes::copy_from_slice(payload));
        self.stats.send.record_success(payload.len(), Duration::ZERO);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::ErrorKind::ConnectionReset.into()));
        }
        Ok(())
    }
}

/// Unstarted channel over `transport` with a no-op handler.
pub(crate) fn scripted_channel(transport: Arc<ScriptedTransport>) -> (Channel, Arc<ScriptedTransport>) {
    let channel = Channel::new(
        transport.clone(),
        &Context::default(),
        HandlerBundle::new(|_packet: Packet| async { Ok(()) }),
    );
    (channel, transport)
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
