use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use unichan_transport::{Statistics, Transport, TransportKind};

use crate::context::Context;
use crate::error::{ChannelError, ErrorKind, Result};
use crate::handler::{panic_message, HandlerBundle};
use crate::packet::Packet;

const IDLE: u8 = 0;
const OPEN: u8 = 1;
const STOPPED: u8 = 2;

/// One connection of any transport kind.
///
/// A channel is single-use: `Idle -> Open -> Stopped`. Cloning shares the
/// same underlying connection and state.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    kind: TransportKind,
    transport: Arc<dyn Transport>,
    handlers: HandlerBundle,
    ctx: Context,
    parent: Option<String>,
    server_side: bool,
    state: AtomicU8,
    active: AtomicBool,
    exit: CancellationToken,
}

impl Channel {
    /// Build a client-side channel over a dialed transport.
    pub fn new(transport: Arc<dyn Transport>, ctx: &Context, handlers: HandlerBundle) -> Self {
        Self::build(transport, ctx, handlers, None, false)
    }

    /// Build a server-side channel for a transport accepted by `parent`.
    pub fn accepted(
        transport: Arc<dyn Transport>,
        ctx: &Context,
        handlers: HandlerBundle,
        parent: impl Into<String>,
    ) -> Self {
        Self::build(transport, ctx, handlers, Some(parent.into()), true)
    }

    fn build(
        transport: Arc<dyn Transport>,
        ctx: &Context,
        handlers: HandlerBundle,
        parent: Option<String>,
        server_side: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: transport.id().to_string(),
                kind: transport.kind(),
                transport,
                handlers,
                ctx: ctx.clone(),
                parent,
                server_side,
                state: AtomicU8::new(IDLE),
                active: AtomicBool::new(false),
                exit: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    /// Identity of the listener that accepted this channel.
    pub fn parent(&self) -> Option<&str> {
        self.inner.parent.as_deref()
    }

    pub fn is_server_side(&self) -> bool {
        self.inner.server_side
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.local_addr()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.transport.peer_addr()
    }

    pub fn stats(&self) -> &Arc<Statistics> {
        self.inner.transport.stats()
    }

    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    /// True until `start` succeeds, and again for good once stopped.
    pub fn is_closed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != OPEN
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::Release);
    }

    /// Resolves once the channel has been stopped.
    pub async fn closed(&self) {
        self.inner.exit.cancelled().await;
    }

    /// Open the channel and spawn its read loop.
    pub async fn start(&self) -> Result<()> {
        if let Err(state) =
            self.inner
                .state
                .compare_exchange(IDLE, OPEN, Ordering::AcqRel, Ordering::Acquire)
        {
            return Err(if state == OPEN {
                ChannelError::AlreadyOpen(self.id().to_string())
            } else {
                ChannelError::Closed(self.id().to_string())
            });
        }

        // Session transports become active through registration instead.
        if self.kind() != TransportKind::Kcp {
            self.set_active(true);
        }

        if let Err(err) = self.inner.handlers.start(self) {
            let err = ChannelError::Activate(err.to_string());
            self.report(&err);
            self.stop().await;
            return Err(err);
        }

        let channel = self.clone();
        tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(channel.read_loop()).catch_unwind().await {
                let err = ChannelError::HandlerPanic(panic_message(&*panic));
                channel.report(&err);
                channel.stop().await;
            }
        });

        info!(channel = %self.id(), kind = %self.kind(), server = self.is_server_side(), "channel opened");
        Ok(())
    }

    async fn read_loop(&self) {
        let transport = &self.inner.transport;
        let threshold = self.inner.ctx.transport().close_after_failures;

        loop {
            let read = tokio::select! {
                biased;
                _ = self.inner.exit.cancelled() => break,
                read = transport.read() => read,
            };

            let inbound = match read {
                Ok(inbound) => inbound,
                Err(err) => {
                    let failures = transport.stats().receive.consecutive_failures();
                    if transport.is_read_loop_continued(&err, failures, threshold) {
                        debug!(channel = %self.id(), failures, error = %err, "read failed; retrying");
                        continue;
                    }
                    self.report(&ChannelError::Read(err));
                    self.stop().await;
                    break;
                }
            };

            if inbound.first {
                if let Err(err) = self.inner.handlers.connect(self) {
                    self.report(&err);
                }
            }

            let packet = Packet::inbound(self, inbound);
            if !packet.is_prepared() {
                trace!(channel = %self.id(), "skipping empty read");
                continue;
            }

            match self.inner.ctx.pool() {
                Some(pool) => {
                    let dispatched = tokio::select! {
                        biased;
                        _ = self.inner.exit.cancelled() => break,
                        dispatched = pool.dispatch(packet) => dispatched,
                    };
                    if let Err(err) = dispatched {
                        self.report(&err);
                        self.stop().await;
                        break;
                    }
                }
                None => self.handle_packet(packet).await,
            }
        }
        trace!(channel = %self.id(), "read loop exited");
    }

    /// Run the message handler for one packet. Fatal handler errors stop
    /// the channel; everything else is only reported.
    pub(crate) async fn handle_packet(&self, packet: Packet) {
        if let Err(err) = self.inner.handlers.handle(packet).await {
            self.report(&err);
            if err.is_fatal() {
                self.stop().await;
            }
        }
    }

    /// Send one packet.
    ///
    /// A closed channel fails without touching the transport. A transport
    /// failure is reported, stops the channel and is returned.
    pub async fn write(&self, packet: &Packet) -> Result<()> {
        if self.is_closed() {
            return Err(ChannelError::Closed(self.id().to_string()));
        }
        self.inner.handlers.before_write(packet)?;

        if let Err(err) = self.inner.transport.write_by_conn(packet.payload()).await {
            let err = ChannelError::Write(err);
            self.report(&err);
            self.stop().await;
            return Err(err);
        }

        if let Err(err) = self.inner.handlers.after_write(packet) {
            self.report(&err);
        }
        Ok(())
    }

    /// Send raw bytes.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.write(&Packet::new(self, payload)).await
    }

    /// Close the channel. Idempotent.
    ///
    /// Signals the read loop, closes the transport and runs the release hook.
    /// Close failures are reported, never returned.
    pub async fn stop(&self) {
        if self.inner.state.swap(STOPPED, Ordering::AcqRel) == STOPPED {
            return;
        }
        self.set_active(false);
        self.inner.exit.cancel();

        if let Err(err) = self.inner.transport.close().await {
            self.report(&ChannelError::Deactivate(err.to_string()));
        }
        if let Err(err) = self.inner.handlers.release(self) {
            self.report(&err);
        }
        info!(channel = %self.id(), "channel stopped");
    }

    /// Log `err` and deliver it to the error hook.
    pub(crate) fn report(&self, err: &ChannelError) {
        let id = self.id();
        match err {
            ChannelError::Read(source) if source.is_closed() => {
                debug!(channel = %id, kind = %err.kind(), "peer closed connection");
            }
            _ if err.is_fatal() => {
                error!(channel = %id, kind = %err.kind(), error = %err, "channel failed");
            }
            _ if err.kind() == ErrorKind::Lifecycle => {
                debug!(channel = %id, kind = %err.kind(), error = %err, "channel lifecycle error");
            }
            _ => warn!(channel = %id, kind = %err.kind(), error = %err, "channel error"),
        }
        self.inner.handlers.error(self, err);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("closed", &self.is_closed())
            .field("active", &self.is_active())
            .field("parent", &self.inner.parent)
            .finish()
    }
}
