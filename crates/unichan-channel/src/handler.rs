use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tracing::warn;
use unichan_frame::Frame;

use crate::channel::Channel;
use crate::error::{ChannelError, Result};
use crate::packet::Packet;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub(crate) type ReadFn = dyn Fn(Packet) -> BoxFuture<Result<()>> + Send + Sync;
pub(crate) type RegisterFn = dyn Fn(Channel, Frame) -> BoxFuture<Result<()>> + Send + Sync;
type StartFn = dyn Fn(&Channel) -> Result<()> + Send + Sync;
type ChannelFn = dyn Fn(&Channel) + Send + Sync;
pub(crate) type UnregisterFn = dyn Fn(&Channel, &Frame) + Send + Sync;
type ErrorFn = dyn Fn(&Channel, &ChannelError) + Send + Sync;
type BeforeWriteFn = dyn Fn(&Packet) -> Result<()> + Send + Sync;
type AfterWriteFn = dyn Fn(&Packet) + Send + Sync;

/// Callbacks a channel invokes over its lifetime.
///
/// Only the message handler is required. Cloning a bundle is cheap and
/// yields an independent set of slots, so a template can be cloned per
/// accepted channel and customized without touching the original.
///
/// ```ignore
/// let handlers = HandlerBundle::new(|packet: Packet| async move {
///     packet.channel().write(&packet).await
/// })
/// .on_error(|channel, err| eprintln!("{}: {err}", channel.id()));
/// ```
#[derive(Clone)]
pub struct HandlerBundle {
    pub(crate) read: Arc<ReadFn>,
    start: Option<Arc<StartFn>>,
    connect: Option<Arc<ChannelFn>>,
    pub(crate) register: Option<Arc<RegisterFn>>,
    pub(crate) unregister: Option<Arc<UnregisterFn>>,
    release: Option<Arc<ChannelFn>>,
    error: Option<Arc<ErrorFn>>,
    before_write: Option<Arc<BeforeWriteFn>>,
    after_write: Option<Arc<AfterWriteFn>>,
}

impl HandlerBundle {
    /// Create a bundle around the message handler.
    pub fn new<F, Fut>(on_read: F) -> Self
    where
        F: Fn(Packet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            read: Arc::new(move |packet: Packet| -> BoxFuture<Result<()>> {
                Box::pin(on_read(packet))
            }),
            start: None,
            connect: None,
            register: None,
            unregister: None,
            release: None,
            error: None,
            before_write: None,
            after_write: None,
        }
    }

    /// Called once the channel is open. An error aborts the start.
    pub fn on_start(mut self, f: impl Fn(&Channel) -> Result<()> + Send + Sync + 'static) -> Self {
        self.start = Some(Arc::new(f));
        self
    }

    /// Called once on the first successful read of a transport that reports it.
    pub fn on_connect(mut self, f: impl Fn(&Channel) + Send + Sync + 'static) -> Self {
        self.connect = Some(Arc::new(f));
        self
    }

    /// Called for the first SESSION frame of a session channel.
    pub fn on_register<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Channel, Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register = Some(Arc::new(
            move |channel: Channel, frame: Frame| -> BoxFuture<Result<()>> {
                Box::pin(f(channel, frame))
            },
        ));
        self
    }

    /// Called for every CLOSE frame of a session channel.
    pub fn on_unregister(mut self, f: impl Fn(&Channel, &Frame) + Send + Sync + 'static) -> Self {
        self.unregister = Some(Arc::new(f));
        self
    }

    /// Called once after the channel has stopped.
    pub fn on_release(mut self, f: impl Fn(&Channel) + Send + Sync + 'static) -> Self {
        self.release = Some(Arc::new(f));
        self
    }

    /// Receives every reported failure.
    pub fn on_error(
        mut self,
        f: impl Fn(&Channel, &ChannelError) + Send + Sync + 'static,
    ) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    /// Runs before each write; an error aborts the write without sending.
    pub fn on_before_write(
        mut self,
        f: impl Fn(&Packet) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.before_write = Some(Arc::new(f));
        self
    }

    /// Runs after each successful write.
    pub fn on_after_write(mut self, f: impl Fn(&Packet) + Send + Sync + 'static) -> Self {
        self.after_write = Some(Arc::new(f));
        self
    }

    /// Chain `extra` after the existing release hook.
    pub fn wrap_release(mut self, extra: impl Fn(&Channel) + Send + Sync + 'static) -> Self {
        let inner = self.release.take();
        self.release = Some(Arc::new(move |channel: &Channel| {
            if let Some(inner) = &inner {
                inner(channel);
            }
            extra(channel);
        }));
        self
    }

    pub(crate) fn with_read(mut self, read: Arc<ReadFn>) -> Self {
        self.read = read;
        self
    }

    /// Run the message handler, recording handle statistics and converting
    /// a panic into [`ChannelError::HandlerPanic`].
    pub(crate) async fn handle(&self, packet: Packet) -> Result<()> {
        let stats = packet.channel().stats().clone();
        let bytes = packet.payload().len();
        let started = Instant::now();
        let read = self.read.clone();

        let outcome = match AssertUnwindSafe(async move { read(packet).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(isolate(err)),
            Err(panic) => Err(ChannelError::HandlerPanic(panic_message(&*panic))),
        };
        match &outcome {
            Ok(()) => stats.handle.record_success(bytes, started.elapsed()),
            Err(_) => stats.handle.record_failure(started.elapsed()),
        }
        outcome
    }

    pub(crate) fn start(&self, channel: &Channel) -> Result<()> {
        match &self.start {
            Some(f) => guarded(|| f(channel))?,
            None => Ok(()),
        }
    }

    pub(crate) fn connect(&self, channel: &Channel) -> Result<()> {
        match &self.connect {
            Some(f) => guarded(|| f(channel)),
            None => Ok(()),
        }
    }

    pub(crate) fn release(&self, channel: &Channel) -> Result<()> {
        match &self.release {
            Some(f) => guarded(|| f(channel)),
            None => Ok(()),
        }
    }

    pub(crate) fn before_write(&self, packet: &Packet) -> Result<()> {
        match &self.before_write {
            Some(f) => guarded(|| f(packet))?,
            None => Ok(()),
        }
    }

    pub(crate) fn after_write(&self, packet: &Packet) -> Result<()> {
        match &self.after_write {
            Some(f) => guarded(|| f(packet)),
            None => Ok(()),
        }
    }

    pub(crate) fn error(&self, channel: &Channel, err: &ChannelError) {
        if let Some(f) = &self.error {
            if let Err(panic) = guarded(|| f(channel, err)) {
                warn!(channel = %channel.id(), error = %panic, "error hook panicked");
            }
        }
    }
}

impl fmt::Debug for HandlerBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBundle")
            .field("start", &self.start.is_some())
            .field("connect", &self.connect.is_some())
            .field("register", &self.register.is_some())
            .field("unregister", &self.unregister.is_some())
            .field("release", &self.release.is_some())
            .field("error", &self.error.is_some())
            .field("before_write", &self.before_write.is_some())
            .field("after_write", &self.after_write.is_some())
            .finish()
    }
}

/// Handler errors never stop the channel, except a rejected registration.
fn isolate(err: ChannelError) -> ChannelError {
    match err {
        ChannelError::Registration(_) | ChannelError::Handler(_) | ChannelError::Frame(_) => err,
        other => ChannelError::Handler(Box::new(other)),
    }
}

/// Run a synchronous hook, converting a panic into an error.
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f))
        .map_err(|panic| ChannelError::HandlerPanic(panic_message(&*panic)))
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{scripted_channel, ScriptedTransport};

    #[tokio::test]
    async fn handle_records_success_and_failure() {
        let handlers = HandlerBundle::new(|packet: Packet| async move {
            if packet.payload().as_ref() == b"bad" {
                Err(ChannelError::handler("rejected"))
            } else {
                Ok(())
            }
        });
        let (channel, _) = scripted_channel(ScriptedTransport::tcp("stats"));

        handlers
            .handle(Packet::new(&channel, "good"))
            .await
            .expect("good packet should be handled");
        let err = handlers
            .handle(Packet::new(&channel, "bad"))
            .await
            .expect_err("bad packet should fail");

        assert_eq!(err.kind(), ErrorKind::Handler);
        let handle = channel.stats().handle.snapshot();
        assert_eq!(handle.total_packets, 1);
        assert_eq!(handle.total_bytes, 4);
        assert_eq!(handle.total_failures, 1);
    }

    #[tokio::test]
    async fn handler_panic_is_converted() {
        let handlers = HandlerBundle::new(|packet: Packet| async move {
            if packet.is_prepared() {
                panic!("handler exploded");
            }
            Ok(())
        });
        let (channel, _) = scripted_channel(ScriptedTransport::tcp("panic"));

        let err = handlers
            .handle(Packet::new(&channel, "x"))
            .await
            .expect_err("panic should surface as error");
        assert!(matches!(&err, ChannelError::HandlerPanic(msg) if msg == "handler exploded"));
        assert_eq!(channel.stats().handle.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn write_errors_from_handlers_are_not_fatal() {
        let handlers = HandlerBundle::new(|_packet: Packet| async move {
            Err(ChannelError::Write(unichan_transport::TransportError::Closed))
        });
        let (channel, _) = scripted_channel(ScriptedTransport::tcp("isolate"));

        let err = handlers
            .handle(Packet::new(&channel, "x"))
            .await
            .expect_err("handler should fail");
        assert!(!err.is_fatal());
    }

    #[test]
    fn wrap_release_runs_both_hooks_in_order() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = calls.clone();
        let second = calls.clone();
        let handlers = HandlerBundle::new(|_packet: Packet| async { Ok(()) })
            .on_release(move |_| first.lock().expect("lock").push("template"))
            .wrap_release(move |_| second.lock().expect("lock").push("registry"));
        let (channel, _) = scripted_channel(ScriptedTransport::tcp("release"));

        handlers.release(&channel).expect("release should run");
        assert_eq!(*calls.lock().expect("lock"), vec!["template", "registry"]);
    }

    #[test]
    fn clones_are_independent() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let template = HandlerBundle::new(|_packet: Packet| async { Ok(()) });
        let customized = template
            .clone()
            .on_connect(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let (channel, _) = scripted_channel(ScriptedTransport::tcp("clone"));

        template.connect(&channel).expect("no hook");
        customized.connect(&channel).expect("hook should run");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_hook_panic_is_caught() {
        let handlers = HandlerBundle::new(|_packet: Packet| async { Ok(()) })
            .on_before_write(|_| panic!("veto"));
        let (channel, _) = scripted_channel(ScriptedTransport::tcp("hook"));

        let err = handlers
            .before_write(&Packet::new(&channel, "x"))
            .expect_err("panic should be caught");
        assert_eq!(err.kind(), ErrorKind::HandlerPanic);
    }
}
