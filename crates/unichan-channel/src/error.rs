use std::fmt;

use unichan_frame::FrameError;
use unichan_transport::TransportError;

/// Boxed error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// `start` was called on a channel that is already open.
    #[error("channel {0} is already open")]
    AlreadyOpen(String),

    /// The channel has been stopped.
    #[error("channel {0} is closed")]
    Closed(String),

    /// The transport failed to read.
    #[error("read failed: {0}")]
    Read(#[source] TransportError),

    /// The transport failed to write.
    #[error("write failed: {0}")]
    Write(#[source] TransportError),

    /// A message handler returned an error.
    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    /// A user callback panicked.
    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    /// Closing the transport failed during stop.
    #[error("deactivation failed: {0}")]
    Deactivate(String),

    /// The start hook failed.
    #[error("activation failed: {0}")]
    Activate(String),

    /// The registration hook rejected a SESSION frame.
    #[error("registration failed: {0}")]
    Registration(#[source] BoxError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Transport error outside the read and write paths (bind, dial, accept).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The read-dispatch pool has been shut down.
    #[error("read pool is shut down")]
    PoolClosed,
}

/// Failure category delivered to the error hook alongside every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Read,
    Write,
    Handler,
    HandlerPanic,
    Deactivate,
    Activate,
    Registration,
    Lifecycle,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Handler => "handler",
            Self::HandlerPanic => "handler-panic",
            Self::Deactivate => "deactivate",
            Self::Activate => "activate",
            Self::Registration => "registration",
            Self::Lifecycle => "lifecycle",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChannelError {
    /// Wrap an arbitrary error returned by a message handler.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    /// Wrap an arbitrary error returned by a registration hook.
    pub fn registration(err: impl Into<BoxError>) -> Self {
        Self::Registration(err.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Read(_) => ErrorKind::Read,
            Self::Write(_) => ErrorKind::Write,
            Self::Handler(_) | Self::Frame(_) => ErrorKind::Handler,
            Self::HandlerPanic(_) => ErrorKind::HandlerPanic,
            Self::Deactivate(_) => ErrorKind::Deactivate,
            Self::Activate(_) => ErrorKind::Activate,
            Self::Registration(_) => ErrorKind::Registration,
            Self::AlreadyOpen(_) | Self::Closed(_) | Self::Transport(_) | Self::PoolClosed => {
                ErrorKind::Lifecycle
            }
        }
    }

    /// Fatal errors stop the channel once reported.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Read | ErrorKind::Write | ErrorKind::Registration
        )
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
