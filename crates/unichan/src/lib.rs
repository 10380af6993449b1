//! One channel abstraction over TCP, UDP, WebSocket and KCP.
//!
//! unichan drives every transport through the same lifecycle, statistics
//! model and handler contract, and runs a compact binary session protocol
//! over KCP.
//!
//! # Crate Structure
//!
//! - [`frame`]: Session frame codec (SESSION, SIGNALLING, CLOSE, PING, PONG)
//! - [`transport`]: Transport contract, configuration, statistics and adapters
//! - [`channel`]: Channel lifecycle, read-dispatch pool, session layer, dial/listen glue

/// Re-export frame types.
pub mod frame {
    pub use unichan_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use unichan_transport::*;
}

/// Re-export channel types.
pub mod channel {
    pub use unichan_channel::*;
}
