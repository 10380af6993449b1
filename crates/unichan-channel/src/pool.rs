//! Bounded worker pool that runs message handlers off the read loops.
//!
//! Every packet goes to the worker at `hash(channel id) % size`, so one
//! channel's packets are handled in receive order while different channels
//! run in parallel. Each worker drains a bounded FIFO; a full queue makes
//! [`ReadPool::dispatch`] wait, which stalls the producing read loop.

use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::OnceLock;
use std::thread;

use futures_util::FutureExt;
use rustc_hash::FxHasher;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{ChannelError, Result};
use crate::handler::panic_message;
use crate::packet::Packet;

/// Default per-worker queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolConfig {
    /// Number of worker slots.
    pub size: usize,
    /// Packets buffered per worker before dispatch waits.
    pub queue_depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: thread::available_parallelism().map_or(4, |n| n.get()),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

pub struct ReadPool {
    config: PoolConfig,
    slots: Box<[OnceLock<mpsc::Sender<Packet>>]>,
    shutdown: CancellationToken,
}

impl ReadPool {
    /// Create a pool. Workers are spawned lazily on first dispatch to their
    /// slot, so this does not need a runtime.
    pub fn new(config: PoolConfig) -> Self {
        let config = PoolConfig {
            size: config.size.max(1),
            queue_depth: config.queue_depth.max(1),
        };
        Self {
            config,
            slots: (0..config.size).map(|_| OnceLock::new()).collect(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Worker slot for a channel identity. Stable for the pool's lifetime.
    pub fn slot_for(&self, channel_id: &str) -> usize {
        let mut hasher = FxHasher::default();
        channel_id.hash(&mut hasher);
        (hasher.finish() % self.config.size as u64) as usize
    }

    /// Number of workers spawned so far.
    pub fn active_workers(&self) -> usize {
        self.slots.iter().filter(|slot| slot.get().is_some()).count()
    }

    /// Queue `packet` on its channel's worker, waiting while the queue is full.
    pub async fn dispatch(&self, packet: Packet) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ChannelError::PoolClosed);
        }
        let slot = self.slot_for(packet.channel().id());
        let queue = self.slots[slot].get_or_init(|| self.spawn_worker(slot));
        queue
            .send(packet)
            .await
            .map_err(|_| ChannelError::PoolClosed)
    }

    /// Stop all workers. Queued packets are dropped.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn spawn_worker(&self, slot: usize) -> mpsc::Sender<Packet> {
        let (tx, rx) = mpsc::channel(self.config.queue_depth);
        debug!(slot, queue_depth = self.config.queue_depth, "spawning read worker");
        tokio::spawn(run_worker(slot, rx, self.shutdown.clone()));
        tx
    }
}

impl Drop for ReadPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for ReadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPool")
            .field("config", &self.config)
            .field("active_workers", &self.active_workers())
            .finish()
    }
}

async fn run_worker(slot: usize, mut queue: mpsc::Receiver<Packet>, shutdown: CancellationToken) {
    loop {
        let packet = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            packet = queue.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };
        let channel = packet.channel().clone();
        // handle_packet already isolates handler panics; this keeps the
        // worker alive if anything else in the path panics.
        if let Err(panic) = AssertUnwindSafe(channel.handle_packet(packet))
            .catch_unwind()
            .await
        {
            error!(slot, channel = %channel.id(), panic = %panic_message(&*panic), "read worker recovered from panic");
        }
    }
    debug!(slot, "read worker stopped");
}
