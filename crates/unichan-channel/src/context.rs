use std::sync::Arc;

use unichan_transport::TransportConfig;

use crate::pool::{PoolConfig, ReadPool};

/// Process-wide settings shared by every channel.
///
/// Built once at startup and passed to every channel factory. Cloning
/// shares the same transport config and pool.
#[derive(Debug, Clone, Default)]
pub struct Context {
    transport: Arc<TransportConfig>,
    pool: Option<Arc<ReadPool>>,
}

impl Context {
    /// Context without a read pool; handlers run inline in each read loop.
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            pool: None,
        }
    }

    /// Dispatch reads through `pool`.
    pub fn with_pool(mut self, pool: Arc<ReadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Dispatch reads through a new pool built from `config`.
    pub fn with_pool_config(self, config: PoolConfig) -> Self {
        self.with_pool(Arc::new(ReadPool::new(config)))
    }

    pub fn transport(&self) -> &Arc<TransportConfig> {
        &self.transport
    }

    pub fn pool(&self) -> Option<&Arc<ReadPool>> {
        self.pool.as_ref()
    }
}
