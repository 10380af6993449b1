use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

use crate::channel::Channel;
use crate::handler::HandlerBundle;

/// Lookup table of open channels kept by server glue.
pub trait Registry: Send + Sync {
    fn add(&self, channel: Channel);

    fn remove(&self, id: &str) -> Option<Channel>;

    fn get(&self, id: &str) -> Option<Channel>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Concurrent [`Registry`] keyed by channel id.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Stop every registered channel. Release hooks remove them as they go.
    pub async fn stop_all(&self) {
        let channels: Vec<Channel> = self
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for channel in channels {
            channel.stop().await;
        }
    }
}

impl Registry for ChannelRegistry {
    fn add(&self, channel: Channel) {
        self.channels.insert(channel.id().to_string(), channel);
    }

    fn remove(&self, id: &str) -> Option<Channel> {
        self.channels.remove(id).map(|(_, channel)| channel)
    }

    fn get(&self, id: &str) -> Option<Channel> {
        self.channels.get(id).map(|entry| entry.value().clone())
    }

    fn len(&self) -> usize {
        self.channels.len()
    }
}

/// Clone `template` for one accepted channel, removing the channel from
/// `registry` when it is released.
///
/// The hook holds a weak reference so a registry and its channels never keep
/// each other alive.
pub fn attach(template: &HandlerBundle, registry: &Arc<dyn Registry>) -> HandlerBundle {
    let registry: Weak<dyn Registry> = Arc::downgrade(registry);
    template.clone().wrap_release(move |channel| {
        if let Some(registry) = registry.upgrade() {
            if registry.remove(channel.id()).is_some() {
                debug!(channel = %channel.id(), remaining = registry.len(), "channel deregistered");
            }
        }
    })
}
