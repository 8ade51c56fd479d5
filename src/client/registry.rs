//! Channel registry with a bounded idle cache.
//!
//! A channel stays in `active` while anything outside the registry holds it.
//! Once it is unreferenced, disconnected and has no queued work it moves to
//! the `idle` LRU. Touching an idle channel promotes it back. Channels pushed
//! out of the LRU are handed back to the caller for teardown.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};

use lru::LruCache;

use crate::channel::ServiceChannel;
use crate::load_balancer::ConnectStatus;
use crate::resolver::AddressListener;

/// Forwards resolver events to one channel without keeping it alive.
pub(crate) struct ChannelListener {
    channel: Weak<ServiceChannel>,
}

impl ChannelListener {
    pub(crate) fn new(channel: &Arc<ServiceChannel>) -> Self {
        Self { channel: Arc::downgrade(channel) }
    }
}

impl AddressListener for ChannelListener {
    fn on_address_changed(&self, _name: &str, addresses: &[String]) {
        if let Some(channel) = self.channel.upgrade() {
            channel.on_address_changed(addresses);
        }
    }

    fn on_connection_closed(&self, name: &str) {
        if let Some(channel) = self.channel.upgrade() {
            tracing::warn!(channel = %name, "Resolver session lost, closing sessions");
            channel.close_all_sessions();
        }
    }
}

pub(crate) struct Entry {
    pub channel: Arc<ServiceChannel>,
    pub listener: Arc<dyn AddressListener>,
}

pub(crate) struct ChannelRegistry {
    active: HashMap<String, Entry>,
    idle: LruCache<String, Entry>,
}

impl ChannelRegistry {
    pub(crate) fn new(idle_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(idle_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            active: HashMap::new(),
            idle: LruCache::new(capacity),
        }
    }

    /// Look up `name`, promoting it out of the idle cache if needed.
    pub(crate) fn get(&mut self, name: &str) -> Option<Arc<ServiceChannel>> {
        if let Some(entry) = self.active.get(name) {
            return Some(entry.channel.clone());
        }
        let entry = self.idle.pop(name)?;
        tracing::debug!(channel = %name, "Channel reactivated from idle cache");
        let channel = entry.channel.clone();
        self.active.insert(name.to_string(), entry);
        Some(channel)
    }

    pub(crate) fn insert(&mut self, name: &str, entry: Entry) {
        self.active.insert(name.to_string(), entry);
    }

    /// Every registered channel, active and idle.
    pub(crate) fn channels(&self) -> Vec<Arc<ServiceChannel>> {
        self.active
            .values()
            .map(|e| e.channel.clone())
            .chain(self.idle.iter().map(|(_, e)| e.channel.clone()))
            .collect()
    }

    /// Move unreferenced quiet channels into the idle cache.
    ///
    /// Returns entries evicted from the cache; the caller tears them down
    /// outside the registry lock.
    pub(crate) fn sweep(&mut self) -> Vec<(String, Entry)> {
        let quiet: Vec<String> = self
            .active
            .iter()
            .filter(|(_, e)| is_quiet(&e.channel))
            .map(|(name, _)| name.clone())
            .collect();

        let mut evicted = Vec::new();
        for name in quiet {
            let Some(entry) = self.active.remove(&name) else {
                continue;
            };
            tracing::debug!(channel = %name, "Channel moved to idle cache");
            if let Some(old) = self.idle.push(name, entry) {
                evicted.push(old);
            }
        }
        evicted
    }

    pub(crate) fn drain(&mut self) -> Vec<(String, Entry)> {
        let mut all: Vec<(String, Entry)> = self.active.drain().collect();
        while let Some(entry) = self.idle.pop_lru() {
            all.push(entry);
        }
        all
    }

    pub(crate) fn active_len(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn idle_len(&self) -> usize {
        self.idle.len()
    }
}

// The registry's own Arc is the only strong reference.
fn is_quiet(channel: &Arc<ServiceChannel>) -> bool {
    Arc::strong_count(channel) == 1
        && channel.status() == ConnectStatus::Disconnected
        && channel.pending_requests() == 0
}
