//! Mutable state of a service channel, guarded by the channel's state lock.

use crate::load_balancer::ConnectStatus;

/// A reconnect attempt due at `deadline_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledReconnect {
    pub deadline_ms: u64,
    pub address: String,
}

#[derive(Debug)]
pub(crate) struct ChannelState {
    /// Sorted, deduplicated.
    pub addresses: Vec<String>,
    pub status: ConnectStatus,
    /// Set while sessions are being torn down; no new connects start.
    pub closing: bool,
    /// Terminal. Every later call fails.
    pub shutdown: bool,
    pub scheduled: Vec<ScheduledReconnect>,
}

impl ChannelState {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses,
            status: ConnectStatus::Disconnected,
            closing: false,
            shutdown: false,
            scheduled: Vec::new(),
        }
    }

    /// True once a call asked for connections and no close has started since.
    pub fn has_connect_intent(&self) -> bool {
        !self.closing
            && matches!(self.status, ConnectStatus::Connecting | ConnectStatus::Connected)
    }

    pub fn is_listed(&self, address: &str) -> bool {
        self.addresses.binary_search_by(|a| a.as_str().cmp(address)).is_ok()
    }

    /// At most one pending attempt per address; the earlier deadline wins.
    pub fn schedule_reconnect(&mut self, deadline_ms: u64, address: &str) {
        if let Some(existing) = self.scheduled.iter_mut().find(|r| r.address == address) {
            existing.deadline_ms = existing.deadline_ms.min(deadline_ms);
            return;
        }
        self.scheduled.push(ScheduledReconnect {
            deadline_ms,
            address: address.to_string(),
        });
    }

    /// Remove and return every address whose attempt is due at `now_ms`.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<String> {
        let mut due = Vec::new();
        self.scheduled.retain(|r| {
            if r.deadline_ms <= now_ms {
                due.push(r.address.clone());
                false
            } else {
                true
            }
        });
        due
    }

    pub fn unschedule(&mut self, address: &str) {
        self.scheduled.retain(|r| r.address != address);
    }
}
