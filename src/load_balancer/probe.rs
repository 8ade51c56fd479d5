//! Bounded random probe.
//!
//! Start at a uniformly random slot of the active pool and look at up to
//! [`PROBE_COUNT`] further slots, wrapping around. The first candidate with
//! strictly fewer pending requests than the best so far wins; ties keep the
//! earlier one. O(1) per pick regardless of pool size.

use std::sync::Arc;

use crate::load_balancer::connection::ConnectionRecord;
use crate::load_balancer::ConnectionSelector;

pub const PROBE_COUNT: usize = 3;

#[derive(Debug, Default, Clone, Copy)]
pub struct BoundedProbe;

impl BoundedProbe {
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn select_from(
        active: &[Arc<ConnectionRecord>],
        start: usize,
    ) -> Option<Arc<ConnectionRecord>> {
        let len = active.len();
        if len == 0 {
            return None;
        }
        let mut best = &active[start % len];
        let mut best_pending = best.pending();

        for step in 1..=PROBE_COUNT.min(len - 1) {
            let candidate = &active[(start + step) % len];
            let pending = candidate.pending();
            if pending < best_pending {
                best = candidate;
                best_pending = pending;
            }
        }
        Some(best.clone())
    }
}

impl ConnectionSelector for BoundedProbe {
    fn select(&self, active: &[Arc<ConnectionRecord>]) -> Option<Arc<ConnectionRecord>> {
        if active.is_empty() {
            return None;
        }
        Self::select_from(active, fastrand::usize(..active.len()))
    }
}
