//! Connection pooling and load balancing.
//!
//! # Data Flow
//! ```text
//! ServiceChannel::send_request
//!     → group.rs (active pool of Connected records)
//!     → probe.rs (bounded random probe over pending counts)
//!     → connection.rs (counters updated as the request is sent / confirmed)
//! ```
//!
//! # Design Decisions
//! - Selection is approximate: a fixed number of probes from a
//!   random start keeps picks O(1)
//! - Per-connection counters chain into a group aggregate
//! - Only Connected records accept counter updates

pub mod connection;
pub mod group;
pub mod probe;

use std::sync::Arc;

pub use connection::{ConfirmType, ConnectStatus, ConnectionId, ConnectionRecord, Workload};
pub use group::ConnectionGroup;
pub use probe::BoundedProbe;

/// Trait for connection selection algorithms.
pub trait ConnectionSelector: Send + Sync {
    /// Select a connection from the active pool.
    fn select(&self, active: &[Arc<ConnectionRecord>]) -> Option<Arc<ConnectionRecord>>;
}
