//! Connection record.
//!
//! # Responsibilities
//! - Identify one socket with a process-wide unique id
//! - Track its connect status
//! - Track request counters (sent, responded, canceled, timed out, taken away)

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::transport::SocketHandle;

/// Global counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connect status of a socket or of a whole channel.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl From<u8> for ConnectStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => ConnectStatus::Connecting,
            2 => ConnectStatus::Connected,
            3 => ConnectStatus::Disconnecting,
            _ => ConnectStatus::Disconnected,
        }
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectStatus::Disconnected => "disconnected",
            ConnectStatus::Connecting => "connecting",
            ConnectStatus::Connected => "connected",
            ConnectStatus::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// How a request left a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmType {
    Response,
    Canceled,
    Timeout,
    /// Moved off the connection for redispatch.
    TakeAway,
}

/// Request counters, optionally chained into a parent aggregate.
#[derive(Debug, Default)]
pub struct Workload {
    sent: AtomicU64,
    responded: AtomicU64,
    canceled: AtomicU64,
    timed_out: AtomicU64,
    taken_away: AtomicU64,
    parent: Option<Arc<Workload>>,
}

impl Workload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Arc<Workload>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn add_request(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.add_request();
        }
    }

    pub fn confirm(&self, kind: ConfirmType) {
        let counter = match kind {
            ConfirmType::Response => &self.responded,
            ConfirmType::Canceled => &self.canceled,
            ConfirmType::Timeout => &self.timed_out,
            ConfirmType::TakeAway => &self.taken_away,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.confirm(kind);
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn responded(&self) -> u64 {
        self.responded.load(Ordering::Relaxed)
    }

    pub fn canceled(&self) -> u64 {
        self.canceled.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    pub fn taken_away(&self) -> u64 {
        self.taken_away.load(Ordering::Relaxed)
    }

    /// sent − (responded + canceled + timed out + taken away).
    pub fn pending(&self) -> u64 {
        let done = self.responded() + self.canceled() + self.timed_out() + self.taken_away();
        self.sent().saturating_sub(done)
    }
}

/// One socket of a connection group.
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub address: String,
    status: AtomicU8,
    pub workload: Workload,
    socket: Arc<dyn SocketHandle>,
}

impl ConnectionRecord {
    pub fn new(
        id: ConnectionId,
        address: impl Into<String>,
        socket: Arc<dyn SocketHandle>,
        aggregate: Arc<Workload>,
    ) -> Self {
        Self {
            id,
            address: address.into(),
            status: AtomicU8::new(ConnectStatus::Disconnected as u8),
            workload: Workload::with_parent(aggregate),
            socket,
        }
    }

    pub fn status(&self) -> ConnectStatus {
        ConnectStatus::from(self.status.load(Ordering::Acquire))
    }

    /// Returns the previous status.
    pub(crate) fn swap_status(&self, status: ConnectStatus) -> ConnectStatus {
        ConnectStatus::from(self.status.swap(status as u8, Ordering::AcqRel))
    }

    pub fn pending(&self) -> u64 {
        self.workload.pending()
    }

    /// Count a request as sent. No-op returning `false` unless Connected.
    pub fn add_request(&self) -> bool {
        if self.status() != ConnectStatus::Connected {
            return false;
        }
        self.workload.add_request();
        true
    }

    /// Count a request as finished. No-op returning `false` unless Connected.
    pub fn confirm_request(&self, kind: ConfirmType) -> bool {
        if self.status() != ConnectStatus::Connected {
            return false;
        }
        self.workload.confirm(kind);
        true
    }

    pub fn socket(&self) -> &Arc<dyn SocketHandle> {
        &self.socket
    }
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("status", &self.status())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert!(b > a);
        assert_eq!(a.to_string(), format!("conn-{}", a.as_u64()));
    }

    #[test]
    fn test_workload_pending_and_parent() {
        let total = Arc::new(Workload::new());
        let w = Workload::with_parent(total.clone());
        for _ in 0..5 {
            w.add_request();
        }
        w.confirm(ConfirmType::Response);
        w.confirm(ConfirmType::Canceled);
        w.confirm(ConfirmType::Timeout);
        w.confirm(ConfirmType::TakeAway);

        assert_eq!(w.pending(), 1);
        assert_eq!(total.sent(), 5);
        assert_eq!(total.pending(), 1);
        assert_eq!(total.taken_away(), 1);
    }

    #[test]
    fn test_status_from_u8() {
        assert_eq!(ConnectStatus::from(2), ConnectStatus::Connected);
        assert_eq!(ConnectStatus::from(200), ConnectStatus::Disconnected);
    }
}
