//! Connection group.
//!
//! # Responsibilities
//! - Register every socket of one service channel
//! - Keep the active pool equal to the set of Connected records
//! - Count consecutive connect failures
//! - Pick the least loaded active connection
//!
//! # Design Decisions
//! - Reader/writer lock: picks and lookups share the read side, status
//!   changes and membership take the write side
//! - Status transitions happen under the write lock so status and pool
//!   membership never disagree
//! - Sockets are closed outside the lock; a close may call straight back
//!   into `remove`

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::load_balancer::connection::{
    ConfirmType, ConnectStatus, ConnectionId, ConnectionRecord, Workload,
};
use crate::load_balancer::probe::BoundedProbe;
use crate::load_balancer::ConnectionSelector;
use crate::transport::SocketHandle;

#[derive(Default)]
struct GroupInner {
    connections: HashMap<ConnectionId, Arc<ConnectionRecord>>,
    active: Vec<Arc<ConnectionRecord>>,
}

pub struct ConnectionGroup {
    name: String,
    inner: RwLock<GroupInner>,
    selector: Box<dyn ConnectionSelector>,
    connect_failures: AtomicU64,
    workload: Arc<Workload>,
}

impl ConnectionGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_selector(name, Box::new(BoundedProbe::new()))
    }

    pub fn with_selector(name: impl Into<String>, selector: Box<dyn ConnectionSelector>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(GroupInner::default()),
            selector,
            connect_failures: AtomicU64::new(0),
            workload: Arc::new(Workload::new()),
        }
    }

    /// Register a socket in Disconnected status.
    pub fn insert(
        &self,
        address: &str,
        id: ConnectionId,
        socket: Arc<dyn SocketHandle>,
    ) -> Arc<ConnectionRecord> {
        let record = Arc::new(ConnectionRecord::new(id, address, socket, self.workload.clone()));
        self.inner.write().connections.insert(id, record.clone());
        record
    }

    /// Move a connection to `status`, returning its previous status.
    ///
    /// Entering Connected joins the active pool and, coming from Connecting,
    /// clears the failure counter. Leaving Connected leaves the pool. Leaving
    /// Connecting for anything but Connected counts as a connect failure.
    pub fn change_status(&self, id: ConnectionId, status: ConnectStatus) -> Option<ConnectStatus> {
        self.transition(id, status, true)
    }

    /// Move a connection to Disconnecting because the channel dropped it on
    /// purpose. An unfinished connect is not counted as a failure.
    pub fn retire(&self, id: ConnectionId) -> Option<ConnectStatus> {
        self.transition(id, ConnectStatus::Disconnecting, false)
    }

    fn transition(
        &self,
        id: ConnectionId,
        status: ConnectStatus,
        count_failure: bool,
    ) -> Option<ConnectStatus> {
        let mut inner = self.inner.write();
        let record = inner.connections.get(&id)?.clone();
        let prev = record.swap_status(status);
        if prev == status {
            return Some(prev);
        }

        if status == ConnectStatus::Connected {
            inner.active.push(record);
            if prev == ConnectStatus::Connecting {
                self.connect_failures.store(0, Ordering::Relaxed);
            }
        } else {
            if prev == ConnectStatus::Connected {
                inner.active.retain(|r| r.id != id);
            }
            if count_failure && prev == ConnectStatus::Connecting && status != ConnectStatus::Connecting {
                let failures = self.connect_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(
                    channel = %self.name,
                    connection = %id,
                    failures,
                    "Connect attempt failed"
                );
            }
        }
        Some(prev)
    }

    /// The least loaded active connection by bounded probe.
    pub fn most_idle(&self) -> Option<Arc<ConnectionRecord>> {
        let inner = self.inner.read();
        self.selector.select(&inner.active)
    }

    pub fn add_request(&self, id: ConnectionId) -> bool {
        self.get(id).map(|r| r.add_request()).unwrap_or(false)
    }

    pub fn confirm_request(&self, id: ConnectionId, kind: ConfirmType) -> bool {
        self.get(id).map(|r| r.confirm_request(kind)).unwrap_or(false)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionRecord>> {
        self.inner.read().connections.get(&id).cloned()
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionRecord>> {
        let mut inner = self.inner.write();
        let record = inner.connections.remove(&id)?;
        inner.active.retain(|r| r.id != id);
        Some(record)
    }

    /// Records for `address`, in no particular order.
    pub fn find_by_address(&self, address: &str) -> Vec<Arc<ConnectionRecord>> {
        self.inner
            .read()
            .connections
            .values()
            .filter(|r| r.address == address)
            .cloned()
            .collect()
    }

    /// True if `address` has a connection that is Connecting or Connected.
    pub fn has_live(&self, address: &str) -> bool {
        self.inner.read().connections.values().any(|r| {
            r.address == address
                && matches!(r.status(), ConnectStatus::Connecting | ConnectStatus::Connected)
        })
    }

    pub fn count_with_status(&self, status: ConnectStatus) -> usize {
        self.inner
            .read()
            .connections
            .values()
            .filter(|r| r.status() == status)
            .count()
    }

    /// Close every socket. Returns how many close calls were issued.
    pub fn close_all_sessions(&self) -> usize {
        let snapshot: Vec<Arc<ConnectionRecord>> =
            self.inner.read().connections.values().cloned().collect();

        for record in &snapshot {
            record.socket().close();
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_len(&self) -> usize {
        self.inner.read().active.len()
    }

    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    /// Counters summed over every connection ever registered.
    pub fn workload(&self) -> &Workload {
        &self.workload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::TransportEvents;
    use bytes::Bytes;
    use std::sync::Mutex;

    /// Socket whose close calls straight back into the group.
    struct ReentrantSocket {
        group: Mutex<Option<Arc<ConnectionGroup>>>,
        id: Mutex<Option<ConnectionId>>,
    }

    impl SocketHandle for ReentrantSocket {
        fn address(&self) -> &str {
            "10.0.0.1:80"
        }
        fn connect(&self, _: Arc<dyn TransportEvents>) -> Result<(), TransportError> {
            Ok(())
        }
        fn send(&self, _: Bytes) -> bool {
            true
        }
        fn close(&self) {
            let group = self.group.lock().unwrap().take();
            let id = *self.id.lock().unwrap();
            if let (Some(group), Some(id)) = (group, id) {
                group.remove(id);
            }
        }
    }

    fn socket() -> Arc<ReentrantSocket> {
        Arc::new(ReentrantSocket { group: Mutex::new(None), id: Mutex::new(None) })
    }

    #[test]
    fn test_active_pool_tracks_connected() {
        let group = ConnectionGroup::new("svc");
        let id = ConnectionId::new();
        group.insert("10.0.0.1:80", id, socket());
        assert_eq!(group.active_len(), 0);
        assert!(group.most_idle().is_none());

        group.change_status(id, ConnectStatus::Connecting);
        assert_eq!(group.change_status(id, ConnectStatus::Connected), Some(ConnectStatus::Connecting));
        assert_eq!(group.active_len(), 1);
        assert_eq!(group.most_idle().unwrap().id, id);

        group.change_status(id, ConnectStatus::Disconnected);
        assert_eq!(group.active_len(), 0);
    }

    #[test]
    fn test_connect_failures_counted_and_reset() {
        let group = ConnectionGroup::new("svc");
        for _ in 0..2 {
            let id = ConnectionId::new();
            group.insert("10.0.0.1:80", id, socket());
            group.change_status(id, ConnectStatus::Connecting);
            group.change_status(id, ConnectStatus::Disconnected);
            group.remove(id);
        }
        assert_eq!(group.connect_failures(), 2);

        let id = ConnectionId::new();
        group.insert("10.0.0.1:80", id, socket());
        group.change_status(id, ConnectStatus::Connecting);
        group.change_status(id, ConnectStatus::Connected);
        assert_eq!(group.connect_failures(), 0);
    }

    #[test]
    fn test_retired_connect_is_not_a_failure() {
        let group = ConnectionGroup::new("svc");
        let id = ConnectionId::new();
        group.insert("10.0.0.1:80", id, socket());
        group.change_status(id, ConnectStatus::Connecting);

        assert_eq!(group.retire(id), Some(ConnectStatus::Connecting));
        group.change_status(id, ConnectStatus::Disconnected);
        assert_eq!(group.connect_failures(), 0);
        assert!(!group.has_live("10.0.0.1:80"));
    }

    #[test]
    fn test_counters_require_connected() {
        let group = ConnectionGroup::new("svc");
        let id = ConnectionId::new();
        group.insert("10.0.0.1:80", id, socket());
        assert!(!group.add_request(id));

        group.change_status(id, ConnectStatus::Connected);
        assert!(group.add_request(id));
        assert!(group.add_request(id));
        assert!(group.confirm_request(id, ConfirmType::Response));
        assert_eq!(group.get(id).unwrap().pending(), 1);
        assert_eq!(group.workload().pending(), 1);
        assert!(!group.add_request(ConnectionId::new()));
    }

    #[test]
    fn test_close_all_sessions_survives_reentrant_removal() {
        let group = Arc::new(ConnectionGroup::new("svc"));
        for _ in 0..3 {
            let id = ConnectionId::new();
            let sock = socket();
            *sock.group.lock().unwrap() = Some(group.clone());
            *sock.id.lock().unwrap() = Some(id);
            group.insert("10.0.0.1:80", id, sock);
            group.change_status(id, ConnectStatus::Connected);
        }

        assert_eq!(group.close_all_sessions(), 3);
        assert!(group.is_empty());
        assert_eq!(group.active_len(), 0);
    }

    #[test]
    fn test_has_live_ignores_disconnected() {
        let group = ConnectionGroup::new("svc");
        let id = ConnectionId::new();
        group.insert("10.0.0.2:80", id, socket());
        assert!(!group.has_live("10.0.0.2:80"));
        group.change_status(id, ConnectStatus::Connecting);
        assert!(group.has_live("10.0.0.2:80"));
        assert!(!group.has_live("10.0.0.3:80"));
        assert_eq!(group.find_by_address("10.0.0.2:80").len(), 1);
    }
}
