//! Request queue.
//!
//! # Responsibilities
//! - Correlate outstanding requests by sequence id
//! - Index each request under its connection or in the undispatched list
//! - Expire requests by deadline
//! - Move requests off a dropped connection, or fail them
//!
//! # Data Flow
//! ```text
//! send_request ─┬─ connection known → requests + by_connection + timeouts → socket
//!               └─ none idle        → requests + undispatched + timeouts
//!
//! response          → remove_request(seq)
//! socket closed     → release_connection(conn, cancel)
//! tick              → on_timer(now)
//! idle connection   → pop_first_undispatched → send_request
//! ```
//!
//! # Design Decisions
//! - One mutex serializes every structural change
//! - Completions are submitted to the executor only after the mutex is
//!   released
//! - The timeout heap is lazily cleaned: entries for requests that already
//!   left the queue are skipped when they surface

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{QueueError, RpcError};
use crate::load_balancer::{ConfirmType, ConnectionId, ConnectionRecord};
use crate::queue::request::{PendingRequest, RpcResult};
use crate::runtime::Executor;

/// Result of [`RequestQueue::send_request`].
#[derive(Debug)]
pub enum SendOutcome {
    /// Bytes queued on the socket and the request indexed under it.
    Sent,
    /// The request could not be framed and has been failed.
    Completed,
    /// The connection refused it; the caller still owns the request.
    Rejected(PendingRequest),
}

#[derive(Default)]
struct QueueInner {
    requests: HashMap<u64, PendingRequest>,
    by_connection: BTreeSet<(ConnectionId, u64)>,
    undispatched: VecDeque<u64>,
    timeouts: BinaryHeap<Reverse<(u64, u64)>>,
}

impl QueueInner {
    fn insert(&mut self, req: PendingRequest, front: bool) -> Result<(), QueueError> {
        let seq = req.sequence_id;
        if self.requests.contains_key(&seq) {
            return Err(QueueError::DuplicateSequence(Box::new(req)));
        }
        match req.connection {
            Some(conn) => {
                self.by_connection.insert((conn, seq));
            }
            None if front => self.undispatched.push_front(seq),
            None => self.undispatched.push_back(seq),
        }
        self.timeouts.push(Reverse((req.deadline_ms, seq)));
        self.requests.insert(seq, req);
        Ok(())
    }

    fn remove(&mut self, seq: u64) -> Result<Option<PendingRequest>, QueueError> {
        let Some(req) = self.requests.remove(&seq) else {
            return Ok(None);
        };
        let indexed = match req.connection {
            Some(conn) => self.by_connection.remove(&(conn, seq)),
            None => match self.undispatched.iter().position(|&s| s == seq) {
                Some(pos) => self.undispatched.remove(pos).is_some(),
                None => false,
            },
        };
        if !indexed {
            return Err(QueueError::MissingIndexEntry(Box::new(req)));
        }
        Ok(Some(req))
    }
}

pub struct RequestQueue {
    name: String,
    inner: Mutex<QueueInner>,
    executor: Arc<dyn Executor>,
}

impl RequestQueue {
    pub fn new(name: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(QueueInner::default()),
            executor,
        }
    }

    /// Track a request. A request with a connection assigned goes into the
    /// connection index, otherwise to the back of the undispatched list.
    pub fn add_request(&self, req: PendingRequest) -> Result<(), QueueError> {
        self.inner.lock().insert(req, false)
    }

    /// Put a request back at the head of the undispatched list.
    pub fn requeue_front(&self, mut req: PendingRequest) -> Result<(), QueueError> {
        req.connection = None;
        self.inner.lock().insert(req, true)
    }

    /// Take a request out of both indices, typically on response arrival.
    pub fn remove_request(&self, sequence_id: u64) -> Result<Option<PendingRequest>, QueueError> {
        self.inner.lock().remove(sequence_id)
    }

    /// Remove every request indexed under `conn`.
    ///
    /// Without `cancel` they return to the undispatched list in sequence
    /// order. With `cancel` they fail with [`RpcError::ConnectionClosed`].
    /// Returns how many requests left the connection.
    pub fn release_connection(&self, conn: ConnectionId, cancel: bool) -> usize {
        let mut failed = Vec::new();
        let released = {
            let mut inner = self.inner.lock();
            let keys: Vec<(ConnectionId, u64)> = inner
                .by_connection
                .range((conn, 0)..=(conn, u64::MAX))
                .copied()
                .collect();

            for key in &keys {
                inner.by_connection.remove(key);
                let seq = key.1;
                if cancel {
                    if let Some(req) = inner.requests.remove(&seq) {
                        failed.push(req);
                    }
                } else if let Some(req) = inner.requests.get_mut(&seq) {
                    req.connection = None;
                    inner.undispatched.push_back(seq);
                }
            }
            keys.len()
        };

        if released > 0 {
            tracing::debug!(
                channel = %self.name,
                connection = %conn,
                released,
                cancel,
                "Released requests from connection"
            );
        }
        for req in failed {
            self.complete(req, Err(RpcError::ConnectionClosed));
        }
        released
    }

    pub fn pop_first_undispatched(&self) -> Option<PendingRequest> {
        let mut inner = self.inner.lock();
        while let Some(seq) = inner.undispatched.pop_front() {
            if let Some(req) = inner.requests.remove(&seq) {
                return Some(req);
            }
        }
        None
    }

    /// Fail every request whose deadline is at or before `now_ms`.
    ///
    /// Returns the connection each expired request was assigned to, so the
    /// caller can update that connection's counters.
    pub fn on_timer(&self, now_ms: u64) -> Vec<Option<ConnectionId>> {
        let mut expired = Vec::new();
        {
            let mut inner = self.inner.lock();
            while let Some(&Reverse((deadline, seq))) = inner.timeouts.peek() {
                if deadline > now_ms {
                    break;
                }
                inner.timeouts.pop();

                let current = match inner.requests.get(&seq) {
                    Some(req) if req.deadline_ms == deadline => req.connection,
                    _ => continue,
                };
                match current {
                    Some(conn) => {
                        inner.by_connection.remove(&(conn, seq));
                    }
                    None => inner.undispatched.retain(|&s| s != seq),
                }
                if let Some(req) = inner.requests.remove(&seq) {
                    expired.push(req);
                }
            }
        }

        let mut connections = Vec::with_capacity(expired.len());
        for req in expired {
            tracing::debug!(
                channel = %self.name,
                sequence_id = req.sequence_id,
                method = %req.method,
                dispatched = req.connection.is_some(),
                "Request timed out"
            );
            connections.push(req.connection);
            self.complete(req, Err(RpcError::Timeout));
        }
        connections
    }

    /// Frame `req`, then index it under `record` and write it as one step.
    pub fn send_request(&self, record: &ConnectionRecord, mut req: PendingRequest) -> SendOutcome {
        let bytes = match req.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(channel = %self.name, sequence_id = req.sequence_id, error = %e, "Failed to encode request");
                self.complete(req, Err(e));
                return SendOutcome::Completed;
            }
        };
        let seq = req.sequence_id;

        let mut inner = self.inner.lock();
        if !record.add_request() {
            return SendOutcome::Rejected(req);
        }
        req.connection = Some(record.id);
        if let Err(e) = inner.insert(req, false) {
            drop(inner);
            record.confirm_request(ConfirmType::Canceled);
            self.fail_internal(e);
            return SendOutcome::Completed;
        }

        if !record.socket().send(bytes) {
            record.confirm_request(ConfirmType::TakeAway);
            return match inner.remove(seq) {
                Ok(Some(mut req)) => {
                    req.connection = None;
                    SendOutcome::Rejected(req)
                }
                Ok(None) => SendOutcome::Completed,
                Err(e) => {
                    drop(inner);
                    self.fail_internal(e);
                    SendOutcome::Completed
                }
            };
        }
        SendOutcome::Sent
    }

    /// Fail everything still queued.
    pub fn cancel_all(&self, error: RpcError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut inner = self.inner.lock();
            inner.by_connection.clear();
            inner.undispatched.clear();
            inner.timeouts.clear();
            let mut all: Vec<_> = inner.requests.drain().map(|(_, req)| req).collect();
            all.sort_by_key(|req| req.sequence_id);
            all
        };
        let count = drained.len();
        for req in drained {
            self.complete(req, Err(error.clone()));
        }
        count
    }

    /// Surface a queue invariant violation to the caller it belongs to.
    pub fn fail_internal(&self, error: QueueError) {
        tracing::error!(channel = %self.name, error = %error, "Request queue invariant violated");
        let message = error.to_string();
        self.complete(error.into_request(), Err(RpcError::Internal(message)));
    }

    pub fn complete(&self, req: PendingRequest, result: RpcResult) {
        self.executor.execute(Box::new(move || req.complete(result)));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn undispatched_len(&self) -> usize {
        self.inner.lock().undispatched.len()
    }

    pub fn undispatched_ids(&self) -> Vec<u64> {
        self.inner.lock().undispatched.iter().copied().collect()
    }

    pub fn connection_len(&self, conn: ConnectionId) -> usize {
        self.inner
            .lock()
            .by_connection
            .range((conn, 0)..=(conn, u64::MAX))
            .count()
    }

    /// `None` if not queued; `Some(None)` if undispatched.
    pub fn assignment_of(&self, sequence_id: u64) -> Option<Option<ConnectionId>> {
        self.inner.lock().requests.get(&sequence_id).map(|r| r.connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::ConnectionGroup;
    use crate::runtime::InlineExecutor;
    use crate::test_support::{connected, Outcomes};
    use std::sync::atomic::Ordering;

    fn queue() -> RequestQueue {
        RequestQueue::new("svc", Arc::new(InlineExecutor))
    }

    #[test]
    fn test_duplicate_sequence_is_rejected() {
        let q = queue();
        let outcomes = Outcomes::default();
        q.add_request(outcomes.request(1, 0, 100)).unwrap();
        let err = q.add_request(outcomes.request(1, 0, 100)).unwrap_err();
        assert!(matches!(err, QueueError::DuplicateSequence(_)));
        assert_eq!(err.into_request().sequence_id, 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_missing_index_entry_is_reported() {
        let q = queue();
        let outcomes = Outcomes::default();
        q.add_request(outcomes.request(4, 0, 100)).unwrap();
        q.inner.lock().undispatched.clear();
        assert!(matches!(q.remove_request(4), Err(QueueError::MissingIndexEntry(_))));
    }

    #[test]
    fn test_send_then_remove_on_response() {
        let group = ConnectionGroup::new("svc");
        let (record, socket) = connected(&group, "10.0.0.1:80");
        let q = queue();
        let outcomes = Outcomes::default();

        assert!(matches!(q.send_request(&record, outcomes.request(7, 0, 100)), SendOutcome::Sent));
        assert_eq!(socket.sent.lock().len(), 1);
        assert_eq!(record.pending(), 1);
        assert_eq!(q.assignment_of(7), Some(Some(record.id)));

        let req = q.remove_request(7).unwrap().unwrap();
        assert_eq!(req.connection, Some(record.id));
        assert!(q.remove_request(7).unwrap().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let group = ConnectionGroup::new("svc");
        let (record, socket) = connected(&group, "10.0.0.1:80");
        socket.writable.store(false, Ordering::SeqCst);
        let q = queue();
        let outcomes = Outcomes::default();

        match q.send_request(&record, outcomes.request(2, 0, 100)) {
            SendOutcome::Rejected(req) => assert_eq!(req.connection, None),
            other => panic!("unexpected {:?}", other),
        }
        assert!(q.is_empty());
        assert_eq!(record.pending(), 0);
        assert_eq!(outcomes.len(), 0);
    }

    #[test]
    fn test_release_without_cancel_requeues_everything() {
        let group = ConnectionGroup::new("svc");
        let (record, _socket) = connected(&group, "10.0.0.1:80");
        let (other, _other_socket) = connected(&group, "10.0.0.2:80");
        let q = queue();
        let outcomes = Outcomes::default();

        for seq in 1..=3 {
            q.send_request(&record, outcomes.request(seq, 0, 1000));
        }
        q.send_request(&other, outcomes.request(4, 0, 1000));
        assert_eq!(record.pending(), 3);

        let released = q.release_connection(record.id, false);
        for _ in 0..released {
            record.confirm_request(ConfirmType::TakeAway);
        }

        assert_eq!(released, 3);
        assert_eq!(q.undispatched_ids(), vec![1, 2, 3]);
        assert_eq!(q.connection_len(record.id), 0);
        assert_eq!(q.connection_len(other.id), 1);
        assert_eq!(record.pending(), 0);
        assert_eq!(outcomes.len(), 0);
    }

    #[test]
    fn test_release_with_cancel_fails_requests() {
        let group = ConnectionGroup::new("svc");
        let (record, _socket) = connected(&group, "10.0.0.1:80");
        let q = queue();
        let outcomes = Outcomes::default();
        q.send_request(&record, outcomes.request(1, 0, 1000));
        q.send_request(&record, outcomes.request(2, 0, 1000));

        assert_eq!(q.release_connection(record.id, true), 2);
        let done = outcomes.take();
        assert_eq!(done.len(), 2);
        assert!(done.iter().all(|(_, r)| r == &Err(RpcError::ConnectionClosed)));
        assert!(q.is_empty());
    }

    #[test]
    fn test_undispatched_timeout_fires_once() {
        let q = queue();
        let outcomes = Outcomes::default();
        q.add_request(outcomes.request(1, 1_000, 50)).unwrap();
        q.add_request(outcomes.request(2, 1_000, 500)).unwrap();

        assert!(q.on_timer(1_049).is_empty());
        assert_eq!(q.on_timer(1_050), vec![None]);
        assert_eq!(q.undispatched_ids(), vec![2]);
        assert!(q.on_timer(1_100).is_empty());

        let done = outcomes.take();
        assert_eq!(done, vec![(1, Err(RpcError::Timeout))]);
    }

    #[test]
    fn test_timeout_follows_redispatch() {
        let group = ConnectionGroup::new("svc");
        let (record, _socket) = connected(&group, "10.0.0.1:80");
        let q = queue();
        let outcomes = Outcomes::default();

        q.add_request(outcomes.request(9, 0, 100)).unwrap();
        let req = q.pop_first_undispatched().unwrap();
        assert!(matches!(q.send_request(&record, req), SendOutcome::Sent));

        assert_eq!(q.on_timer(100), vec![Some(record.id)]);
        assert_eq!(q.connection_len(record.id), 0);
        assert_eq!(q.undispatched_len(), 0);
        assert_eq!(outcomes.take(), vec![(9, Err(RpcError::Timeout))]);
    }

    #[test]
    fn test_redispatch_twice_keeps_single_index_entry() {
        let group = ConnectionGroup::new("svc");
        let (record, _socket) = connected(&group, "10.0.0.1:80");
        let q = queue();
        let outcomes = Outcomes::default();
        q.add_request(outcomes.request(5, 0, 1000)).unwrap();

        let req = q.pop_first_undispatched().unwrap();
        q.send_request(&record, req);
        q.release_connection(record.id, false);
        let req = q.pop_first_undispatched().unwrap();
        q.send_request(&record, req);

        assert_eq!(q.len(), 1);
        assert_eq!(q.connection_len(record.id), 1);
        assert_eq!(q.undispatched_len(), 0);
    }

    #[test]
    fn test_requeue_front_preserves_priority() {
        let q = queue();
        let outcomes = Outcomes::default();
        q.add_request(outcomes.request(1, 0, 1000)).unwrap();
        q.add_request(outcomes.request(2, 0, 1000)).unwrap();
        let first = q.pop_first_undispatched().unwrap();
        q.requeue_front(first).unwrap();
        assert_eq!(q.undispatched_ids(), vec![1, 2]);
    }

    #[test]
    fn test_cancel_all() {
        let q = queue();
        let outcomes = Outcomes::default();
        for seq in 1..=4 {
            q.add_request(outcomes.request(seq, 0, 1000)).unwrap();
        }
        assert_eq!(q.cancel_all(RpcError::ChannelShutdown), 4);
        assert!(q.is_empty());
        assert!(q.on_timer(u64::MAX).is_empty());
        assert_eq!(outcomes.len(), 4);
    }
}
