//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::TransportError;
use crate::load_balancer::{ConnectStatus, ConnectionGroup, ConnectionId, ConnectionRecord};
use crate::queue::{Completion, PendingRequest, RpcResult};
use crate::transport::{SocketHandle, Transport, TransportEvents};

/// Socket that records writes and never delivers events.
pub struct RecordingSocket {
    address: String,
    pub sent: Mutex<Vec<Bytes>>,
    pub writable: AtomicBool,
    pub closes: AtomicUsize,
}

impl RecordingSocket {
    pub fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            sent: Mutex::new(Vec::new()),
            writable: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
        })
    }
}

impl SocketHandle for RecordingSocket {
    fn address(&self) -> &str {
        &self.address
    }

    fn connect(&self, _events: Arc<dyn TransportEvents>) -> Result<(), TransportError> {
        Ok(())
    }

    fn send(&self, data: Bytes) -> bool {
        if !self.writable.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push(data);
        true
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn connected(group: &ConnectionGroup, address: &str) -> (Arc<ConnectionRecord>, Arc<RecordingSocket>) {
    let socket = RecordingSocket::new(address);
    let record = group.insert(address, ConnectionId::new(), socket.clone());
    group.change_status(record.id, ConnectStatus::Connecting);
    group.change_status(record.id, ConnectStatus::Connected);
    (record, socket)
}

/// Collects every completion so tests can assert exactly-once delivery.
#[derive(Clone, Default)]
pub struct Outcomes(Arc<Mutex<Vec<(u64, RpcResult)>>>);

impl Outcomes {
    pub fn completion(&self, sequence_id: u64) -> Completion {
        let sink = self.0.clone();
        Completion::new(move |result| sink.lock().push((sequence_id, result)))
    }

    pub fn request(&self, sequence_id: u64, now_ms: u64, timeout_ms: u64) -> PendingRequest {
        PendingRequest::new(
            sequence_id,
            "test.Service.Call",
            Bytes::from(format!("payload-{}", sequence_id)),
            timeout_ms,
            now_ms,
            self.completion(sequence_id),
        )
    }

    pub fn take(&self) -> Vec<(u64, RpcResult)> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

/// Socket whose transport events are delivered by the test.
pub struct MockSocket {
    pub inner: Arc<RecordingSocket>,
    events: Mutex<Option<Arc<dyn TransportEvents>>>,
}

impl MockSocket {
    pub fn deliver_connected(&self) {
        if let Some(events) = self.events() {
            events.on_connected(self);
        }
    }

    pub fn deliver_data(&self, data: &[u8]) {
        if let Some(events) = self.events() {
            events.on_data(self, data);
        }
    }

    pub fn deliver_closed(&self, error: Option<std::io::Error>) {
        if let Some(events) = self.events.lock().take() {
            events.on_closed(self, error);
        }
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.inner.sent.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    fn events(&self) -> Option<Arc<dyn TransportEvents>> {
        self.events.lock().clone()
    }
}

impl SocketHandle for MockSocket {
    fn address(&self) -> &str {
        self.inner.address()
    }

    fn connect(&self, events: Arc<dyn TransportEvents>) -> Result<(), TransportError> {
        *self.events.lock() = Some(events);
        Ok(())
    }

    fn send(&self, data: Bytes) -> bool {
        self.inner.send(data)
    }

    fn close(&self) {
        self.inner.close();
    }
}

/// Hands out [`MockSocket`]s and remembers them in creation order.
#[derive(Default)]
pub struct MockTransport {
    pub sockets: Mutex<Vec<Arc<MockSocket>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<Arc<MockSocket>> {
        self.sockets.lock().clone()
    }

    pub fn for_address(&self, address: &str) -> Vec<Arc<MockSocket>> {
        self.created()
            .into_iter()
            .filter(|s| s.address() == address)
            .collect()
    }
}

impl Transport for MockTransport {
    fn create(&self, address: &str) -> Result<Arc<dyn SocketHandle>, TransportError> {
        let socket = Arc::new(MockSocket {
            inner: RecordingSocket::new(address),
            events: Mutex::new(None),
        });
        self.sockets.lock().push(socket.clone());
        Ok(socket)
    }
}
