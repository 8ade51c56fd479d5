//! Service channel.
//!
//! # Responsibilities
//! - Drive connect, reconnect and disconnect for one service's addresses
//! - Route calls to the most idle connection, or park them undispatched
//! - Match responses to requests and complete them
//! - Follow address set changes without disturbing unchanged addresses
//! - Periodic maintenance: due reconnects, idle close, timeout sweep
//!
//! # Data Flow
//! ```text
//! send_request ──▶ connect_all (first call) ──▶ most_idle ──▶ queue.send_request ──▶ socket
//!                                                   └─ none ──▶ queue (undispatched)
//!
//! session ready ──▶ on_new_session ──▶ redispatch
//! frame         ──▶ on_response    ──▶ queue.remove_request ──▶ executor(completion)
//! socket closed ──▶ on_close       ──▶ release (redispatch-eligible) ──▶ reconnect in 3s
//! tick          ──▶ advance        ──▶ reconnects / idle close / timeouts / redispatch
//! ```
//!
//! # Design Decisions
//! - The state lock encloses group and queue locks; those two never nest
//! - Sockets are closed and completions fire only after the state lock is
//!   released (a close may re-enter `on_close` synchronously)
//! - The channel status is sticky: it stays Connecting/Connected until an
//!   explicit close, which is what "connect intent" means below
//! - Reconnect delay is fixed, there is no backoff

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{RwLock, RwLockWriteGuard};
use rand::seq::SliceRandom;

use crate::channel::handle::CallOptions;
use crate::channel::session::RpcSession;
use crate::channel::state::{ChannelState, ScheduledReconnect};
use crate::config::ClientConfig;
use crate::error::{ProtocolError, RpcError};
use crate::load_balancer::{
    ConfirmType, ConnectStatus, ConnectionGroup, ConnectionId, ConnectionRecord,
};
use crate::observability::metrics;
use crate::protocol::{handshake_request, CompressType, Envelope, MetaKind};
use crate::queue::{Completion, PendingRequest, RequestQueue, SendOutcome};
use crate::resolver::{diff_sorted, normalize};
use crate::runtime::{Clock, Executor, Tick};
use crate::transport::Transport;

pub struct ServiceChannel {
    name: String,
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
    state: RwLock<ChannelState>,
    group: ConnectionGroup,
    queue: RequestQueue,
    next_sequence: AtomicU64,
    last_send_ms: AtomicU64,
    handshake: Bytes,
    weak_self: Weak<ServiceChannel>,
}

impl ServiceChannel {
    pub fn new(
        name: impl Into<String>,
        addresses: Vec<String>,
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        executor: Arc<dyn Executor>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let name = name.into();
        let handshake = handshake_request(&config.channel.rpc_path, &CompressType::SUPPORTED);
        let now = clock.now_ms();

        Arc::new_cyclic(|weak_self| Self {
            group: ConnectionGroup::new(name.clone()),
            queue: RequestQueue::new(name.clone(), executor.clone()),
            state: RwLock::new(ChannelState::new(normalize(addresses))),
            name,
            config,
            transport,
            executor,
            clock,
            next_sequence: AtomicU64::new(1),
            last_send_ms: AtomicU64::new(now),
            handshake,
            weak_self: weak_self.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ConnectStatus {
        self.state.read().status
    }

    pub fn is_closing(&self) -> bool {
        self.state.read().closing
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.read().shutdown
    }

    pub fn addresses(&self) -> Vec<String> {
        self.state.read().addresses.clone()
    }

    pub fn scheduled_reconnects(&self) -> Vec<ScheduledReconnect> {
        self.state.read().scheduled.clone()
    }

    pub fn group(&self) -> &ConnectionGroup {
        &self.group
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Requests currently owned by the queue.
    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    /// Issue one call. Never blocks on network I/O; the outcome is delivered
    /// exactly once through `completion`.
    pub fn send_request(
        &self,
        method: &str,
        payload: Bytes,
        options: &CallOptions,
        completion: Completion,
    ) {
        metrics::record_request(&self.name);

        let limit = self.config.channel.max_request_size;
        if payload.len() > limit {
            self.fail(completion, RpcError::RequestTooLarge { size: payload.len(), limit });
            return;
        }

        let now = self.clock.now_ms();
        self.last_send_ms.store(now, Ordering::Relaxed);
        let sequence_id = self.next_sequence.fetch_add(1, Ordering::Relaxed);

        let configured = self.config.compression.for_method(method);
        let timeout_ms = options
            .timeout
            .map(|t| t.as_millis() as u64)
            .unwrap_or(self.config.channel.default_timeout_ms)
            .max(1);
        let req = PendingRequest::new(sequence_id, method, payload, timeout_ms, now, completion)
            .with_compression(
                options.compress.unwrap_or(configured.request),
                options.response_compress.or(configured.response),
            );

        self.connect_all(now);

        let state = self.state.read();
        if state.shutdown {
            drop(state);
            self.queue.complete(req, Err(RpcError::ChannelShutdown));
            metrics::record_completion(&self.name, RpcError::ChannelShutdown.outcome());
            return;
        }

        let req = match self.group.most_idle() {
            Some(record) => match self.queue.send_request(&record, req) {
                SendOutcome::Sent | SendOutcome::Completed => return,
                SendOutcome::Rejected(req) => req,
            },
            None => req,
        };
        tracing::trace!(channel = %self.name, sequence_id, "No idle connection, request parked");
        if let Err(e) = self.queue.add_request(req) {
            drop(state);
            self.queue.fail_internal(e);
        }
    }

    /// Start connecting to every address unless the channel already has
    /// connect intent or is still tearing sessions down. Idempotent under
    /// concurrent calls.
    pub fn connect_all(&self, now_ms: u64) {
        {
            let state = self.state.read();
            if !Self::may_connect_all(&state) {
                return;
            }
        }
        let mut state = self.state.write();
        if !Self::may_connect_all(&state) {
            return;
        }
        self.connect_all_locked(&mut state, now_ms);
    }

    /// A close in progress reconnects from `on_close` once its last session
    /// is gone.
    fn may_connect_all(state: &ChannelState) -> bool {
        !state.shutdown
            && !state.has_connect_intent()
            && state.status != ConnectStatus::Disconnecting
    }

    fn connect_all_locked(&self, state: &mut ChannelState, now_ms: u64) {
        state.closing = false;
        state.status = ConnectStatus::Connecting;

        let mut order = state.addresses.clone();
        order.shuffle(&mut rand::thread_rng());
        if order.is_empty() {
            tracing::warn!(channel = %self.name, "No server address to connect to");
        } else {
            tracing::info!(channel = %self.name, servers = order.len(), "Connecting to servers");
        }
        for address in &order {
            self.start_connect(state, address, now_ms);
        }
    }

    fn start_connect(&self, state: &mut ChannelState, address: &str, now_ms: u64) {
        if state.closing {
            return;
        }
        let retry_at = now_ms + self.config.channel.reconnect_delay_ms;

        let socket = match self.transport.create(address) {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!(channel = %self.name, address = %address, error = %e, "Failed to create socket");
                state.schedule_reconnect(retry_at, address);
                return;
            }
        };

        let id = ConnectionId::new();
        self.group.insert(address, id, socket.clone());
        self.group.change_status(id, ConnectStatus::Connecting);

        let session = Arc::new(RpcSession::new(
            self.weak_self.clone(),
            id,
            self.handshake.clone(),
            self.config.transport.max_frame_size,
        ));
        match socket.connect(session) {
            Ok(()) => {
                tracing::debug!(channel = %self.name, connection = %id, address = %address, "Connecting");
                metrics::record_connection_event(&self.name, "connect");
            }
            Err(e) => {
                tracing::warn!(channel = %self.name, address = %address, error = %e, "Connect failed immediately");
                self.group.change_status(id, ConnectStatus::Disconnected);
                self.group.remove(id);
                state.schedule_reconnect(retry_at, address);
            }
        }
    }

    /// A socket finished its handshake and can carry requests.
    ///
    /// Returns `false` when the channel no longer wants the connection; the
    /// caller closes it.
    pub fn on_new_session(&self, id: ConnectionId) -> bool {
        let mut state = self.state.write();
        if state.closing || self.group.get(id).is_none() {
            return false;
        }
        self.group.change_status(id, ConnectStatus::Connected);
        state.status = ConnectStatus::Connected;
        tracing::info!(channel = %self.name, connection = %id, "Rpc session established");
        metrics::record_connection_event(&self.name, "connected");

        let state = RwLockWriteGuard::downgrade(state);
        self.redispatch_locked(&state);
        true
    }

    /// A response frame arrived on connection `id`.
    pub fn on_response(&self, id: ConnectionId, envelope: Envelope) -> Result<(), ProtocolError> {
        let sequence_id = envelope.meta.sequence_id;
        let (failed, error_code, reason) = match &envelope.meta.kind {
            MetaKind::Response { failed, error_code, reason } => (*failed, *error_code, reason.clone()),
            MetaKind::Request { .. } => return Err(ProtocolError::UnexpectedRequest),
        };

        let req = match self.queue.remove_request(sequence_id) {
            Ok(Some(req)) => req,
            Ok(None) => {
                tracing::debug!(
                    channel = %self.name,
                    connection = %id,
                    sequence_id,
                    "Response for unknown request, maybe it has expired"
                );
                return Ok(());
            }
            Err(e) => {
                self.queue.fail_internal(e);
                return Ok(());
            }
        };
        self.group
            .confirm_request(req.connection.unwrap_or(id), ConfirmType::Response);

        let result = if failed {
            let reason = if reason.is_empty() { "unknown error".to_string() } else { reason };
            Err(RpcError::Remote { code: error_code, reason })
        } else {
            envelope
                .open(self.config.transport.max_frame_size)
                .map_err(|e| RpcError::Decompress(e.to_string()))
        };
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        metrics::record_completion(&self.name, outcome);
        self.queue.complete(req, result);
        Ok(())
    }

    /// Connection `id` is gone. Its requests become undispatched, the
    /// address is retried later unless the channel is closing.
    pub fn on_close(&self, id: ConnectionId, error: Option<&std::io::Error>) {
        let now = self.clock.now_ms();
        {
            let mut state = self.state.write();
            let Some(record) = self.group.get(id) else {
                return;
            };
            let was = record.status();
            let released = self.take_away(&record);
            self.group.change_status(id, ConnectStatus::Disconnected);
            self.group.remove(id);

            match error {
                Some(e) => tracing::warn!(
                    channel = %self.name,
                    connection = %id,
                    address = %record.address,
                    status = %was,
                    released,
                    error = %e,
                    "Connection closed"
                ),
                None => tracing::info!(
                    channel = %self.name,
                    connection = %id,
                    address = %record.address,
                    status = %was,
                    released,
                    "Connection closed"
                ),
            }
            metrics::record_connection_event(&self.name, "closed");

            if state.closing {
                if self.group.is_empty() {
                    state.status = ConnectStatus::Disconnected;
                    tracing::info!(channel = %self.name, "All sessions closed");
                }
            } else if state.has_connect_intent() && state.is_listed(&record.address) {
                state.schedule_reconnect(now + self.config.channel.reconnect_delay_ms, &record.address);
                if state.status == ConnectStatus::Connected && self.group.active_len() == 0 {
                    state.status = ConnectStatus::Connecting;
                }
            }

            // Requests that arrived during an idle close still need a home.
            if state.status == ConnectStatus::Disconnected
                && !state.shutdown
                && self.queue.undispatched_len() > 0
            {
                self.connect_all_locked(&mut state, now);
            }
        }
        self.redispatch();
    }

    /// Apply a new address set from the resolver.
    pub fn on_address_changed(&self, addresses: &[String]) {
        let now = self.clock.now_ms();
        let new = normalize(addresses.iter().cloned());
        let mut to_close: Vec<Arc<ConnectionRecord>> = Vec::new();
        {
            let mut state = self.state.write();
            if state.shutdown {
                return;
            }
            let diff = diff_sorted(&state.addresses, &new);
            if diff.is_empty() {
                return;
            }
            tracing::info!(
                channel = %self.name,
                added = ?diff.added,
                removed = ?diff.removed,
                "Server addresses changed"
            );
            state.addresses = new;

            if state.has_connect_intent() {
                for address in &diff.added {
                    self.start_connect(&mut state, address, now);
                }
            }
            for address in &diff.removed {
                state.unschedule(address);
                for record in self.group.find_by_address(address) {
                    self.take_away(&record);
                    self.group.retire(record.id);
                    to_close.push(record);
                }
            }
        }

        for record in to_close {
            record.socket().close();
        }
        self.redispatch();
    }

    /// Close every session. The next call reconnects.
    pub fn close_all_sessions(&self) {
        {
            let mut state = self.state.write();
            self.begin_close(&mut state);
        }
        self.group.close_all_sessions();
    }

    /// Terminal: close everything and fail whatever is still queued.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            self.begin_close(&mut state);
        }
        self.group.close_all_sessions();
        let canceled = self.queue.cancel_all(RpcError::ChannelShutdown);
        tracing::info!(channel = %self.name, canceled, "Channel shut down");
    }

    fn begin_close(&self, state: &mut ChannelState) {
        state.closing = true;
        state.scheduled.clear();
        state.status = if self.group.is_empty() {
            ConnectStatus::Disconnected
        } else {
            ConnectStatus::Disconnecting
        };
    }

    /// Move every request off `record` into the undispatched list.
    fn take_away(&self, record: &ConnectionRecord) -> usize {
        let released = self.queue.release_connection(record.id, false);
        for _ in 0..released {
            record.confirm_request(ConfirmType::TakeAway);
        }
        if released > 0 {
            metrics::record_redispatch(&self.name, released);
        }
        released
    }

    /// Hand undispatched requests to idle connections while both exist.
    pub fn redispatch(&self) -> usize {
        let state = self.state.read();
        self.redispatch_locked(&state)
    }

    /// Holding the state lock keeps `shutdown` from draining the queue while
    /// a request is popped and not yet back in it.
    fn redispatch_locked(&self, state: &ChannelState) -> usize {
        if state.shutdown {
            return 0;
        }
        let mut sent = 0;
        while self.queue.undispatched_len() > 0 {
            let Some(record) = self.group.most_idle() else {
                break;
            };
            let Some(req) = self.queue.pop_first_undispatched() else {
                break;
            };
            match self.queue.send_request(&record, req) {
                SendOutcome::Sent => sent += 1,
                SendOutcome::Completed => {}
                SendOutcome::Rejected(req) => {
                    if let Err(e) = self.queue.requeue_front(req) {
                        self.queue.fail_internal(e);
                    }
                    break;
                }
            }
        }
        if sent > 0 {
            tracing::debug!(channel = %self.name, sent, "Redispatched requests");
        }
        sent
    }

    fn reconnect_due(&self, now_ms: u64) {
        let mut state = self.state.write();
        if state.scheduled.is_empty() {
            return;
        }
        if !state.has_connect_intent() {
            state.scheduled.clear();
            return;
        }
        for address in state.take_due(now_ms) {
            if !state.is_listed(&address) || self.group.has_live(&address) {
                continue;
            }
            tracing::info!(channel = %self.name, address = %address, "Reconnecting");
            metrics::record_connection_event(&self.name, "reconnect");
            self.start_connect(&mut state, &address, now_ms);
        }
    }

    fn close_if_idle(&self, now_ms: u64) {
        let idle_for = now_ms.saturating_sub(self.last_send_ms.load(Ordering::Relaxed));
        let should_close = {
            let state = self.state.read();
            state.status == ConnectStatus::Connected
                && !state.closing
                && idle_for >= self.config.channel.idle_timeout_ms
                && self.queue.is_empty()
        };
        if should_close {
            tracing::info!(channel = %self.name, idle_ms = idle_for, "Closing idle channel");
            metrics::record_connection_event(&self.name, "idle_close");
            self.close_all_sessions();
        }
    }

    fn fail(&self, completion: Completion, error: RpcError) {
        metrics::record_completion(&self.name, error.outcome());
        self.executor
            .execute(Box::new(move || completion.complete(Err(error))));
    }
}

impl Tick for ServiceChannel {
    fn advance(&self, now_ms: u64) {
        self.reconnect_due(now_ms);
        self.close_if_idle(now_ms);

        for connection in self.queue.on_timer(now_ms) {
            metrics::record_completion(&self.name, RpcError::Timeout.outcome());
            if let Some(id) = connection {
                self.group.confirm_request(id, ConfirmType::Timeout);
            }
        }

        if self.queue.undispatched_len() > 0 && self.group.active_len() > 0 {
            self.redispatch();
        }
        metrics::record_pending(&self.name, self.queue.len());
    }
}

impl std::fmt::Debug for ServiceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceChannel")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("connections", &self.group.len())
            .field("pending", &self.queue.len())
            .finish()
    }
}
