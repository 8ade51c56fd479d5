//! A request waiting for its response.

use std::fmt;

use bytes::Bytes;

use crate::error::RpcError;
use crate::load_balancer::ConnectionId;
use crate::protocol::{CompressType, Envelope, RpcMeta};

pub type RpcResult = Result<Bytes, RpcError>;

/// Completion handle. Consumed by the single call that finishes the request.
pub struct Completion(Box<dyn FnOnce(RpcResult) + Send + 'static>);

impl Completion {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(RpcResult) + Send + 'static,
    {
        Self(Box::new(f))
    }

    pub fn complete(self, result: RpcResult) {
        (self.0)(result)
    }
}

pub struct PendingRequest {
    pub sequence_id: u64,
    /// `None` while undispatched.
    pub connection: Option<ConnectionId>,
    pub method: String,
    /// Uncompressed, so the request can be re-encoded on redispatch.
    pub payload: Bytes,
    pub compress: CompressType,
    pub response_compress: Option<CompressType>,
    pub timeout_ms: u64,
    /// Absolute wall-clock deadline.
    pub deadline_ms: u64,
    completion: Completion,
}

impl PendingRequest {
    pub fn new(
        sequence_id: u64,
        method: impl Into<String>,
        payload: Bytes,
        timeout_ms: u64,
        now_ms: u64,
        completion: Completion,
    ) -> Self {
        Self {
            sequence_id,
            connection: None,
            method: method.into(),
            payload,
            compress: CompressType::None,
            response_compress: None,
            timeout_ms,
            deadline_ms: now_ms.saturating_add(timeout_ms),
            completion,
        }
    }

    pub fn with_compression(mut self, compress: CompressType, response: Option<CompressType>) -> Self {
        self.compress = compress;
        self.response_compress = response;
        self
    }

    /// Frame this request for the wire, compressing the payload.
    pub fn encode(&self) -> Result<Bytes, RpcError> {
        let meta = RpcMeta::request(
            self.sequence_id,
            self.method.clone(),
            self.timeout_ms,
            self.compress,
            self.response_compress,
        );
        let envelope = Envelope::seal(meta, &self.payload)
            .map_err(|e| RpcError::Internal(format!("compress with {} failed: {}", self.compress, e)))?;
        envelope
            .encode()
            .map_err(|e| RpcError::Internal(e.to_string()))
    }

    pub fn complete(self, result: RpcResult) {
        self.completion.complete(result)
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("sequence_id", &self.sequence_id)
            .field("connection", &self.connection)
            .field("method", &self.method)
            .field("payload_len", &self.payload.len())
            .field("deadline_ms", &self.deadline_ms)
            .finish()
    }
}
