//! User-facing channel handle.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::channel::service::ServiceChannel;
use crate::error::RpcError;
use crate::load_balancer::ConnectStatus;
use crate::protocol::CompressType;
use crate::queue::{Completion, RpcResult};

/// Per-call overrides. Unset fields fall back to the client configuration.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub compress: Option<CompressType>,
    pub response_compress: Option<CompressType>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn compress(mut self, request: CompressType, response: Option<CompressType>) -> Self {
        self.compress = Some(request);
        self.response_compress = response;
        self
    }
}

/// Cheap to clone. While any handle is alive its channel stays out of the
/// idle cache.
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<ServiceChannel>,
}

impl RpcChannel {
    pub(crate) fn new(inner: Arc<ServiceChannel>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn status(&self) -> ConnectStatus {
        self.inner.status()
    }

    pub fn service(&self) -> &Arc<ServiceChannel> {
        &self.inner
    }

    /// Call `method` and wait for its outcome without blocking the thread.
    pub async fn call(
        &self,
        method: &str,
        payload: impl Into<Bytes>,
        options: CallOptions,
    ) -> Result<Bytes, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.inner.send_request(
            method,
            payload.into(),
            &options,
            Completion::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await
            .unwrap_or_else(|_| Err(RpcError::Internal("completion dropped".into())))
    }

    /// Call `method` and block the current thread until it completes.
    pub fn call_blocking(
        &self,
        method: &str,
        payload: impl Into<Bytes>,
        options: CallOptions,
    ) -> Result<Bytes, RpcError> {
        let (tx, rx) = flume::bounded(1);
        self.inner.send_request(
            method,
            payload.into(),
            &options,
            Completion::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.recv()
            .unwrap_or_else(|_| Err(RpcError::Internal("completion dropped".into())))
    }

    /// Call `method`; `done` runs on the worker pool with the outcome.
    pub fn call_with_callback<F>(
        &self,
        method: &str,
        payload: impl Into<Bytes>,
        options: CallOptions,
        done: F,
    ) where
        F: FnOnce(RpcResult) + Send + 'static,
    {
        self.inner
            .send_request(method, payload.into(), &options, Completion::new(done));
    }
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&*self.inner, f)
    }
}
