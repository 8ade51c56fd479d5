//! Outstanding request tracking.
//!
//! Every request is owned by the queue from the moment it is sent or
//! enqueued until exactly one terminal event takes it out: a response, a
//! timeout, a canceling connection release, or channel shutdown.

pub mod request;
pub mod request_queue;

pub use request::{Completion, PendingRequest, RpcResult};
pub use request_queue::{RequestQueue, SendOutcome};
