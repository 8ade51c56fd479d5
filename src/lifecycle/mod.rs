//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! RpcClient::shutdown (or drop)
//!     → Shutdown::trigger
//!     → TickDriver exits its loop
//!     → every channel: close sessions, fail queued requests
//!     → worker pool drains and joins
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
