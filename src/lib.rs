//! Client-side RPC session engine.
//!
//! Calls are multiplexed over a pool of long-lived sessions per service. Each
//! session is a TCP connection upgraded with an HTTP/1.1 handshake and then
//! carries length-prefixed frames in both directions.
//!
//! ```text
//! RpcClient ──▶ RpcChannel (per service) ──▶ ServiceChannel
//!                                              ├─ ConnectionGroup  (who can carry a call)
//!                                              ├─ RequestQueue     (what is in flight)
//!                                              └─ RpcSession × N   (bytes ↔ frames)
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod protocol;
pub mod queue;
pub mod resolver;
pub mod runtime;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use channel::{CallOptions, RpcChannel, ServiceChannel};
pub use client::{RpcClient, RpcClientBuilder};
pub use config::schema::ClientConfig;
pub use error::{ErrorCode, RpcError};
pub use lifecycle::Shutdown;
pub use load_balancer::ConnectStatus;
pub use protocol::CompressType;
pub use resolver::{AddressListener, AddressResolver, InMemoryResolver, StaticResolver};
