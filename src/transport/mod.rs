//! Transport capability.
//!
//! # Data Flow
//! ```text
//! ServiceChannel
//!     → Transport::create(address) → SocketHandle
//!     → SocketHandle::connect(events)
//!         → events.on_connected  (socket writable)
//!         → events.on_data       (bytes read, in order)
//!         → events.on_closed     (exactly once after a successful connect)
//! ```
//!
//! # Design Decisions
//! - The engine never sees a concrete socket type; tests script the whole
//!   lifecycle through these traits
//! - `close` may deliver `on_closed` synchronously, so callers must not hold
//!   locks that the close callback takes
//! - No event is delivered before `connect` returns, and `send` never
//!   delivers one synchronously

pub mod tcp;

use std::io;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::TransportError;

pub use tcp::TcpTransport;

/// Callbacks from one socket.
pub trait TransportEvents: Send + Sync {
    fn on_connected(&self, socket: &dyn SocketHandle);

    fn on_data(&self, socket: &dyn SocketHandle, data: &[u8]);

    fn on_closed(&self, socket: &dyn SocketHandle, error: Option<io::Error>);
}

/// One outbound connection.
pub trait SocketHandle: Send + Sync {
    fn address(&self) -> &str;

    /// Start connecting. An `Err` means no event will ever be delivered.
    fn connect(&self, events: Arc<dyn TransportEvents>) -> Result<(), TransportError>;

    /// Queue bytes for writing. `false` if the socket can no longer write.
    fn send(&self, data: Bytes) -> bool;

    /// Idempotent.
    fn close(&self);
}

/// Socket factory.
pub trait Transport: Send + Sync {
    fn create(&self, address: &str) -> Result<Arc<dyn SocketHandle>, TransportError>;
}
