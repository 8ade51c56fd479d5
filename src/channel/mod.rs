//! Per-service channels.
//!
//! # Data Flow
//! ```text
//! RpcChannel (handle.rs)
//!     → ServiceChannel (service.rs)
//!         → ConnectionGroup (pick) + RequestQueue (track)
//!         → transport socket
//!             → RpcSession (session.rs): handshake, FrameDecoder, events
//!         ← on_new_session / on_response / on_close
//! ```
//!
//! # Design Decisions
//! - Time only moves through `Tick::advance(now)`, so scenarios can be
//!   replayed with a manual clock
//! - A session holds only a weak reference to its channel

pub mod handle;
pub mod service;
pub mod session;
pub mod state;

pub use handle::{CallOptions, RpcChannel};
pub use service::ServiceChannel;
pub use session::RpcSession;
pub use state::ScheduledReconnect;
