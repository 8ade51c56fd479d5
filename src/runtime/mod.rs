//! Execution collaborators injected into channels.
//!
//! # Data Flow
//! ```text
//! engine event (response, timeout, teardown)
//!     → executor.rs (completion submitted after locks are released)
//!
//! TickDriver (tokio interval) → clock.rs (now) → Tick::advance(now)
//! ```

pub mod clock;
pub mod executor;
pub mod ticker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use executor::{Executor, InlineExecutor, Job, WorkerPool};
pub use ticker::{Tick, TickDriver};
