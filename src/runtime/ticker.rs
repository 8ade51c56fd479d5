//! Periodic tick driver.
//!
//! Time-based maintenance is exposed as a single [`Tick::advance`] entry
//! point so tests can drive it with a manual clock. In production a
//! [`TickDriver`] calls it on a tokio interval until shutdown.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::runtime::clock::Clock;

pub trait Tick: Send + Sync {
    fn advance(&self, now_ms: u64);
}

pub struct TickDriver {
    handle: JoinHandle<()>,
}

impl TickDriver {
    /// Spawn the driver. It stops on shutdown or once `target` is dropped.
    pub fn spawn(
        runtime: &Handle,
        target: Weak<dyn Tick>,
        clock: Arc<dyn Clock>,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let handle = runtime.spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match target.upgrade() {
                            Some(target) => target.advance(clock.now_ms()),
                            None => break,
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Tick driver received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}
