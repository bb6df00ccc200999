//! Shutdown coordination for graceful server shutdown.
//!
//! A [`ShutdownState`] moves through three phases: running, draining (no new
//! connections, live sessions are being closed) and complete (every close event
//! has been handled). The signal handler, the server loop and the application
//! all hold clones of the same state.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const COMPLETE: u8 = 2;

#[derive(Debug)]
struct Shared {
    phase: AtomicU8,
    changed: Notify,
}

/// Shared shutdown state for coordinating graceful shutdown across components.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    shared: Arc<Shared>,
}

impl ShutdownState {
    /// Creates a state in the running phase.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                phase: AtomicU8::new(RUNNING),
                changed: Notify::new(),
            }),
        }
    }

    /// Returns true once shutdown has been initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.phase() >= DRAINING
    }

    /// Returns true once every session has been closed.
    pub fn is_shutdown_complete(&self) -> bool {
        self.phase() == COMPLETE
    }

    /// Enters the draining phase and wakes every waiter. Later calls are no-ops.
    pub fn initiate_shutdown(&self) {
        if self
            .shared
            .phase
            .compare_exchange(RUNNING, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("🛑 Shutdown initiated - no new connections will be accepted");
            self.shared.changed.notify_waiters();
        }
    }

    /// Enters the complete phase.
    pub fn complete_shutdown(&self) {
        if self.shared.phase.swap(COMPLETE, Ordering::AcqRel) != COMPLETE {
            info!("✅ All sessions closed - ready for final cleanup");
            self.shared.changed.notify_waiters();
        }
    }

    /// Resolves once shutdown has been initiated.
    pub async fn wait(&self) {
        self.wait_for(DRAINING).await
    }

    /// Resolves once shutdown is complete.
    pub async fn wait_complete(&self) {
        self.wait_for(COMPLETE).await
    }

    fn phase(&self) -> u8 {
        self.shared.phase.load(Ordering::Acquire)
    }

    async fn wait_for(&self, phase: u8) {
        loop {
            // Registered before the check so a concurrent transition is not missed
            let changed = self.shared.changed.notified();
            if self.phase() >= phase {
                return;
            }
            changed.await;
        }
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}
