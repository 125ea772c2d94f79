//! Cooperative cancellation.
//!
//! Ctrl-C only raises a flag; the orchestrator checks it between steps so an
//! interrupted run always leaves a snapshot behind.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag raised by the first Ctrl-C.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install() -> Self {
        let flag = Self::new();
        let handle = flag.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current step");
                handle.raise();
            }
        });
        flag
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
