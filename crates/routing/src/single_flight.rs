//! SingleFlight - coalescing runner for route recalculation
//!
//! At most one run executes at a time and at most one caller waits behind
//! it. Callers arriving while the waiting slot is taken are folded into the
//! waiting run, which starts after the current one and therefore sees every
//! request made before it began.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, Semaphore};
use tracing::trace;

#[derive(Debug)]
pub struct SingleFlight {
    pending: Mutex<()>,
    running: Semaphore,
    executions: AtomicU64,
    coalesced: AtomicU64,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(()),
            running: Semaphore::new(1),
            executions: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Run `work` unless a follow-up run is already queued.
    ///
    /// Returns `None` when this call was coalesced into the queued run.
    pub async fn run<F, Fut, T>(&self, work: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Ok(pending) = self.pending.try_lock() else {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            trace!("Recalculation coalesced into queued run");
            return None;
        };

        let permit = self.running.acquire().await.ok()?;
        drop(pending);

        self.executions.fetch_add(1, Ordering::Relaxed);
        let result = work().await;
        drop(permit);
        Some(result)
    }

    /// Runs that actually executed
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    /// Calls folded into another run
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}
