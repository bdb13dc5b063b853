//! High-latency routing: one intake queue, one timer-driven resolver
//!
//! Producers only push onto the intake channel. A single worker wakes every
//! tick, drains the channel and fans out, so per-producer order is the
//! channel's FIFO order.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, trace};

use contracts::{AdapterId, MeasurementHandler, MeasurementRef};

use crate::context::RouteContext;
use crate::local_cache::LocalRouteCache;

pub(crate) struct IntakeBatch {
    producer: Option<AdapterId>,
    measurements: Vec<MeasurementRef>,
}

/// Shared intake queue plus its resolver task.
pub(crate) struct Intake {
    tx: Sender<IntakeBatch>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Intake {
    pub fn spawn(context: Weak<RouteContext>, tick: Duration, runtime: &Handle) -> Self {
        let (tx, rx) = async_channel::unbounded();
        let worker = runtime.spawn(run_worker(context, rx, tick));
        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a batch; false once the intake is closed.
    pub fn submit(&self, producer: Option<AdapterId>, measurements: Vec<MeasurementRef>) -> bool {
        if measurements.is_empty() {
            return true;
        }
        self.tx
            .try_send(IntakeBatch {
                producer,
                measurements,
            })
            .is_ok()
    }

    /// Producer handler that feeds this intake.
    pub fn handler(&self, producer: AdapterId) -> MeasurementHandler {
        let tx = self.tx.clone();
        Arc::new(move |measurements: Vec<MeasurementRef>| {
            if measurements.is_empty() {
                return;
            }
            let _ = tx.try_send(IntakeBatch {
                producer: Some(producer.clone()),
                measurements,
            });
        })
    }

    /// Batches waiting for the next tick
    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    /// Stop accepting batches; the worker resolves what is queued and exits.
    pub fn close(&self) {
        self.tx.close();
    }

    /// Close the intake, resolve what is queued and stop the worker.
    pub async fn shutdown(&self) {
        self.tx.close();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

#[instrument(name = "intake_worker_loop", skip_all, fields(tick_ms = tick.as_millis() as u64))]
async fn run_worker(context: Weak<RouteContext>, rx: Receiver<IntakeBatch>, tick: Duration) {
    debug!("Intake worker started");
    let mut caches: HashMap<Option<AdapterId>, LocalRouteCache> = HashMap::new();
    let mut seen_version = None;
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let Some(context) = context.upgrade() else {
            break;
        };

        let version = context.snapshot.load().version();
        if seen_version != Some(version) {
            let snapshot = context.snapshot.load();
            caches.retain(|producer, _| match producer {
                Some(id) => snapshot.producers().contains(id),
                None => true,
            });
            seen_version = Some(version);
        }

        let mut batches = 0usize;
        let closed = loop {
            match rx.try_recv() {
                Ok(batch) => {
                    batches += 1;
                    let cache = caches
                        .entry(batch.producer)
                        .or_insert_with(|| LocalRouteCache::new(Arc::clone(&context.snapshot)));
                    context.dispatch(cache, &batch.measurements);
                }
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Closed) => break true,
            }
        };
        if batches > 0 {
            trace!(batches, "Intake drained");
        }
        if closed {
            break;
        }
    }

    debug!("Intake worker stopped");
}
