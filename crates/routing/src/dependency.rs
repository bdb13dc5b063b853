//! DependencyScheduler - dependency-ordered delivery with timeouts
//!
//! One background task owns all wait queues, so its state needs no locks.
//! Producers and consumers talk to it over an unbounded channel.
//!
//! Each gated measurement goes through `Pending -> Satisfied | TimedOut -> Delivered`
//! and is delivered exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace};

use contracts::{AdapterId, DependencyConfig, MeasurementRef, SignalKey};
use dispatcher::ConsumerHandle;
use observability::RoutingMetricsAggregator;

use crate::local_cache::GateEntry;

/// How a gated measurement was released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Satisfied,
    TimedOut,
}

impl Release {
    fn as_str(self) -> &'static str {
        match self {
            Self::Satisfied => "satisfied",
            Self::TimedOut => "timeout",
        }
    }
}

enum SchedulerEvent {
    Gate(Vec<GateEntry>),
    Processed {
        adapter: AdapterId,
        measurement: MeasurementRef,
    },
    Flush(oneshot::Sender<usize>),
}

struct WaitEntry {
    handle: Arc<ConsumerHandle>,
    measurement: MeasurementRef,
    required: Arc<[AdapterId]>,
    satisfied: Vec<bool>,
    deadline: Instant,
    queued_at: Instant,
}

impl WaitEntry {
    fn new(entry: GateEntry, now: Instant) -> Self {
        // Timeouts run from the measurement's own timestamp.
        let age = (Utc::now() - entry.measurement.timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = entry.timeout.saturating_sub(age);
        Self {
            satisfied: vec![false; entry.required.len()],
            handle: entry.handle,
            measurement: entry.measurement,
            required: entry.required,
            deadline: now + remaining,
            queued_at: now,
        }
    }

    /// Mark `adapter` done; true once every required dependency reported.
    fn satisfy(&mut self, adapter: &AdapterId) -> bool {
        if let Some(pos) = self.required.iter().position(|r| r == adapter) {
            self.satisfied[pos] = true;
        }
        self.satisfied.iter().all(|s| *s)
    }
}

type QueueKey = (AdapterId, SignalKey);

/// Handle to the scheduler task.
pub struct DependencyScheduler {
    tx: mpsc::UnboundedSender<SchedulerEvent>,
    pending: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DependencyScheduler {
    pub fn spawn(
        config: &DependencyConfig,
        stats: Arc<Mutex<RoutingMetricsAggregator>>,
        runtime: &Handle,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let state = SchedulerState {
            queues: HashMap::new(),
            pending: Arc::clone(&pending),
            stats,
            sweep_every: config.sweep_every.max(1),
            sweep_interval: config.sweep_interval(),
            events_since_sweep: 0,
        };
        let worker = runtime.spawn(state.run(rx));
        Self {
            tx,
            pending,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Hold these deliveries until their dependencies report or time out.
    pub fn gate(&self, entries: Vec<GateEntry>) {
        if entries.is_empty() {
            return;
        }
        self.pending.fetch_add(entries.len(), Ordering::Relaxed);
        if let Err(mpsc::error::SendError(SchedulerEvent::Gate(entries))) =
            self.tx.send(SchedulerEvent::Gate(entries))
        {
            // Scheduler gone: deliver straight away rather than lose them.
            self.pending.fetch_sub(entries.len(), Ordering::Relaxed);
            for entry in entries {
                let _ = entry.handle.enqueue(entry.measurement);
            }
        }
    }

    /// `adapter` finished processing `measurement`.
    pub fn notify_processed(&self, adapter: AdapterId, measurement: MeasurementRef) {
        let _ = self.tx.send(SchedulerEvent::Processed {
            adapter,
            measurement,
        });
    }

    /// Gated measurements not yet delivered.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Deliver everything still waiting as timed out and stop the task.
    ///
    /// Returns the number of entries flushed. Idempotent.
    pub async fn shutdown(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        let flushed = if self.tx.send(SchedulerEvent::Flush(reply_tx)).is_ok() {
            reply_rx.await.unwrap_or(0)
        } else {
            0
        };
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        flushed
    }
}

struct SchedulerState {
    queues: HashMap<QueueKey, VecDeque<WaitEntry>>,
    pending: Arc<AtomicUsize>,
    stats: Arc<Mutex<RoutingMetricsAggregator>>,
    sweep_every: usize,
    sweep_interval: Duration,
    events_since_sweep: usize,
}

impl SchedulerState {
    #[instrument(name = "dependency_scheduler_loop", skip_all)]
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SchedulerEvent>) {
        debug!("Dependency scheduler started");
        let mut last_sweep = Instant::now();

        loop {
            let wake_at = self.next_wake(last_sweep);
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = tokio::time::sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => {
                    self.sweep(Instant::now());
                    last_sweep = Instant::now();
                    continue;
                }
            };

            match event {
                Some(SchedulerEvent::Gate(entries)) => self.enqueue(entries),
                Some(SchedulerEvent::Processed {
                    adapter,
                    measurement,
                }) => self.on_processed(&adapter, &measurement),
                Some(SchedulerEvent::Flush(reply)) => {
                    let flushed = self.flush();
                    let _ = reply.send(flushed);
                    break;
                }
                None => {
                    self.flush();
                    break;
                }
            }

            self.events_since_sweep += 1;
            if self.events_since_sweep >= self.sweep_every {
                self.sweep(Instant::now());
                last_sweep = Instant::now();
            }
        }

        debug!("Dependency scheduler stopped");
    }

    /// Earliest deadline of any waiting entry, capped by the fallback sweep interval.
    fn next_wake(&self, last_sweep: Instant) -> Option<Instant> {
        let earliest = self
            .queues
            .values()
            .flat_map(|q| q.iter().map(|e| e.deadline))
            .min()?;
        Some(earliest.min(last_sweep + self.sweep_interval))
    }

    fn enqueue(&mut self, entries: Vec<GateEntry>) {
        let now = Instant::now();
        for entry in entries {
            let key = (entry.handle.id().clone(), entry.measurement.key.clone());
            trace!(consumer = %key.0, signal = %key.1, "Measurement gated");
            self.queues
                .entry(key)
                .or_default()
                .push_back(WaitEntry::new(entry, now));
        }
    }

    fn on_processed(&mut self, adapter: &AdapterId, measurement: &MeasurementRef) {
        let mut released = Vec::new();

        for ((_, signal), queue) in self.queues.iter_mut() {
            if *signal != measurement.key {
                continue;
            }
            let Some(pos) = queue
                .iter()
                .position(|e| Arc::ptr_eq(&e.measurement, measurement) && e.required.contains(adapter))
            else {
                continue;
            };
            if !queue[pos].satisfy(adapter) {
                continue;
            }
            // Everything queued ahead of a satisfied entry is implicitly timed out.
            for earlier in queue.drain(..pos) {
                released.push((earlier, Release::TimedOut));
            }
            if let Some(entry) = queue.pop_front() {
                released.push((entry, Release::Satisfied));
            }
        }

        if !released.is_empty() {
            self.queues.retain(|_, q| !q.is_empty());
            for (entry, release) in released {
                self.deliver(entry, release);
            }
        }
    }

    /// Release each queue up to its last expired entry, in queue order.
    ///
    /// Entries ahead of an expired one go with it even if their own deadline
    /// is later, so a queue never releases out of order.
    fn sweep(&mut self, now: Instant) {
        let mut expired = Vec::new();
        for queue in self.queues.values_mut() {
            if let Some(last) = queue.iter().rposition(|e| e.deadline <= now) {
                expired.extend(queue.drain(..=last));
            }
        }
        self.queues.retain(|_, q| !q.is_empty());
        self.events_since_sweep = 0;

        if !expired.is_empty() {
            trace!(count = expired.len(), "Dependency timeout sweep");
        }
        for entry in expired {
            self.deliver(entry, Release::TimedOut);
        }
    }

    fn flush(&mut self) -> usize {
        let queues: Vec<_> = self.queues.drain().collect();
        let mut flushed = 0;
        for (_, queue) in queues {
            for entry in queue {
                self.deliver(entry, Release::TimedOut);
                flushed += 1;
            }
        }
        if flushed > 0 {
            info!(flushed, "Dependency scheduler flushed pending measurements");
        }
        flushed
    }

    fn deliver(&self, entry: WaitEntry, release: Release) {
        let waited = entry.queued_at.elapsed();
        self.pending.fetch_sub(1, Ordering::Relaxed);
        if let Err(e) = entry.handle.enqueue(entry.measurement) {
            debug!(consumer = %entry.handle.id(), error = %e, "Gated delivery dropped");
        }
        observability::record_dependency_delivered(release.as_str(), waited);
        self.stats
            .lock()
            .record_dependency(release == Release::Satisfied, waited);
    }
}
