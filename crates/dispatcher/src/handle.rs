//! ConsumerHandle - one consumer's queue and its drain worker task

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, instrument, warn};

use contracts::{AdapterId, ContractError, DrainConfig, MeasurementRef, MeasurementSink};

use crate::error::DispatcherError;
use crate::metrics::ConsumerMetrics;
use crate::queue::{DoubleBufferedQueue, QueueProducer};

/// Invoked from the drain worker for every batch a consumer rejects.
pub type FailureCallback = Arc<dyn Fn(&AdapterId, &DispatcherError) + Send + Sync>;

/// Long-lived delivery channel to one consumer.
///
/// Dropping the last reference closes the queue; the worker then delivers
/// what was already accepted and exits.
pub struct ConsumerHandle {
    id: AdapterId,
    producer: QueueProducer<MeasurementRef>,
    metrics: Arc<ConsumerMetrics>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerHandle {
    /// Create a ConsumerHandle and spawn its drain worker on `runtime`.
    pub fn spawn(
        id: AdapterId,
        sink: Arc<dyn MeasurementSink>,
        config: &DrainConfig,
        on_failure: Option<FailureCallback>,
        runtime: &Handle,
    ) -> Arc<Self> {
        let queue = DoubleBufferedQueue::with_capacity(config.batch_size);
        let producer = queue.producer();
        let metrics = Arc::new(ConsumerMetrics::new());

        let worker = DrainWorker {
            id: id.clone(),
            sink,
            metrics: Arc::clone(&metrics),
            batch_size: config.batch_size,
            on_failure,
        };
        let tick = config.tick();
        let worker_handle = runtime.spawn(async move {
            worker.run(queue, tick).await;
        });

        Arc::new(Self {
            id,
            producer,
            metrics,
            worker: Mutex::new(Some(worker_handle)),
        })
    }

    pub fn id(&self) -> &AdapterId {
        &self.id
    }

    pub fn metrics(&self) -> &Arc<ConsumerMetrics> {
        &self.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.producer.is_closed()
    }

    /// Queue one measurement (non-blocking)
    pub fn enqueue(&self, measurement: MeasurementRef) -> Result<(), DispatcherError> {
        self.producer.enqueue(measurement)?;
        self.metrics.add_enqueued(1);
        self.metrics.set_queue_depth(self.producer.depth());
        Ok(())
    }

    /// Queue a batch (non-blocking), preserving order
    pub fn enqueue_batch(&self, batch: Vec<MeasurementRef>) -> Result<(), DispatcherError> {
        let n = batch.len();
        self.producer.enqueue_batch(batch)?;
        self.metrics.add_enqueued(n);
        self.metrics.set_queue_depth(self.producer.depth());
        Ok(())
    }

    /// Stop accepting measurements. Idempotent.
    pub fn close(&self) {
        self.producer.close();
    }

    /// Close and wait for the worker's final drain.
    #[instrument(name = "consumer_handle_shutdown", skip(self), fields(consumer = %self.id))]
    pub async fn shutdown(&self) {
        self.close();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(consumer = %self.id, error = ?e, "Drain worker panicked");
            }
        }
        debug!(consumer = %self.id, "ConsumerHandle shutdown complete");
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.producer.close();
    }
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct DrainWorker {
    id: AdapterId,
    sink: Arc<dyn MeasurementSink>,
    metrics: Arc<ConsumerMetrics>,
    batch_size: usize,
    on_failure: Option<FailureCallback>,
}

impl DrainWorker {
    /// Wake on enqueue or tick, drain, repeat until closed.
    #[instrument(name = "consumer_drain_loop", skip(self, queue, tick), fields(consumer = %self.id))]
    async fn run(self, mut queue: DoubleBufferedQueue<MeasurementRef>, tick: Duration) {
        debug!(consumer = %self.id, "Drain worker started");
        let worker = Arc::new(self);
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = queue.notified() => {}
                _ = interval.tick() => {}
            }

            let closed = queue.is_closed();
            if !queue.is_empty() {
                // `ingest` is synchronous and may block, keep it off the async workers.
                let drain_worker = Arc::clone(&worker);
                let task = tokio::task::spawn_blocking(move || {
                    drain_worker.drain(&mut queue);
                    queue
                });
                queue = match task.await {
                    Ok(queue) => queue,
                    Err(e) => {
                        error!(consumer = %worker.id, error = ?e, "Drain task failed, stopping worker");
                        worker.report(&DispatcherError::Worker {
                            consumer: worker.id.to_string(),
                            message: e.to_string(),
                        });
                        return;
                    }
                };
            }

            if closed {
                break;
            }
        }

        debug!(consumer = %worker.id, "Drain worker stopped");
    }

    fn drain(&self, queue: &mut DoubleBufferedQueue<MeasurementRef>) {
        let outcome = queue.drain(self.batch_size, |batch| self.deliver(batch));
        if outcome.drained > 0 {
            self.metrics.inc_drains();
        }
        self.metrics.set_queue_depth(queue.len());
        for e in &outcome.errors {
            self.report(e);
        }
    }

    fn deliver(&self, batch: &[MeasurementRef]) -> Result<(), DispatcherError> {
        let result = catch_unwind(AssertUnwindSafe(|| self.sink.ingest(batch)))
            .unwrap_or_else(|payload| Err(ContractError::adapter_panic(self.id.as_str(), payload.as_ref())));

        match result {
            Ok(()) => {
                self.metrics.add_delivered(batch.len());
                Ok(())
            }
            Err(e) => {
                self.metrics.record_failed_batch(batch.len());
                Err(DispatcherError::batch_dropped(self.id.as_str(), batch.len(), e))
            }
        }
    }

    fn report(&self, e: &DispatcherError) {
        warn!(consumer = %self.id, error = %e, "Consumer batch failed");
        if let Some(cb) = &self.on_failure {
            cb(&self.id, e);
        }
    }
}
