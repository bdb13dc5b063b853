//! DoubleBufferedQueue - many producers enqueue, one drain worker delivers
//!
//! Producers append to the front buffer under a short mutex. The drain side
//! swaps the front buffer with its own reusable back buffer, so the lock is
//! held only for the swap and never while the consumer is processing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::DispatcherError;

struct Shared<T> {
    front: Mutex<Vec<T>>,
    depth: AtomicUsize,
    producers: AtomicUsize,
    closed: AtomicBool,
    notify: Notify,
}

/// Result of one drain activation
#[derive(Debug)]
pub struct DrainOutcome<E> {
    /// Items handed to the deliver callback, failed batches included
    pub drained: usize,
    /// Number of deliver invocations
    pub batches: usize,
    /// Errors from failed batches, in delivery order
    pub errors: Vec<E>,
}

impl<E> DrainOutcome<E> {
    fn empty() -> Self {
        Self {
            drained: 0,
            batches: 0,
            errors: Vec::new(),
        }
    }
}

/// Drain side of the queue.
///
/// Owned by exactly one worker, which makes drains single-flight per queue.
pub struct DoubleBufferedQueue<T> {
    shared: Arc<Shared<T>>,
    back: Vec<T>,
}

/// Enqueue side of the queue. Cheap to clone, never blocks on the consumer.
pub struct QueueProducer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> DoubleBufferedQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                front: Mutex::new(Vec::with_capacity(capacity)),
                depth: AtomicUsize::new(0),
                producers: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
            back: Vec::with_capacity(capacity),
        }
    }

    /// Register a new producer.
    pub fn producer(&self) -> QueueProducer<T> {
        self.shared.producers.fetch_add(1, Ordering::Relaxed);
        QueueProducer {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Items enqueued but not yet drained.
    pub fn len(&self) -> usize {
        self.shared.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live producers.
    pub fn producer_count(&self) -> usize {
        self.shared.producers.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Reject further enqueues and wake the drain side.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Wait until a producer enqueues or the queue is closed.
    pub async fn notified(&self) {
        self.shared.notify.notified().await
    }

    /// Deliver everything currently queued in chunks of at most `batch_size`.
    ///
    /// A failing chunk is dropped and its error collected; later chunks are
    /// still delivered. When a swap yields at least a full batch the drain
    /// keeps going in the same activation instead of waiting for the next tick.
    pub fn drain<E, F>(&mut self, batch_size: usize, mut deliver: F) -> DrainOutcome<E>
    where
        F: FnMut(&[T]) -> Result<(), E>,
    {
        let batch_size = batch_size.max(1);
        let mut outcome = DrainOutcome::empty();

        loop {
            {
                let mut front = self.shared.front.lock();
                if front.is_empty() {
                    break;
                }
                std::mem::swap(&mut *front, &mut self.back);
            }

            let swapped = self.back.len();
            for chunk in self.back.chunks(batch_size) {
                outcome.batches += 1;
                if let Err(e) = deliver(chunk) {
                    outcome.errors.push(e);
                }
            }
            // Release delivered items before the buffer goes back into rotation.
            self.back.clear();
            self.shared.depth.fetch_sub(swapped, Ordering::AcqRel);
            outcome.drained += swapped;

            if swapped < batch_size {
                break;
            }
        }

        outcome
    }
}

impl<T> Default for DoubleBufferedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for DoubleBufferedQueue<T> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl<T> Shared<T> {
    fn close(&self) {
        // Flip under the buffer lock so no push can land after the final drain.
        let was_closed = {
            let _front = self.front.lock();
            self.closed.swap(true, Ordering::AcqRel)
        };
        if !was_closed {
            self.notify.notify_one();
        }
    }

    fn push_with(&self, count: usize, push: impl FnOnce(&mut Vec<T>)) -> Result<(), DispatcherError> {
        {
            let mut front = self.front.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(DispatcherError::QueueClosed);
            }
            push(&mut front);
            self.depth.fetch_add(count, Ordering::AcqRel);
        }
        self.notify.notify_one();
        Ok(())
    }
}

impl<T> QueueProducer<T> {
    pub fn enqueue(&self, item: T) -> Result<(), DispatcherError> {
        self.shared.push_with(1, |front| front.push(item))
    }

    /// Append a batch, preserving its order.
    pub fn enqueue_batch(&self, items: Vec<T>) -> Result<(), DispatcherError> {
        if items.is_empty() {
            return Ok(());
        }
        let count = items.len();
        self.shared.push_with(count, |front| {
            if front.is_empty() && front.capacity() < items.capacity() {
                *front = items;
            } else {
                front.extend(items);
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Close the queue from the producer side. The drain worker still
    /// delivers what was accepted before the close.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Items enqueued but not yet drained.
    pub fn depth(&self) -> usize {
        self.shared.depth.load(Ordering::Acquire)
    }
}

impl<T> Clone for QueueProducer<T> {
    fn clone(&self) -> Self {
        self.shared.producers.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for QueueProducer<T> {
    fn drop(&mut self) {
        self.shared.producers.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_order_and_chunks() {
        let mut queue = DoubleBufferedQueue::new();
        let producer = queue.producer();
        producer.enqueue_batch((0..25).collect()).unwrap();
        producer.enqueue(25).unwrap();
        assert_eq!(queue.len(), 26);

        let mut seen = Vec::new();
        let mut sizes = Vec::new();
        let outcome = queue.drain(10, |batch: &[i32]| -> Result<(), ()> {
            sizes.push(batch.len());
            seen.extend_from_slice(batch);
            Ok(())
        });

        assert_eq!(outcome.drained, 26);
        assert_eq!(sizes, vec![10, 10, 6]);
        assert_eq!(seen, (0..26).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failed_batch_is_dropped_not_retried() {
        let mut queue = DoubleBufferedQueue::new();
        let producer = queue.producer();
        producer.enqueue_batch((0..4).collect()).unwrap();

        let mut calls = 0;
        let outcome = queue.drain(2, |batch: &[u8]| {
            calls += 1;
            if batch[0] == 0 {
                Err("rejected")
            } else {
                Ok(())
            }
        });
        assert_eq!(calls, 2);
        assert_eq!(outcome.errors, vec!["rejected"]);

        let again = queue.drain(2, |_: &[u8]| -> Result<(), ()> { panic!("queue should be empty") });
        assert_eq!(again.drained, 0);
    }

    #[test]
    fn test_closed_queue_rejects_enqueue() {
        let queue = DoubleBufferedQueue::<u32>::new();
        let producer = queue.producer();
        queue.close();
        assert!(producer.is_closed());
        assert!(matches!(producer.enqueue(1), Err(DispatcherError::QueueClosed)));
    }

    #[test]
    fn test_producer_count_tracks_clones() {
        let queue = DoubleBufferedQueue::<u32>::new();
        let a = queue.producer();
        let b = a.clone();
        assert_eq!(queue.producer_count(), 2);
        drop(a);
        drop(b);
        assert_eq!(queue.producer_count(), 0);
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let mut queue = DoubleBufferedQueue::new();
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let producer = queue.producer();
                std::thread::spawn(move || {
                    for i in 0..1000u32 {
                        producer.enqueue(t * 1000 + i).unwrap();
                    }
                })
            })
            .collect();

        let mut total = 0;
        let mut pending = threads;
        while !pending.is_empty() {
            total += queue.drain(64, |_: &[u32]| -> Result<(), ()> { Ok(()) }).drained;
            pending.retain(|h| !h.is_finished());
        }
        total += queue.drain(64, |_: &[u32]| -> Result<(), ()> { Ok(()) }).drained;
        assert_eq!(total, 4000);
    }
}
