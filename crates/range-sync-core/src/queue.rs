//! Single-consumer event intake queue.
//!
//! Serializing event intake here is what gives the rest of the engine
//! its determinism: events from several peers arriving "at the same
//! time" are ordered by arrival at this queue, not by wall clock, and
//! rule matching + saga creation only ever run on the one task that
//! drains it. The queue has exactly one consumer, always.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics::{noop_queue_metrics, QueueMetrics};
use crate::model::Event;

/// An item dequeued by the single consumer: the event plus whichever
/// connection-scoped metadata the caller wants threaded through to
/// the processor. Kept minimal here — just the event.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: Event,
}

/// Bounded FIFO buffering events from all connections. `enqueue` never
/// blocks: a full queue rejects rather than suspending, because
/// suspending the connection handler here would let one slow producer
/// stall every other connection's read loop.
pub struct EventQueue {
    sender: mpsc::Sender<QueuedEvent>,
    receiver: tokio::sync::Mutex<Option<mpsc::Receiver<QueuedEvent>>>,
    closed: std::sync::atomic::AtomicBool,
    /// Wakes a task parked in `recv().await` inside [`Self::run`] so it
    /// can re-check `closed` and drain without waiting indefinitely for
    /// another item. `close()` never drops the sender (the queue owns
    /// it for its own lifetime), so this is the only way to unblock the
    /// consumer promptly.
    close_notify: tokio::sync::Notify,
    metrics: Arc<dyn QueueMetrics>,
}

/// Default buffer capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self::with_metrics(capacity, noop_queue_metrics())
    }

    pub fn with_metrics(capacity: usize, metrics: Arc<dyn QueueMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        EventQueue {
            sender,
            receiver: tokio::sync::Mutex::new(Some(receiver)),
            closed: std::sync::atomic::AtomicBool::new(false),
            close_notify: tokio::sync::Notify::new(),
            metrics,
        }
    }

    /// Non-blocking enqueue. Returns `false` when the buffer is
    /// saturated or the queue has been closed; the caller is expected
    /// to reply to the producing client with `error/queue_full`.
    pub fn enqueue(&self, event: Event) -> bool {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return false;
        }
        match self.sender.try_send(QueuedEvent { event }) {
            Ok(()) => {
                self.metrics.event_enqueued();
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("event queue saturated, rejecting enqueue");
                self.metrics.event_rejected();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Drain the queue on the calling task, invoking `processor_fn`
    /// synchronously for each item in arrival order. Returns once the
    /// queue is closed and drained. Takes `&self` but may only be
    /// called once — the receiver half is moved out on first call,
    /// enforcing the single-consumer invariant at the type level.
    pub async fn run<F, Fut>(&self, mut processor_fn: F)
    where
        F: FnMut(Event) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .expect("EventQueue::run called more than once");

        info!("event queue processor started");
        loop {
            if self.closed.load(std::sync::atomic::Ordering::Acquire) {
                while let Ok(item) = receiver.try_recv() {
                    processor_fn(item.event).await;
                }
                break;
            }

            tokio::select! {
                item = receiver.recv() => {
                    match item {
                        Some(item) => processor_fn(item.event).await,
                        None => break,
                    }
                }
                _ = self.close_notify.notified() => {
                    // Loop back around; the `closed` check above drains
                    // whatever is left and exits.
                }
            }
        }
        debug!("event queue processor exiting: queue closed and drained");
    }

    /// Idempotent close. After this, `enqueue` always returns `false`.
    /// The consumer's `run` loop drains whatever is already buffered
    /// and exits promptly rather than waiting for another item.
    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        self.close_notify.notify_waiters();
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::Acquire)
    }
}
