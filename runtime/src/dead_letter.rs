//! Bounded in-memory dead letter queue for failed dispatches.
//!
//! The process manager parks command envelopes here when their dispatch
//! fails after a transition has already been durably saved: the saved
//! process state must not be rolled back, so the command is kept for
//! inspection and manual redispatch.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A failed operation with metadata about the failure.
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    /// The failed operation payload.
    pub payload: T,

    /// Number of times the operation was retried before landing here.
    pub retry_count: usize,

    /// The error message from the last failure.
    pub error_message: String,

    /// When the operation first failed.
    pub failed_at: DateTime<Utc>,
}

/// Bounded FIFO queue of failed operations.
///
/// When full, the oldest entry is dropped. Thread-safe; cloning shares the
/// underlying queue.
///
/// # Examples
///
/// ```
/// use commitstream_runtime::dead_letter::DeadLetterQueue;
///
/// let dlq: DeadLetterQueue<String> = DeadLetterQueue::new(100);
/// dlq.push("payload".to_string(), "connection timeout".to_string(), 3);
/// assert_eq!(dlq.len(), 1);
///
/// for entry in dlq.drain() {
///     println!("retry candidate: {:?}", entry.payload);
/// }
/// ```
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    queue: Arc<Mutex<VecDeque<DeadLetter<T>>>>,
    max_size: usize,
}

impl<T> DeadLetterQueue<T> {
    /// Create a new dead letter queue holding at most `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size,
        }
    }

    /// Push a failed operation onto the queue, dropping the oldest entry
    /// if the queue is full.
    pub fn push(&self, payload: T, error_message: String, retry_count: usize) {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if queue.len() >= self.max_size {
            queue.pop_front();
            metrics::counter!("commitstream.dead_letters.dropped").increment(1);
            tracing::warn!(
                max_size = self.max_size,
                "dead letter queue at capacity, dropping oldest entry"
            );
        }

        queue.push_back(DeadLetter {
            payload,
            retry_count,
            error_message,
            failed_at: Utc::now(),
        });

        // Note: Precision loss acceptable for queue-size gauges.
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("commitstream.dead_letters.size").set(queue.len() as f64);
        metrics::counter!("commitstream.dead_letters.pushed").increment(1);
    }

    /// Current queue size.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return all entries.
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();

        metrics::gauge!("commitstream.dead_letters.size").set(0.0);
        entries
    }

    /// Peek at the oldest entry without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// The maximum queue size.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
        }
    }
}

impl<T> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}
