//! Bounded FIFO of batches between request handlers and the writer task.
//!
//! Producers push through a shared [`BatchQueue`]; the single consumer owns the
//! matching `mpsc::Receiver`. Closing the queue drops the last long-lived
//! sender, so the receiver yields `None` once everything pushed before the
//! close has been delivered.

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::batch::Batch;

/// Default number of batches buffered before producers are made to wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Push attempted after the queue was closed (or the consumer is gone)
    #[error("batch queue is closed")]
    Closed,
}

/// Producer side of the batch channel.
pub struct BatchQueue {
    sender: RwLock<Option<mpsc::Sender<Batch>>>,
    capacity: usize,
}

impl BatchQueue {
    /// Create a queue holding at most `capacity` batches (minimum 1), returning
    /// the receiver for the single consumer.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Batch>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                sender: RwLock::new(Some(tx)),
                capacity,
            },
            rx,
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a batch, waiting for free capacity when the queue is full.
    pub async fn push(&self, batch: Batch) -> Result<(), QueueError> {
        let sender = self.sender().ok_or(QueueError::Closed)?;
        sender.send(batch).await.map_err(|_| QueueError::Closed)
    }

    /// Stop accepting batches. Returns `false` if the queue was already closed.
    ///
    /// Pushes already waiting on capacity still complete; the consumer sees
    /// end-of-input after those are delivered.
    pub fn close(&self) -> bool {
        self.sender.write().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    // The lock is never held across an await.
    fn sender(&self) -> Option<mpsc::Sender<Batch>> {
        self.sender.read().clone()
    }
}
