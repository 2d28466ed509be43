use std::sync::Arc;

use async_channel::{bounded, Receiver, Sender, TrySendError};
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;

/// Point-in-time view of a queue's occupancy, used for observability only.
pub trait QueueStats: Send + Sync {
    fn name(&self) -> &'static str;
    fn len(&self) -> usize;
    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Percentage of the capacity currently in use.
    fn fillness(&self) -> f64 {
        100.0 * self.len() as f64 / self.capacity().max(1) as f64
    }
}

/// Sending half of a bounded multi-producer multi-consumer queue.
#[derive(Debug)]
pub struct MeasuringSender<T> {
    name: &'static str,
    sender: Sender<T>,
}

/// Receiving half of a bounded multi-producer multi-consumer queue. Clones race for items.
#[derive(Debug)]
pub struct MeasuringReceiver<T> {
    name: &'static str,
    receiver: Receiver<T>,
}

// Cloning a queue end never clones items, so no `T: Clone` bound.
impl<T> Clone for MeasuringSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            sender: self.sender.clone(),
        }
    }
}

impl<T> Clone for MeasuringReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            receiver: self.receiver.clone(),
        }
    }
}

pub fn measuring_channel<T>(
    name: &'static str,
    capacity: usize,
) -> (MeasuringSender<T>, MeasuringReceiver<T>) {
    let (tx, rx) = bounded(capacity);
    (
        MeasuringSender { name, sender: tx },
        MeasuringReceiver { name, receiver: rx },
    )
}

impl<T> MeasuringSender<T> {
    pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        self.sender.try_send(item)
    }

    /// Waits for room in the queue, giving up as soon as the token is cancelled.
    pub async fn send(&self, item: T, cancel: &CancellationToken) -> Result<(), QueueError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            res = self.sender.send(item) => res.map_err(|_| QueueError::Closed(self.name)),
        }
    }

    pub fn close(&self) -> bool {
        self.sender.close()
    }
}

impl<T> MeasuringReceiver<T> {
    /// Waits for the next item. Returns `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        self.receiver.recv().await.ok()
    }

    /// Like [`recv`](Self::recv), giving up as soon as the token is cancelled.
    pub async fn recv_or_cancel(&self, cancel: &CancellationToken) -> Result<T, QueueError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            res = self.receiver.recv() => res.map_err(|_| QueueError::Closed(self.name)),
        }
    }

    pub fn close(&self) -> bool {
        self.receiver.close()
    }

    pub fn stats(&self) -> Arc<dyn QueueStats>
    where
        T: Send + 'static,
    {
        Arc::new(self.clone())
    }
}

impl<T: Send> QueueStats for MeasuringReceiver<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn len(&self) -> usize {
        self.receiver.len()
    }

    fn capacity(&self) -> usize {
        self.receiver.capacity().unwrap_or(0)
    }
}
