//! Bounded job queue between ingress handlers and workers.
//!
//! A full queue stalls the handler in `enqueue` until a slot frees or the
//! caller goes away; nothing is dropped and memory stays bounded.

use crate::domain::job::Job;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Enqueue failures. Neither leaves the job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The job's cancellation signal fired while waiting for room
    #[error("enqueue cancelled by caller")]
    Cancelled,
    /// The queue was closed for shutdown
    #[error("job queue closed")]
    Closed,
}

/// Fixed-capacity multi-producer, multi-consumer job queue
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    capacity: usize,
    closed: CancellationToken,
}

impl JobQueue {
    /// Capacity must be non-zero
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            capacity: capacity.max(1),
            closed: CancellationToken::new(),
        }
    }

    /// Wait for room, then queue the job.
    pub async fn enqueue(&self, job: Job) -> Result<(), EnqueueError> {
        if self.closed.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        let cancel = job.cancel.clone();

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EnqueueError::Cancelled),
            _ = self.closed.cancelled() => return Err(EnqueueError::Closed),
            permit = self.sender.reserve() => permit.map_err(|_| EnqueueError::Closed)?,
        };
        permit.send(job);
        Ok(())
    }

    /// Next job, or `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<Job> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            job = receiver.recv() => job,
            _ = self.closed.cancelled() => receiver.try_recv().ok(),
        }
    }

    /// Stop accepting jobs and wake idle workers
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Jobs currently waiting
    pub fn len(&self) -> usize {
        self.capacity.saturating_sub(self.sender.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
