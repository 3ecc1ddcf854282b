//! Work queue feeding the copy workers.
//!
//! A multi-producer/multi-consumer queue of [`CopyTask`]s. Each enqueued
//! task is handed to exactly one consumer. Producers call [`WorkQueue::close`]
//! once population is complete; after that, an empty queue means no more
//! work will ever arrive, which is what workers wait for.

use async_channel::{Receiver, Sender, TryRecvError};

use crate::error::{CopyError, Result};
use crate::plan::CopyTask;

/// Concurrency-safe queue of copy tasks. Cloning yields another handle to
/// the same queue.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: Sender<CopyTask>,
    rx: Receiver<CopyTask>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }

    /// Build a queue holding `tasks` that accepts no further producers.
    pub fn sealed(tasks: impl IntoIterator<Item = CopyTask>) -> Result<Self> {
        let queue = Self::new();
        for task in tasks {
            queue.enqueue(task)?;
        }
        queue.close();
        Ok(queue)
    }

    /// Add a task. Fails once the queue is closed.
    pub fn enqueue(&self, task: CopyTask) -> Result<()> {
        self.tx.try_send(task).map_err(|e| {
            CopyError::Config(format!(
                "cannot enqueue {} after the work queue was closed",
                e.into_inner()
            ))
        })
    }

    /// Take one task if one is available right now.
    pub fn try_dequeue(&self) -> Option<CopyTask> {
        match self.rx.try_recv() {
            Ok(task) => Some(task),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Take one task, waiting for producers while the queue is open.
    /// Returns `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<CopyTask> {
        self.rx.recv().await.ok()
    }

    /// Signal that no more tasks will be enqueued. Remaining tasks stay
    /// available to consumers.
    pub fn close(&self) {
        self.tx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Closed and empty: no task will ever be dequeued again.
    pub fn is_drained(&self) -> bool {
        self.is_closed() && self.is_empty()
    }

    /// Remove and return every task still queued.
    pub fn drain(&self) -> Vec<CopyTask> {
        std::iter::from_fn(|| self.try_dequeue()).collect()
    }
}
