//! Fixed-size pool of copy workers draining the work queue.
//!
//! Each worker repeatedly takes one [`CopyTask`], opens its own source and
//! destination sessions, and streams the partition's rows into a bulk load.
//! A failed task is logged with its cause chain, recorded, and abandoned;
//! the worker moves on to the next task. Tasks are never retried or
//! requeued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CopyConfig;
use crate::core::{BulkOptions, CopyBackend, LockHint};
use crate::error::{CopyError, Result};
use crate::plan::CopyTask;
use crate::queue::WorkQueue;

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Destination bulk-load configuration.
    pub bulk: BulkOptions,
    /// Rows buffered between a task's reader and writer.
    pub read_ahead_rows: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: 7,
            bulk: BulkOptions::default(),
            read_ahead_rows: 10_000,
        }
    }
}

impl WorkerSettings {
    pub fn from_config(config: &CopyConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            bulk: BulkOptions {
                batch_size: config.batch_size.max(1),
                timeout: config.bulk_timeout(),
                lock_hint: if config.table_lock {
                    LockHint::TableLock
                } else {
                    LockHint::RowLock
                },
            },
            read_ahead_rows: config.read_ahead_rows.max(1),
        }
    }
}

/// Result of one copy attempt.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task: CopyTask,
    /// Rows committed to the destination (0 on failure).
    pub rows: u64,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Error with its full cause chain, if the task failed.
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// N workers sharing one work queue.
pub struct WorkerPool {
    backend: Arc<dyn CopyBackend>,
    settings: WorkerSettings,
    progress: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(backend: Arc<dyn CopyBackend>, settings: WorkerSettings) -> Self {
        Self {
            backend,
            settings,
            progress: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of rows committed to the destination so far.
    pub fn progress(&self) -> Arc<AtomicU64> {
        self.progress.clone()
    }

    /// Start the workers. Each handle resolves to that worker's outcomes.
    ///
    /// `cancel` is honored between tasks only; a task in flight always
    /// finishes (or fails) on its own.
    pub fn spawn(
        &self,
        queue: &WorkQueue,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<Vec<TaskOutcome>>> {
        info!("Starting {} copy workers", self.settings.workers);
        (0..self.settings.workers)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    backend: self.backend.clone(),
                    settings: self.settings.clone(),
                    progress: self.progress.clone(),
                };
                let queue = queue.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(queue, cancel).await })
            })
            .collect()
    }

    /// Run the workers until the queue is drained (or cancellation) and
    /// collect every outcome.
    pub async fn run(&self, queue: &WorkQueue, cancel: &CancellationToken) -> Vec<TaskOutcome> {
        join_workers(self.spawn(queue, cancel)).await
    }
}

/// Wait for all workers and merge their outcomes.
pub async fn join_workers(handles: Vec<JoinHandle<Vec<TaskOutcome>>>) -> Vec<TaskOutcome> {
    let mut outcomes = Vec::new();
    for (worker_id, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(worker_outcomes) => outcomes.extend(worker_outcomes),
            // Tasks run in their own spawned task, so this only happens if
            // the loop itself panicked.
            Err(e) => error!("Worker {} panicked: {}", worker_id, e),
        }
    }
    outcomes
}

struct Worker {
    id: usize,
    backend: Arc<dyn CopyBackend>,
    settings: WorkerSettings,
    progress: Arc<AtomicU64>,
}

impl Worker {
    async fn run(self, queue: WorkQueue, cancel: CancellationToken) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();

        loop {
            if cancel.is_cancelled() {
                info!("Worker {}: cancellation requested, stopping", self.id);
                break;
            }

            let task = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Worker {}: cancellation requested, stopping", self.id);
                    break;
                }
                task = queue.dequeue() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            outcomes.push(self.attempt(task).await);
        }

        debug!("Worker {}: finished after {} tasks", self.id, outcomes.len());
        outcomes
    }

    /// One copy attempt, isolated in its own tokio task so a panic inside
    /// a driver fails only this task.
    async fn attempt(&self, task: CopyTask) -> TaskOutcome {
        let start = Instant::now();
        debug!("Worker {}: starting {}", self.id, task);

        let backend = self.backend.clone();
        let settings = self.settings.clone();
        let progress = self.progress.clone();
        let job = task.clone();
        let handle =
            tokio::spawn(async move { copy_task(&*backend, &job, &settings, &progress).await });

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(CopyError::copy(
                task.table.to_string(),
                task.ordinal,
                format!("task panicked: {}", e),
            )),
        };
        let elapsed = start.elapsed();

        match result {
            Ok(rows) => {
                info!("{}: completed ({} rows in {:?})", task, rows, elapsed);
                TaskOutcome {
                    task,
                    rows,
                    elapsed,
                    error: None,
                }
            }
            Err(e) => {
                error!("{}: failed - {}", task, e.format_detailed());
                TaskOutcome {
                    task,
                    rows: 0,
                    elapsed,
                    error: Some(e.chain()),
                }
            }
        }
    }
}

/// Copy one partition: open a filtered read on the source and stream it
/// into a bulk load on the destination.
///
/// `progress` is advanced once the partition has committed. Both sessions are
/// dropped when this returns, on success or failure.
pub async fn copy_task(
    backend: &dyn CopyBackend,
    task: &CopyTask,
    settings: &WorkerSettings,
    progress: &AtomicU64,
) -> Result<u64> {
    let wrap = |e: CopyError| match e {
        e @ CopyError::Copy { .. } => e,
        other => CopyError::copy(task.table.to_string(), task.ordinal, other.chain()),
    };

    let predicate = task.predicate().map_err(wrap)?;
    let source = backend.open_source().await.map_err(wrap)?;
    let mut sink = backend.open_sink().await.map_err(wrap)?;

    let rows = source.read_rows(
        &task.table,
        &task.columns,
        &predicate,
        settings.read_ahead_rows,
    );
    let write = sink.write_rows(&task.table, &settings.bulk, rows);

    let written = match settings.bulk.timeout {
        Some(limit) => match tokio::time::timeout(limit, write).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{}: bulk write exceeded {:?}", task, limit);
                Err(CopyError::Timeout(limit))
            }
        },
        None => write.await,
    }
    .map_err(wrap)?;

    progress.fetch_add(written, Ordering::Relaxed);
    Ok(written)
}

/// Rows per second over `elapsed`.
pub fn rate(rows: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        rows as f64 / secs
    } else {
        0.0
    }
}

/// Total rows committed by successful tasks.
pub fn rows_copied(outcomes: &[TaskOutcome]) -> u64 {
    outcomes
        .iter()
        .filter(|o| o.succeeded())
        .map(|o| o.rows)
        .sum()
}
