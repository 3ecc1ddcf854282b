//! Copy orchestrator - main workflow coordinator.
//!
//! A run moves through [`RunPhase`]s in order. Nothing on the destination
//! changes until both databases answered and every table was planned, and
//! every table is truncated before the first worker starts.

mod report;

pub use report::{CopyReport, FailedPartition, RunStatus, TableReport};

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::{CopyBackend, TableName};
use crate::drivers::mssql::MssqlBackend;
use crate::error::{CopyError, Result, Side};
use crate::monitor::ThroughputMonitor;
use crate::plan::{CopyTask, PartitionPlanner};
use crate::queue::WorkQueue;
use crate::worker::{join_workers, WorkerPool, WorkerSettings};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    ConnectivityChecked,
    Planned,
    DestinationTruncated,
    Copying,
    Done,
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub destination_connected: bool,
    pub destination_latency_ms: u64,
    pub destination_error: Option<String>,
    pub healthy: bool,
}

/// Row count comparison for one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableValidation {
    pub table: String,
    pub source_rows: i64,
    pub destination_rows: i64,
    pub matches: bool,
}

/// Copy orchestrator.
pub struct Orchestrator {
    config: Config,
    tables: Vec<TableName>,
    backend: Arc<dyn CopyBackend>,
    phase: RunPhase,
}

impl Orchestrator {
    /// Create an orchestrator over an existing backend.
    pub fn new(config: Config, backend: Arc<dyn CopyBackend>) -> Result<Self> {
        config.validate()?;
        let tables = config.table_names()?;
        Ok(Self {
            config,
            tables,
            backend,
            phase: RunPhase::Idle,
        })
    }

    /// Create an orchestrator with SQL Server connection pools for both sides.
    pub fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let backend = MssqlBackend::connect(&config)?;
        Self::new(config, Arc::new(backend))
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn tables(&self) -> &[TableName] {
        &self.tables
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!("Run phase: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Run the copy.
    ///
    /// `cancel` is checked before the destination is touched and between
    /// tasks. Fatal errors (connectivity, planning, truncation) are returned;
    /// partition failures are reported in the [`CopyReport`].
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<CopyReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        self.phase = RunPhase::Idle;

        info!("Starting copy run: {}", run_id);

        info!("Phase 1: Checking connectivity");
        self.check_connectivity().await?;
        self.enter(RunPhase::ConnectivityChecked);

        info!("Phase 2: Planning {} tables", self.tables.len());
        let tasks = self.plan_tasks().await?;
        self.enter(RunPhase::Planned);

        if cancel.is_cancelled() {
            warn!("Cancelled before truncation; destination untouched");
            return Err(CopyError::Cancelled);
        }

        let settings = WorkerSettings::from_config(&self.config.copy);

        info!("Phase 3: Truncating destination tables");
        for table in &self.tables {
            self.backend.truncate(table).await?;
            self.backend
                .set_bulk_lock(table, settings.bulk.lock_hint)
                .await?;
            info!("{}: truncated ({:?} bulk loads)", table, settings.bulk.lock_hint);
        }
        self.enter(RunPhase::DestinationTruncated);

        info!(
            "Phase 4: Copying {} partitions with {} workers",
            tasks.len(),
            self.config.copy.workers
        );
        let queue = WorkQueue::sealed(tasks.iter().cloned())?;
        let pool = WorkerPool::new(self.backend.clone(), settings);
        self.enter(RunPhase::Copying);

        let copy_start = Instant::now();
        let workers_done = CancellationToken::new();
        let monitor = if self.config.copy.monitor {
            match self.backend.open_counters().await {
                Ok(counters) => Some(
                    ThroughputMonitor::new(counters, self.config.copy.monitor_interval())
                        .with_progress(pool.progress())
                        .spawn(workers_done.clone()),
                ),
                Err(e) => {
                    warn!("Throughput monitor unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let outcomes = join_workers(pool.spawn(&queue, &cancel)).await;
        workers_done.cancel();
        let throughput = match monitor {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                warn!("Throughput monitor panicked: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        let skipped = queue.drain().len();
        if skipped > 0 {
            warn!("{} partitions skipped after cancellation", skipped);
        }
        self.enter(RunPhase::Done);

        let report = CopyReport::build(
            run_id,
            started_at,
            &tasks,
            &outcomes,
            cancel.is_cancelled(),
            throughput,
        );

        info!(
            "Copy {}: {} rows in {:?} ({} of {} partitions succeeded)",
            report.status,
            report.rows_copied,
            copy_start.elapsed(),
            report.tasks_succeeded,
            report.tasks_total
        );
        for failed in &report.failed_partitions {
            error!(
                "{} partition {} failed: {}",
                failed.table, failed.partition, failed.error
            );
        }

        Ok(report)
    }

    /// Check connectivity and plan every table without changing anything.
    pub async fn plan(&mut self) -> Result<Vec<CopyTask>> {
        self.phase = RunPhase::Idle;
        self.check_connectivity().await?;
        self.enter(RunPhase::ConnectivityChecked);
        let tasks = self.plan_tasks().await?;
        self.enter(RunPhase::Planned);
        Ok(tasks)
    }

    async fn check_connectivity(&self) -> Result<()> {
        for side in [Side::Source, Side::Destination] {
            self.backend.check_connectivity(side).await?;
            debug!("{} database reachable", side);
        }
        Ok(())
    }

    async fn plan_tasks(&self) -> Result<Vec<CopyTask>> {
        let planner = PartitionPlanner::from_config(&self.config.copy);
        planner.plan_all(&*self.backend, &self.tables).await
    }

    /// Test both connections without failing on the first error.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let (source_connected, source_latency_ms, source_error) =
            self.check_side(Side::Source).await;
        let (destination_connected, destination_latency_ms, destination_error) =
            self.check_side(Side::Destination).await;

        Ok(HealthCheckResult {
            source_connected,
            source_latency_ms,
            source_error,
            destination_connected,
            destination_latency_ms,
            destination_error,
            healthy: source_connected && destination_connected,
        })
    }

    async fn check_side(&self, side: Side) -> (bool, u64, Option<String>) {
        let start = Instant::now();
        let result = self.backend.check_connectivity(side).await;
        let latency = start.elapsed().as_millis() as u64;
        match result {
            Ok(()) => (true, latency, None),
            Err(e) => (false, latency, Some(e.chain())),
        }
    }

    /// Compare row counts between source and destination.
    pub async fn validate(&self) -> Result<Vec<TableValidation>> {
        let mut results = Vec::with_capacity(self.tables.len());

        for table in &self.tables {
            let source_rows = self.backend.row_count(Side::Source, table).await?;
            let destination_rows = self.backend.row_count(Side::Destination, table).await?;
            let matches = source_rows == destination_rows;

            if matches {
                info!("{}: {} rows (match)", table, source_rows);
            } else {
                warn!(
                    "{}: source={} destination={} (MISMATCH)",
                    table, source_rows, destination_rows
                );
            }

            results.push(TableValidation {
                table: table.to_string(),
                source_rows,
                destination_rows,
                matches,
            });
        }

        Ok(results)
    }
}
