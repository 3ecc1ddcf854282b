//! Run reports.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{CopyError, Result};
use crate::monitor::ThroughputSample;
use crate::plan::CopyTask;
use crate::worker::{rate, TaskOutcome};

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithFailures,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::CompletedWithFailures => write!(f, "completed_with_failures"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A partition whose copy failed.
#[derive(Debug, Clone, Serialize)]
pub struct FailedPartition {
    pub table: String,
    pub partition: u32,
    pub error: String,
}

/// Per-table totals.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    /// `physical` or `logical`.
    pub strategy: String,
    pub partitions: usize,
    pub partitions_failed: usize,
    pub rows_copied: u64,
}

/// Result of a copy run.
#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunStatus,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Tasks planned.
    pub tasks_total: usize,

    pub tasks_succeeded: usize,

    pub tasks_failed: usize,

    /// Tasks never started because the run was cancelled.
    pub tasks_skipped: usize,

    /// Rows committed to the destination.
    pub rows_copied: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: f64,

    pub tables: Vec<TableReport>,

    pub failed_partitions: Vec<FailedPartition>,

    /// Log flush samples taken while copying.
    pub throughput: Vec<ThroughputSample>,
}

impl CopyReport {
    /// Summarize a run from its plan and the workers' outcomes.
    pub(crate) fn build(
        run_id: String,
        started_at: DateTime<Utc>,
        planned: &[CopyTask],
        outcomes: &[TaskOutcome],
        cancelled: bool,
        throughput: Vec<ThroughputSample>,
    ) -> Self {
        let completed_at = Utc::now();
        let duration = (completed_at - started_at).to_std().unwrap_or_default();

        let failed_partitions: Vec<FailedPartition> = outcomes
            .iter()
            .filter_map(|o| {
                o.error.as_ref().map(|e| FailedPartition {
                    table: o.task.table.to_string(),
                    partition: o.task.ordinal,
                    error: e.clone(),
                })
            })
            .collect();

        let mut tables: Vec<TableReport> = Vec::new();
        for task in planned {
            let name = task.table.to_string();
            match tables.iter_mut().find(|t| t.table == name) {
                Some(t) => t.partitions += 1,
                None => tables.push(TableReport {
                    table: name,
                    strategy: task.strategy.kind().to_string(),
                    partitions: 1,
                    partitions_failed: 0,
                    rows_copied: 0,
                }),
            }
        }
        for outcome in outcomes {
            let name = outcome.task.table.to_string();
            if let Some(t) = tables.iter_mut().find(|t| t.table == name) {
                if outcome.succeeded() {
                    t.rows_copied += outcome.rows;
                } else {
                    t.partitions_failed += 1;
                }
            }
        }

        let rows_copied = crate::worker::rows_copied(outcomes);
        let tasks_failed = failed_partitions.len();
        let tasks_succeeded = outcomes.len() - tasks_failed;
        let tasks_skipped = planned.len().saturating_sub(outcomes.len());
        // A cancellation that arrives after the last task was taken changes nothing
        let status = if cancelled && tasks_skipped > 0 {
            RunStatus::Cancelled
        } else if tasks_failed > 0 {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Completed
        };

        Self {
            run_id,
            status,
            started_at,
            completed_at,
            duration_seconds: duration.as_secs_f64(),
            tasks_total: planned.len(),
            tasks_succeeded,
            tasks_failed,
            tasks_skipped,
            rows_copied,
            rows_per_second: rate(rows_copied, duration),
            tables,
            failed_partitions,
            throughput,
        }
    }

    /// True if every planned task completed.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Turn the report into an error when the run should not count as a
    /// success: always for cancellation, and for failed partitions when
    /// `strict` is set.
    pub fn ensure_complete(&self, strict: bool) -> Result<()> {
        match self.status {
            RunStatus::Cancelled => Err(CopyError::Cancelled),
            RunStatus::CompletedWithFailures if strict => Err(CopyError::PartitionsFailed {
                failed: self.tasks_failed,
                total: self.tasks_total,
            }),
            _ => Ok(()),
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
