//! # mssql-parallel-copy
//!
//! Parallel table copy between SQL Server databases.
//!
//! Each configured table is sliced into disjoint partitions, either along the
//! source's own partition function or by hashing a per-row surrogate into a
//! fixed number of logical partitions. A fixed pool of workers then copies the
//! partitions concurrently, each streaming a filtered read from the source
//! into a TDS bulk load on the destination.
//!
//! - **Planning** ([`plan`]): one [`CopyTask`] per partition, predicates that
//!   cover every row exactly once
//! - **Work distribution** ([`queue`]): a closable MPMC queue feeding the workers
//! - **Copying** ([`worker`]): per-task sessions, failures isolated per partition
//! - **Observability** ([`monitor`]): destination log flush rate while copying
//! - **Coordination** ([`orchestrator`]): connectivity, planning, truncation,
//!   copy and the final [`CopyReport`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_parallel_copy::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mssql_parallel_copy::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let mut orchestrator = Orchestrator::connect(config)?;
//!     let report = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Copied {} rows", report.rows_copied);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod plan;
pub mod queue;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig, CopyConfig};
pub use crate::core::{CopyBackend, TableName};
pub use drivers::MssqlBackend;
pub use error::{CopyError, Result, Side};
pub use monitor::{ThroughputMonitor, ThroughputSample};
pub use orchestrator::{
    CopyReport, HealthCheckResult, Orchestrator, RunPhase, RunStatus, TableValidation,
};
pub use plan::{CopyTask, PartitionPlanner, PartitionStrategy};
pub use queue::WorkQueue;
pub use worker::{TaskOutcome, WorkerPool};
