//! Capabilities the copy engine consumes.
//!
//! - [`MetadataProvider`]: partition and column catalog lookups used by the planner
//! - [`RowSource`]: forward-only filtered read of one partition
//! - [`BulkSink`]: batched bulk load of one partition into the destination
//! - [`CounterSource`]: point-in-time samples of a server performance counter
//! - [`CopyBackend`]: connectivity, truncation and factories for the above
//!
//! The SQL Server implementation lives in `drivers::mssql`. Sessions returned
//! by the factories are owned by exactly one worker for one task.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, Side};

use super::identifier::TableName;
use super::row::RowData;

/// Physical partitioning of a table as reported by the source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalPartitionInfo {
    /// Partition function name.
    pub function_name: String,
    /// Column the partition function is applied to.
    pub column: String,
    /// Number of partitions the function produces.
    pub partition_count: u32,
}

/// Locking behavior requested from the destination for a bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockHint {
    /// One table lock per load instead of row locks. Valid because every
    /// writer appends a disjoint slice into a freshly truncated table.
    #[default]
    TableLock,
    /// Let the server pick row/page locks.
    RowLock,
}

/// Bulk write session configuration.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Rows sent per bulk-load request.
    pub batch_size: usize,
    /// Upper bound for writing one partition. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Locking behavior.
    pub lock_hint: LockHint,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            batch_size: 100_000,
            timeout: None,
            lock_hint: LockHint::TableLock,
        }
    }
}

/// Partition catalog lookups.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// True if the table's partition statistics report more than one
    /// populated partition.
    ///
    /// Fails with a metadata error if the table does not exist.
    async fn is_physically_partitioned(&self, table: &TableName) -> Result<bool>;

    /// Partition function, partitioning column and partition count.
    async fn physical_partition_info(&self, table: &TableName) -> Result<PhysicalPartitionInfo>;

    /// Destination columns a bulk load accepts, in column order. Identity,
    /// computed and rowversion columns are left out.
    async fn insertable_columns(&self, table: &TableName) -> Result<Vec<String>>;
}

/// Forward-only read of the rows of one table that match a predicate.
pub trait RowSource: Send {
    /// Start streaming `columns` of the rows of `table` matching `predicate`.
    ///
    /// The session moves into a background task that fills the returned
    /// channel, so a slow writer applies backpressure to the read. A read
    /// failure is delivered as a final `Err` item; the channel closes when the
    /// cursor is exhausted.
    fn read_rows(
        self: Box<Self>,
        table: &TableName,
        columns: &[String],
        predicate: &str,
        buffer: usize,
    ) -> mpsc::Receiver<Result<RowData>>;
}

/// Bulk load into one destination table.
#[async_trait]
pub trait BulkSink: Send {
    /// Drain `rows` into `table`, committing in batches of
    /// `options.batch_size`. Either every row lands or, on any error
    /// (including an `Err` item from the reader), nothing does.
    ///
    /// Returns the number of rows committed.
    async fn write_rows(
        &mut self,
        table: &TableName,
        options: &BulkOptions,
        rows: mpsc::Receiver<Result<RowData>>,
    ) -> Result<u64>;
}

/// Named server performance counter samples.
#[async_trait]
pub trait CounterSource: Send {
    /// Resolve the instance identifier of `counter` (one-time lookup).
    async fn resolve_instance(&mut self, counter: &str) -> Result<String>;

    /// Current cumulative value of `counter` for `instance`.
    async fn sample(&mut self, counter: &str, instance: &str) -> Result<i64>;
}

/// Everything the orchestrator needs from the two databases.
#[async_trait]
pub trait CopyBackend: MetadataProvider {
    /// Open and validate a connection to one side.
    async fn check_connectivity(&self, side: Side) -> Result<()>;

    /// Remove every row from a destination table.
    async fn truncate(&self, table: &TableName) -> Result<()>;

    /// Set the destination table's bulk-load locking option. The option
    /// persists on the table, so it is set explicitly for either hint.
    async fn set_bulk_lock(&self, table: &TableName, hint: LockHint) -> Result<()>;

    /// Exact row count of a table on one side.
    async fn row_count(&self, side: Side, table: &TableName) -> Result<i64>;

    /// A source session for one task.
    async fn open_source(&self) -> Result<Box<dyn RowSource>>;

    /// A destination bulk-load session for one task.
    async fn open_sink(&self) -> Result<Box<dyn BulkSink>>;

    /// A destination counter session for the throughput monitor.
    async fn open_counters(&self) -> Result<Box<dyn CounterSource>>;
}
