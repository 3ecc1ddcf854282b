//! Partition planning: slicing a table into independently copyable tasks.
//!
//! A table that the source engine already partitions is sliced along its
//! partition function, so every task's read benefits from partition
//! elimination. Any other table is hashed into a fixed number of logical
//! partitions over a per-row surrogate value; each logical slice is a full
//! scan filtered by modulo, but the scans run concurrently.
//!
//! For every table the predicates of its tasks cover each row exactly once.
//! Ordinals are 1-based and dense.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{CopyConfig, DEFAULT_ROW_SURROGATE};
use crate::core::{quote_mssql, MetadataProvider, TableName};
use crate::error::{CopyError, Result};

/// Default number of logical partitions.
pub const DEFAULT_LOGICAL_PARTITIONS: u32 = 7;

/// How a table is sliced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// The source engine's own partitioning.
    Physical {
        function_name: String,
        column: String,
    },
    /// Synthetic hash partitioning over a per-row integer surrogate.
    Logical { partitions: u32, surrogate: String },
}

impl PartitionStrategy {
    pub fn kind(&self) -> &'static str {
        match self {
            PartitionStrategy::Physical { .. } => "physical",
            PartitionStrategy::Logical { .. } => "logical",
        }
    }
}

/// Render the T-SQL filter selecting partition `ordinal` of `strategy`.
///
/// Fails if a partition function or column name is not a valid identifier.
pub fn render_predicate(strategy: &PartitionStrategy, ordinal: u32) -> Result<String> {
    Ok(match strategy {
        PartitionStrategy::Physical {
            function_name,
            column,
        } => format!(
            "$PARTITION.{}({}) = {}",
            quote_mssql(function_name)?,
            quote_mssql(column)?,
            ordinal
        ),
        PartitionStrategy::Logical {
            partitions,
            surrogate,
        } => format!(
            "ABS({}) % {} = {}",
            surrogate,
            partitions,
            ordinal.saturating_sub(1)
        ),
    })
}

/// What the source engine knows about one row, as far as partition
/// predicates are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocator {
    /// Value of the surrogate expression for this row.
    pub surrogate: i64,
    /// 1-based partition number assigned by the partition function.
    pub physical_partition: u32,
}

/// One unit of work: copy the rows of `table` selected by partition `ordinal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyTask {
    pub table: TableName,
    pub ordinal: u32,
    pub strategy: PartitionStrategy,
    /// Columns read from the source and bulk loaded, in destination order.
    pub columns: Vec<String>,
}

impl CopyTask {
    /// The filter predicate for this task's source read.
    pub fn predicate(&self) -> Result<String> {
        render_predicate(&self.strategy, self.ordinal)
    }

    /// Evaluate this task's predicate against a row the way the source
    /// engine does.
    pub fn claims(&self, row: &RowLocator) -> bool {
        match &self.strategy {
            PartitionStrategy::Physical { .. } => row.physical_partition == self.ordinal,
            PartitionStrategy::Logical { partitions, .. } => {
                row.surrogate.unsigned_abs() % u64::from(*partitions)
                    == u64::from(self.ordinal.saturating_sub(1))
            }
        }
    }
}

impl fmt::Display for CopyTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:p{}", self.table, self.ordinal)
    }
}

/// Builds the task list for tables.
#[derive(Debug, Clone)]
pub struct PartitionPlanner {
    logical_partitions: u32,
    surrogate: String,
}

impl Default for PartitionPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_LOGICAL_PARTITIONS)
    }
}

impl PartitionPlanner {
    pub fn new(logical_partitions: u32) -> Self {
        Self {
            logical_partitions: logical_partitions.max(1),
            surrogate: DEFAULT_ROW_SURROGATE.to_string(),
        }
    }

    pub fn from_config(config: &CopyConfig) -> Self {
        Self::new(config.logical_partitions).with_surrogate(config.row_surrogate.clone())
    }

    /// Use a different per-row surrogate expression for logical partitioning.
    pub fn with_surrogate(mut self, surrogate: impl Into<String>) -> Self {
        self.surrogate = surrogate.into();
        self
    }

    /// Plan one table. Only reads metadata.
    ///
    /// The column list is resolved once here and shared by every task of
    /// the table, so each partition's read has the shape the bulk load
    /// expects.
    pub async fn plan<M>(&self, metadata: &M, table: &TableName) -> Result<Vec<CopyTask>>
    where
        M: MetadataProvider + ?Sized,
    {
        let strategy;
        let count;

        if metadata.is_physically_partitioned(table).await? {
            let info = metadata.physical_partition_info(table).await?;
            if info.partition_count == 0 {
                return Err(CopyError::metadata(
                    table.to_string(),
                    "partition function reports zero partitions",
                ));
            }
            debug!(
                "{}: partition function {} on column {}",
                table, info.function_name, info.column
            );
            count = info.partition_count;
            strategy = PartitionStrategy::Physical {
                function_name: info.function_name,
                column: info.column,
            };
        } else {
            count = self.logical_partitions;
            strategy = PartitionStrategy::Logical {
                partitions: self.logical_partitions,
                surrogate: self.surrogate.clone(),
            };
        }

        render_predicate(&strategy, 1)
            .map_err(|e| CopyError::metadata(table.to_string(), e.to_string()))?;

        let columns = metadata.insertable_columns(table).await?;
        if columns.is_empty() {
            return Err(CopyError::metadata(
                table.to_string(),
                "destination table has no insertable columns",
            ));
        }
        for column in &columns {
            quote_mssql(column).map_err(|e| CopyError::metadata(table.to_string(), e.to_string()))?;
        }
        debug!("{}: copying columns {}", table, columns.join(", "));

        info!("{}: {} {} partitions", table, count, strategy.kind());

        Ok((1..=count)
            .map(|ordinal| CopyTask {
                table: table.clone(),
                ordinal,
                strategy: strategy.clone(),
                columns: columns.clone(),
            })
            .collect())
    }

    /// Plan every table, in order. The first failure aborts planning.
    pub async fn plan_all<M>(&self, metadata: &M, tables: &[TableName]) -> Result<Vec<CopyTask>>
    where
        M: MetadataProvider + ?Sized,
    {
        let mut tasks = Vec::new();
        for table in tables {
            tasks.extend(self.plan(metadata, table).await?);
        }
        Ok(tasks)
    }
}
