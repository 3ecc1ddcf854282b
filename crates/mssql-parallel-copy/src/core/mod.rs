//! Core abstractions shared by the planner, the worker pool and the drivers.
//!
//! - [`identifier`]: identifier quoting and schema-qualified table names
//! - [`row`]: the row type streamed from a reader to a bulk writer
//! - [`traits`]: capabilities implemented by database drivers

pub mod identifier;
pub mod row;
pub mod traits;

pub use identifier::{quote_mssql, TableName};
pub use row::RowData;
pub use traits::{
    BulkOptions, BulkSink, CopyBackend, CounterSource, LockHint, MetadataProvider,
    PhysicalPartitionInfo, RowSource,
};
