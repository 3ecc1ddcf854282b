//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database the rows are read from.
    #[serde(default)]
    pub source: ConnectionConfig,

    /// Database the rows are bulk-loaded into.
    #[serde(default)]
    pub destination: ConnectionConfig,

    /// Copy behavior configuration.
    #[serde(default)]
    pub copy: CopyConfig,
}

/// SQL Server connection configuration, used for both sides of the copy.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// ADO.NET style connection string. Takes precedence over the
    /// individual fields below when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            host: String::new(),
            port: default_mssql_port(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            encrypt: default_true_string(),
            trust_server_cert: false,
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "[REDACTED]"),
            )
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Copy behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Tables to copy, as `schema.table` or `table` (schema defaults to `dbo`).
    #[serde(default)]
    pub tables: Vec<String>,

    /// Number of parallel copy workers (default: 7).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Number of logical partitions for tables without physical
    /// partitioning (default: 7).
    #[serde(default = "default_logical_partitions")]
    pub logical_partitions: u32,

    /// Per-row integer expression hashed by logical partitioning.
    #[serde(default = "default_row_surrogate")]
    pub row_surrogate: String,

    /// Rows per bulk-load batch (default: 100000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timeout in seconds for one partition's bulk write. Unset means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_timeout_secs: Option<u64>,

    /// Take a table lock for bulk loads (default: true).
    #[serde(default = "default_true")]
    pub table_lock: bool,

    /// Rows buffered between a partition's reader and its bulk writer (default: 10000).
    #[serde(default = "default_read_ahead_rows")]
    pub read_ahead_rows: usize,

    /// Sample destination log flush throughput while copying (default: true).
    #[serde(default = "default_true")]
    pub monitor: bool,

    /// Seconds between the two samples of one throughput measurement (default: 5).
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            workers: default_workers(),
            logical_partitions: default_logical_partitions(),
            row_surrogate: default_row_surrogate(),
            batch_size: default_batch_size(),
            bulk_timeout_secs: None,
            table_lock: true,
            read_ahead_rows: default_read_ahead_rows(),
            monitor: true,
            monitor_interval_secs: default_monitor_interval_secs(),
        }
    }
}

impl CopyConfig {
    pub fn bulk_timeout(&self) -> Option<Duration> {
        self.bulk_timeout_secs.map(Duration::from_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }
}

/// Default per-row surrogate: the physical row locator read as a BIGINT.
pub const DEFAULT_ROW_SURROGATE: &str = "CAST(%%physloc%% AS BIGINT)";

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    7
}

fn default_logical_partitions() -> u32 {
    7
}

fn default_row_surrogate() -> String {
    DEFAULT_ROW_SURROGATE.to_string()
}

fn default_batch_size() -> usize {
    100_000
}

fn default_read_ahead_rows() -> usize {
    10_000
}

fn default_monitor_interval_secs() -> u64 {
    5
}
