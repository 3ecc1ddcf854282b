//! Error types for the parallel copy library.

use thiserror::Error;

/// Process exit code for configuration, connectivity and planning failures.
pub const EXIT_FATAL: u8 = 1;

/// Process exit code for a run that finished with failed partitions (strict mode only).
pub const EXIT_PARTIAL: u8 = 2;

/// Process exit code for file system errors (missing config file, etc.).
pub const EXIT_IO_ERROR: u8 = 7;

/// Process exit code for a run stopped by SIGINT/SIGTERM.
pub const EXIT_CANCELLED: u8 = 130;

/// Which side of the copy an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Source,
    Destination,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Destination => write!(f, "destination"),
        }
    }
}

/// Main error type for copy operations.
#[derive(Error, Debug)]
pub enum CopyError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A database could not be reached at startup.
    #[error("Cannot connect to {side} database: {message}")]
    Connectivity { side: Side, message: String },

    /// Catalog or partition metadata query failed or returned an unexpected shape.
    #[error("Metadata query failed for table {table}: {message}")]
    Metadata { table: String, message: String },

    /// A single partition failed to copy.
    #[error("Copy failed for {table} partition {partition}: {message}")]
    Copy {
        table: String,
        partition: u32,
        message: String,
    },

    /// Counter resolution or sampling failed.
    #[error("Throughput monitor error: {0}")]
    Monitor(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// SQL Server driver error
    #[error("SQL Server error: {0}")]
    Sql(#[from] tiberius::error::Error),

    /// A bulk write exceeded its configured timeout.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The run finished but some partitions failed (strict mode).
    #[error("{failed} of {total} partitions failed to copy")]
    PartitionsFailed { failed: usize, total: usize },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Copy cancelled")]
    Cancelled,
}

impl CopyError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        CopyError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Connectivity error for one side of the copy.
    pub fn connectivity(side: Side, message: impl std::fmt::Display) -> Self {
        CopyError::Connectivity {
            side,
            message: message.to_string(),
        }
    }

    /// Create a Metadata error for a table.
    pub fn metadata(table: impl Into<String>, message: impl Into<String>) -> Self {
        CopyError::Metadata {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Copy error for one partition of a table.
    pub fn copy(table: impl Into<String>, partition: u32, message: impl Into<String>) -> Self {
        CopyError::Copy {
            table: table.into(),
            partition,
            message: message.into(),
        }
    }

    /// Exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            CopyError::Io(_) => EXIT_IO_ERROR,
            CopyError::Cancelled => EXIT_CANCELLED,
            CopyError::PartitionsFailed { .. } => EXIT_PARTIAL,
            _ => EXIT_FATAL,
        }
    }

    /// One-line message with every nested cause appended, `outer: inner: root`.
    pub fn chain(&self) -> String {
        let mut output = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let text = err.to_string();
            // thiserror wrappers usually repeat their source in the message
            if !output.ends_with(&text) {
                output.push_str(": ");
                output.push_str(&text);
            }
            source = err.source();
        }
        output
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for copy operations.
pub type Result<T> = std::result::Result<T, CopyError>;
