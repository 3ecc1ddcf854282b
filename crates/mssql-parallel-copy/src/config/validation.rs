//! Configuration validation.

use super::{Config, ConnectionConfig};
use crate::core::TableName;
use crate::error::{CopyError, Result};
use std::collections::HashSet;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection(&config.source, "source")?;
    validate_connection(&config.destination, "destination")?;

    // Truncating the destination would wipe the source
    if config.source.connection_string.is_none()
        && config.destination.connection_string.is_none()
        && config.source.host.eq_ignore_ascii_case(&config.destination.host)
        && config.source.port == config.destination.port
        && config.source.database.eq_ignore_ascii_case(&config.destination.database)
    {
        return Err(CopyError::Config(
            "source and destination cannot be the same database".into(),
        ));
    }
    if let (Some(src), Some(dst)) = (
        &config.source.connection_string,
        &config.destination.connection_string,
    ) {
        if src.trim() == dst.trim() {
            return Err(CopyError::Config(
                "source and destination cannot be the same database".into(),
            ));
        }
    }

    let copy = &config.copy;
    if copy.tables.is_empty() {
        return Err(CopyError::Config(
            "copy.tables must list at least one table".into(),
        ));
    }
    let mut seen = HashSet::new();
    for raw in &copy.tables {
        let table = TableName::parse(raw)?;
        if !seen.insert(table.to_string().to_lowercase()) {
            return Err(CopyError::Config(format!(
                "copy.tables lists {} more than once",
                table
            )));
        }
    }

    if copy.workers == 0 {
        return Err(CopyError::Config("copy.workers must be at least 1".into()));
    }
    if copy.logical_partitions == 0 {
        return Err(CopyError::Config(
            "copy.logical_partitions must be at least 1".into(),
        ));
    }
    if copy.batch_size == 0 {
        return Err(CopyError::Config("copy.batch_size must be at least 1".into()));
    }
    if copy.read_ahead_rows == 0 {
        return Err(CopyError::Config(
            "copy.read_ahead_rows must be at least 1".into(),
        ));
    }
    if copy.row_surrogate.trim().is_empty() {
        return Err(CopyError::Config("copy.row_surrogate cannot be empty".into()));
    }

    Ok(())
}

fn validate_connection(conn: &ConnectionConfig, side: &str) -> Result<()> {
    if let Some(ado) = &conn.connection_string {
        if ado.trim().is_empty() {
            return Err(CopyError::Config(format!(
                "{}.connection_string cannot be empty",
                side
            )));
        }
        return Ok(());
    }
    if conn.host.is_empty() {
        return Err(CopyError::Config(format!("{}.host is required", side)));
    }
    if conn.database.is_empty() {
        return Err(CopyError::Config(format!("{}.database is required", side)));
    }
    if conn.user.is_empty() {
        return Err(CopyError::Config(format!("{}.user is required", side)));
    }
    Ok(())
}
