//! Catalog and partition metadata queries.

use tracing::debug;

use crate::core::identifier::escape_literal;
use crate::core::{LockHint, PhysicalPartitionInfo, TableName};
use crate::error::{CopyError, Result, Side};

use super::connection::MssqlClient;

const TABLE_EXISTS_SQL: &str = "SELECT CASE WHEN OBJECT_ID(@P1, 'U') IS NULL THEN 0 ELSE 1 END";

/// Partitions of the heap or clustered index that hold rows.
const POPULATED_PARTITIONS_SQL: &str = r#"SELECT COUNT(*)
    FROM sys.dm_db_partition_stats
    WHERE object_id = OBJECT_ID(@P1, 'U')
      AND index_id IN (0, 1)
      AND row_count > 0"#;

const PARTITION_INFO_SQL: &str = r#"SELECT pf.name, c.name, pf.fanout
    FROM sys.indexes i
    JOIN sys.partition_schemes ps ON ps.data_space_id = i.data_space_id
    JOIN sys.partition_functions pf ON pf.function_id = ps.function_id
    JOIN sys.index_columns ic
      ON ic.object_id = i.object_id
     AND ic.index_id = i.index_id
     AND ic.partition_ordinal = 1
    JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
    WHERE i.object_id = OBJECT_ID(@P1, 'U')
      AND i.index_id IN (0, 1)"#;

/// Columns a TDS bulk load fills, in the order it expects them.
const INSERTABLE_COLUMNS_SQL: &str = r#"SELECT c.name
    FROM sys.columns c
    WHERE c.object_id = OBJECT_ID(@P1, 'U')
      AND c.is_identity = 0
      AND c.is_computed = 0
      AND TYPE_NAME(c.system_type_id) <> 'timestamp'
    ORDER BY c.column_id"#;

fn metadata_error(table: &TableName, e: impl std::fmt::Display) -> CopyError {
    CopyError::metadata(table.to_string(), e.to_string())
}

pub async fn table_exists(client: &mut MssqlClient, table: &TableName) -> Result<bool> {
    let name = table.quoted();
    let row = client
        .query(TABLE_EXISTS_SQL, &[&name.as_str()])
        .await
        .map_err(|e| metadata_error(table, e))?
        .into_row()
        .await
        .map_err(|e| metadata_error(table, e))?;
    Ok(row.and_then(|r| r.get::<i32, _>(0)).unwrap_or(0) == 1)
}

async fn require_table(client: &mut MssqlClient, table: &TableName, side: Side) -> Result<()> {
    if !table_exists(client, table).await? {
        return Err(CopyError::metadata(
            table.to_string(),
            format!("table does not exist on the {}", side),
        ));
    }
    Ok(())
}

/// Number of populated partitions of the table's base storage.
pub async fn populated_partitions(client: &mut MssqlClient, table: &TableName) -> Result<i32> {
    require_table(client, table, Side::Source).await?;

    let name = table.quoted();
    let row = client
        .query(POPULATED_PARTITIONS_SQL, &[&name.as_str()])
        .await
        .map_err(|e| metadata_error(table, e))?
        .into_row()
        .await
        .map_err(|e| metadata_error(table, e))?
        .ok_or_else(|| metadata_error(table, "partition statistics returned no rows"))?;

    let count = row
        .try_get::<i32, _>(0)
        .map_err(|e| metadata_error(table, e))?
        .unwrap_or(0);
    debug!("{}: {} populated partitions", table, count);
    Ok(count)
}

pub async fn partition_info(
    client: &mut MssqlClient,
    table: &TableName,
) -> Result<PhysicalPartitionInfo> {
    require_table(client, table, Side::Source).await?;

    let name = table.quoted();
    let row = client
        .query(PARTITION_INFO_SQL, &[&name.as_str()])
        .await
        .map_err(|e| metadata_error(table, e))?
        .into_row()
        .await
        .map_err(|e| metadata_error(table, e))?
        .ok_or_else(|| {
            metadata_error(table, "no partition scheme on the heap or clustered index")
        })?;

    let function_name: Option<&str> = row.try_get(0).map_err(|e| metadata_error(table, e))?;
    let column: Option<&str> = row.try_get(1).map_err(|e| metadata_error(table, e))?;
    let fanout: Option<i32> = row.try_get(2).map_err(|e| metadata_error(table, e))?;

    match (function_name, column, fanout) {
        (Some(function_name), Some(column), Some(fanout)) if fanout > 0 => {
            Ok(PhysicalPartitionInfo {
                function_name: function_name.to_string(),
                column: column.to_string(),
                partition_count: fanout as u32,
            })
        }
        _ => Err(metadata_error(
            table,
            "partition function metadata is incomplete",
        )),
    }
}

/// Destination columns for the bulk load, skipping identity, computed and
/// rowversion columns.
pub async fn insertable_columns(client: &mut MssqlClient, table: &TableName) -> Result<Vec<String>> {
    require_table(client, table, Side::Destination).await?;

    let name = table.quoted();
    let rows = client
        .query(INSERTABLE_COLUMNS_SQL, &[&name.as_str()])
        .await
        .map_err(|e| metadata_error(table, e))?
        .into_first_result()
        .await
        .map_err(|e| metadata_error(table, e))?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let column: Option<&str> = row.try_get(0).map_err(|e| metadata_error(table, e))?;
        if let Some(column) = column {
            columns.push(column.to_string());
        }
    }
    debug!("{}: {} insertable columns", table, columns.len());
    Ok(columns)
}

pub fn row_count_sql(table: &TableName) -> String {
    format!(
        "SELECT CAST(COUNT_BIG(*) AS BIGINT) FROM {} WITH (NOLOCK)",
        table.quoted()
    )
}

pub async fn row_count(client: &mut MssqlClient, table: &TableName) -> Result<i64> {
    let row = client
        .simple_query(row_count_sql(table))
        .await?
        .into_row()
        .await?;
    Ok(row.and_then(|r| r.get::<i64, _>(0)).unwrap_or(0))
}

pub fn truncate_sql(table: &TableName) -> String {
    format!("TRUNCATE TABLE {}", table.quoted())
}

/// Set the persistent `table lock on bulk load` option to match `hint`.
pub fn bulk_lock_sql(table: &TableName, hint: LockHint) -> String {
    let enabled = match hint {
        LockHint::TableLock => 1,
        LockHint::RowLock => 0,
    };
    format!(
        "EXEC sp_tableoption N'{}', 'table lock on bulk load', {}",
        escape_literal(&table.quoted()),
        enabled
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_count_sql() {
        let table = TableName::parse("sales.Orders").unwrap();
        assert_eq!(
            row_count_sql(&table),
            "SELECT CAST(COUNT_BIG(*) AS BIGINT) FROM [sales].[Orders] WITH (NOLOCK)"
        );
    }

    #[test]
    fn test_truncate_sql_quotes_identifiers() {
        let table = TableName::new("dbo", "odd]name").unwrap();
        assert_eq!(truncate_sql(&table), "TRUNCATE TABLE [dbo].[odd]]name]");
    }

    #[test]
    fn test_bulk_lock_sql_sets_option_both_ways() {
        let table = TableName::new("dbo", "O'Brien").unwrap();
        assert_eq!(
            bulk_lock_sql(&table, LockHint::TableLock),
            "EXEC sp_tableoption N'[dbo].[O''Brien]', 'table lock on bulk load', 1"
        );
        assert_eq!(
            bulk_lock_sql(&table, LockHint::RowLock),
            "EXEC sp_tableoption N'[dbo].[O''Brien]', 'table lock on bulk load', 0"
        );
    }

    #[test]
    fn test_insertable_columns_skip_generated_columns() {
        assert!(INSERTABLE_COLUMNS_SQL.contains("is_identity = 0"));
        assert!(INSERTABLE_COLUMNS_SQL.contains("is_computed = 0"));
        assert!(INSERTABLE_COLUMNS_SQL.contains("<> 'timestamp'"));
        assert!(INSERTABLE_COLUMNS_SQL.ends_with("ORDER BY c.column_id"));
    }

    #[test]
    fn test_metadata_queries_filter_base_storage() {
        for sql in [POPULATED_PARTITIONS_SQL, PARTITION_INFO_SQL] {
            assert!(sql.contains("OBJECT_ID(@P1, 'U')"));
            assert!(sql.contains("IN (0, 1)"));
        }
        assert!(POPULATED_PARTITIONS_SQL.contains("row_count > 0"));
        assert!(PARTITION_INFO_SQL.contains("partition_ordinal = 1"));
    }
}
