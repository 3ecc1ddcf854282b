//! Partition reads from the source.

use futures::TryStreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::{quote_mssql, RowData, RowSource, TableName};
use crate::error::Result;

use super::connection::MssqlClient;

/// Filtered read of one partition. The column list matches the bulk load's
/// column list, so rows pass through unchanged.
pub fn select_sql(table: &TableName, columns: &[String], predicate: &str) -> Result<String> {
    let columns = columns
        .iter()
        .map(|c| quote_mssql(c))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "SELECT {} FROM {} WITH (NOLOCK) WHERE {}",
        columns.join(", "),
        table.quoted(),
        predicate
    ))
}

/// Source session owning one dedicated connection.
pub struct MssqlRowSource {
    client: MssqlClient,
}

impl MssqlRowSource {
    pub fn new(client: MssqlClient) -> Self {
        Self { client }
    }
}

impl RowSource for MssqlRowSource {
    fn read_rows(
        self: Box<Self>,
        table: &TableName,
        columns: &[String],
        predicate: &str,
        buffer: usize,
    ) -> mpsc::Receiver<Result<RowData>> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let sql = select_sql(table, columns, predicate);
        let client = self.client;

        tokio::spawn(async move {
            let result = match sql {
                Ok(sql) => stream_rows(client, &sql, &tx).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }
}

async fn stream_rows(
    mut client: MssqlClient,
    sql: &str,
    tx: &mpsc::Sender<Result<RowData>>,
) -> Result<()> {
    debug!("{}", sql);
    let mut rows = client.simple_query(sql).await?.into_row_stream();

    while let Some(row) = rows.try_next().await? {
        if tx.send(Ok(RowData::from(row))).await.is_err() {
            // Writer gave up on this task
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_select_sql_lists_columns() {
        let table = TableName::parse("LINEITEM").unwrap();
        assert_eq!(
            select_sql(
                &table,
                &columns(&["L_ORDERKEY", "L_QUANTITY"]),
                "$PARTITION.[PF_LINEITEM]([L_ORDERKEY]) = 2"
            )
            .unwrap(),
            "SELECT [L_ORDERKEY], [L_QUANTITY] FROM [dbo].[LINEITEM] WITH (NOLOCK) \
             WHERE $PARTITION.[PF_LINEITEM]([L_ORDERKEY]) = 2"
        );
    }

    #[test]
    fn test_select_sql_quotes_column_names() {
        let table = TableName::parse("ORDERS").unwrap();
        let sql = select_sql(&table, &columns(&["odd]col", "O total"]), "1 = 1").unwrap();
        assert!(sql.starts_with("SELECT [odd]]col], [O total] FROM [dbo].[ORDERS]"));
    }

    #[test]
    fn test_select_sql_rejects_invalid_column() {
        let table = TableName::parse("ORDERS").unwrap();
        assert!(select_sql(&table, &columns(&[""]), "1 = 1").is_err());
    }
}
