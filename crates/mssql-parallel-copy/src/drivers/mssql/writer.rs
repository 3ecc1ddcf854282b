//! Bulk loads into the destination.
//!
//! A task's rows are sent as consecutive TDS bulk-load requests of
//! `batch_size` rows, all inside one transaction, so a failed partition
//! leaves nothing behind.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::{BulkOptions, BulkSink, RowData, TableName};
use crate::error::Result;

use super::connection::MssqlClient;

/// Destination session owning one dedicated connection.
pub struct MssqlBulkSink {
    client: MssqlClient,
}

impl MssqlBulkSink {
    pub fn new(client: MssqlClient) -> Self {
        Self { client }
    }

    async fn batch(&mut self, sql: &str) -> Result<()> {
        self.client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn load(
        &mut self,
        table: &TableName,
        batch_size: usize,
        rows: &mut mpsc::Receiver<Result<RowData>>,
    ) -> Result<u64> {
        let qualified = table.quoted();
        let mut total = 0u64;

        // One bulk request per batch; nothing is opened for an empty tail
        while let Some(first) = rows.recv().await {
            let first = first?;
            let mut request = self.client.bulk_insert(&qualified).await?;
            request.send(first.into_token_row()).await?;
            let mut sent = 1usize;

            while sent < batch_size {
                match rows.recv().await {
                    Some(row) => {
                        request.send(row?.into_token_row()).await?;
                        sent += 1;
                    }
                    None => break,
                }
            }

            request.finalize().await?;
            total += sent as u64;
            debug!("{}: batch of {} rows sent ({} total)", table, sent, total);
        }

        Ok(total)
    }
}

#[async_trait]
impl BulkSink for MssqlBulkSink {
    async fn write_rows(
        &mut self,
        table: &TableName,
        options: &BulkOptions,
        mut rows: mpsc::Receiver<Result<RowData>>,
    ) -> Result<u64> {
        self.batch("BEGIN TRANSACTION").await?;
        match self
            .load(table, options.batch_size.max(1), &mut rows)
            .await
        {
            Ok(total) => {
                self.batch("COMMIT TRANSACTION").await?;
                Ok(total)
            }
            Err(e) => {
                if let Err(rollback) = self.batch("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
                {
                    warn!("{}: rollback failed: {}", table, rollback);
                }
                Err(e)
            }
        }
    }
}
