//! Microsoft SQL Server driver.
//!
//! [`MssqlBackend`] holds one bb8 pool per side. Pooled connections serve
//! short metadata and maintenance queries; every copy task, and the throughput
//! monitor, gets a dedicated connection that is closed when its session is
//! dropped.

mod catalog;
mod connection;
mod counters;
mod reader;
mod writer;

pub use connection::{build_pool, MssqlClient, TiberiusConnectionManager};
pub use counters::MssqlCounters;
pub use reader::{select_sql, MssqlRowSource};
pub use writer::MssqlBulkSink;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tracing::{debug, info};

use crate::config::Config;
use crate::core::{
    BulkSink, CopyBackend, CounterSource, LockHint, MetadataProvider, PhysicalPartitionInfo,
    RowSource, TableName,
};
use crate::error::{CopyError, Result, Side};

/// SQL Server source and destination.
pub struct MssqlBackend {
    source: Pool<TiberiusConnectionManager>,
    destination: Pool<TiberiusConnectionManager>,
}

impl MssqlBackend {
    /// Configure both pools, sized for every worker plus metadata and
    /// monitor traffic. Nothing connects until first use.
    pub fn connect(config: &Config) -> Result<Self> {
        let pool_size = pool_size(config.copy.workers)?;
        Ok(Self {
            source: build_pool(&config.source, pool_size, "source")?,
            destination: build_pool(&config.destination, pool_size, "destination")?,
        })
    }

    fn pool(&self, side: Side) -> &Pool<TiberiusConnectionManager> {
        match side {
            Side::Source => &self.source,
            Side::Destination => &self.destination,
        }
    }

    async fn get(&self, side: Side) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool(side)
            .get()
            .await
            .map_err(|e| CopyError::pool(e, format!("getting {} connection", side)))
    }

    async fn dedicated(&self, side: Side) -> Result<MssqlClient> {
        self.pool(side)
            .dedicated_connection()
            .await
            .map_err(|e| CopyError::pool(e, format!("opening dedicated {} connection", side)))
    }
}

#[async_trait]
impl MetadataProvider for MssqlBackend {
    async fn is_physically_partitioned(&self, table: &TableName) -> Result<bool> {
        let mut conn = self
            .get(Side::Source)
            .await
            .map_err(|e| CopyError::metadata(table.to_string(), e.chain()))?;
        Ok(catalog::populated_partitions(&mut conn, table).await? > 1)
    }

    async fn physical_partition_info(&self, table: &TableName) -> Result<PhysicalPartitionInfo> {
        let mut conn = self
            .get(Side::Source)
            .await
            .map_err(|e| CopyError::metadata(table.to_string(), e.chain()))?;
        catalog::partition_info(&mut conn, table).await
    }

    async fn insertable_columns(&self, table: &TableName) -> Result<Vec<String>> {
        let mut conn = self
            .get(Side::Destination)
            .await
            .map_err(|e| CopyError::metadata(table.to_string(), e.chain()))?;
        catalog::insertable_columns(&mut conn, table).await
    }
}

#[async_trait]
impl CopyBackend for MssqlBackend {
    async fn check_connectivity(&self, side: Side) -> Result<()> {
        let mut conn = self
            .dedicated(side)
            .await
            .map_err(|e| CopyError::connectivity(side, e.chain()))?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| CopyError::connectivity(side, e))?
            .into_row()
            .await
            .map_err(|e| CopyError::connectivity(side, e))?;
        info!("Connected to {} database", side);
        Ok(())
    }

    async fn truncate(&self, table: &TableName) -> Result<()> {
        let mut conn = self.get(Side::Destination).await?;
        let sql = catalog::truncate_sql(table);
        debug!("{}", sql);
        conn.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn set_bulk_lock(&self, table: &TableName, hint: LockHint) -> Result<()> {
        let mut conn = self.get(Side::Destination).await?;
        let sql = catalog::bulk_lock_sql(table, hint);
        debug!("{}", sql);
        conn.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn row_count(&self, side: Side, table: &TableName) -> Result<i64> {
        let mut conn = self.get(side).await?;
        catalog::row_count(&mut conn, table).await
    }

    async fn open_source(&self) -> Result<Box<dyn RowSource>> {
        Ok(Box::new(MssqlRowSource::new(
            self.dedicated(Side::Source).await?,
        )))
    }

    async fn open_sink(&self) -> Result<Box<dyn BulkSink>> {
        Ok(Box::new(MssqlBulkSink::new(
            self.dedicated(Side::Destination).await?,
        )))
    }

    async fn open_counters(&self) -> Result<Box<dyn CounterSource>> {
        Ok(Box::new(MssqlCounters::new(
            self.dedicated(Side::Destination).await?,
        )))
    }
}

/// One connection per worker plus two for metadata and the monitor.
fn pool_size(workers: usize) -> Result<u32> {
    u32::try_from(workers)
        .ok()
        .and_then(|w| w.checked_add(2))
        .ok_or_else(|| CopyError::Config(format!("workers ({}) exceeds the pool size limit", workers)))
}
