//! `sys.dm_os_performance_counters` sampling.

use async_trait::async_trait;

use crate::core::CounterSource;
use crate::error::{CopyError, Result};

use super::connection::MssqlClient;

/// Database-scoped counters are keyed by database name.
const RESOLVE_INSTANCE_SQL: &str = r#"SELECT TOP 1 RTRIM(instance_name)
    FROM sys.dm_os_performance_counters
    WHERE RTRIM(counter_name) = @P1
      AND RTRIM(instance_name) = DB_NAME()"#;

const SAMPLE_SQL: &str = r#"SELECT cntr_value
    FROM sys.dm_os_performance_counters
    WHERE RTRIM(counter_name) = @P1
      AND RTRIM(instance_name) = @P2"#;

/// Counter session owning one dedicated destination connection.
pub struct MssqlCounters {
    client: MssqlClient,
}

impl MssqlCounters {
    pub fn new(client: MssqlClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CounterSource for MssqlCounters {
    async fn resolve_instance(&mut self, counter: &str) -> Result<String> {
        let row = self
            .client
            .query(RESOLVE_INSTANCE_SQL, &[&counter])
            .await?
            .into_row()
            .await?;

        row.and_then(|r| r.get::<&str, _>(0).map(str::to_string))
            .ok_or_else(|| {
                CopyError::Monitor(format!(
                    "counter '{}' has no instance for the current database",
                    counter
                ))
            })
    }

    async fn sample(&mut self, counter: &str, instance: &str) -> Result<i64> {
        let row = self
            .client
            .query(SAMPLE_SQL, &[&counter, &instance])
            .await?
            .into_row()
            .await?;

        row.and_then(|r| r.get::<i64, _>(0))
            .ok_or_else(|| CopyError::Monitor(format!("counter '{}' disappeared", counter)))
    }
}
