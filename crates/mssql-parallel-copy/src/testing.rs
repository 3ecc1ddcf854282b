//! In-memory `CopyBackend` used by unit tests.
//!
//! Each table has a source row set, where every row carries a surrogate value
//! and a physical partition number, and a destination row set. The source
//! evaluates rendered partition predicates against those values, and the
//! sink only commits a task's rows once its stream ends cleanly.
//!
//! Tables have named columns, some of which a bulk load cannot fill. Every
//! column value of a source row is the row's id. Like a TDS bulk load, the
//! sink rejects rows whose width differs from the insertable column count.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tiberius::ColumnData;
use tokio::sync::mpsc;

use crate::core::{
    BulkOptions, BulkSink, CopyBackend, CounterSource, LockHint, MetadataProvider,
    PhysicalPartitionInfo, RowData, RowSource, TableName,
};
use crate::error::{CopyError, Result, Side};
use crate::plan::{CopyTask, RowLocator};

/// Bytes of log each committed row adds to the flushed-bytes counter.
pub const LOG_BYTES_PER_ROW: i64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Truncate(TableName),
    BulkLock(TableName, LockHint),
    Write(TableName),
}

#[derive(Debug, Clone, Copy)]
struct MemoryRow {
    id: i64,
    locator: RowLocator,
}

#[derive(Debug, Clone)]
struct MemoryColumn {
    name: String,
    insertable: bool,
}

#[derive(Debug, Default)]
struct MemoryTable {
    physical: Option<PhysicalPartitionInfo>,
    columns: Vec<MemoryColumn>,
    source: Vec<MemoryRow>,
    destination: Vec<i64>,
}

impl MemoryTable {
    fn insertable(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.insertable)
            .map(|c| c.name.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<TableName, MemoryTable>,
    unreachable: HashSet<Side>,
    read_failures: HashMap<(TableName, String), usize>,
    sink_open_failures: usize,
    write_delay: Option<Duration>,
    counter_broken: bool,
    log_bytes_flushed: i64,
    events: Vec<Event>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with `rows` source rows and a single insertable `id`
    /// column. With `physical`, rows are spread round-robin over its
    /// partitions.
    pub fn with_table(
        self,
        name: &str,
        physical: Option<PhysicalPartitionInfo>,
        rows: usize,
    ) -> Self {
        let partitions = physical
            .as_ref()
            .map(|p| p.partition_count.max(1))
            .unwrap_or(1);
        let source = (0..rows)
            .map(|i| {
                let id = i as i64;
                let spread = id.wrapping_mul(2_654_435_761);
                MemoryRow {
                    id,
                    locator: RowLocator {
                        surrogate: if i % 3 == 0 { -spread } else { spread },
                        physical_partition: (i as u32 % partitions) + 1,
                    },
                }
            })
            .collect();

        let table = TableName::parse(name).expect("valid test table name");
        self.lock().tables.insert(
            table,
            MemoryTable {
                physical,
                columns: vec![MemoryColumn {
                    name: "id".to_string(),
                    insertable: true,
                }],
                source,
                destination: Vec::new(),
            },
        );
        self
    }

    /// Replace a table's columns with `(name, insertable)` pairs.
    pub fn with_columns(self, name: &str, columns: &[(&str, bool)]) -> Self {
        let table = TableName::parse(name).expect("valid test table name");
        if let Some(t) = self.lock().tables.get_mut(&table) {
            t.columns = columns
                .iter()
                .map(|&(name, insertable)| MemoryColumn {
                    name: name.to_string(),
                    insertable,
                })
                .collect();
        }
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory backend lock poisoned")
    }

    pub fn set_unreachable(&self, side: Side) {
        self.lock().unreachable.insert(side);
    }

    /// The read for `task` sends `after` rows, then fails.
    pub fn fail_read_after(&self, task: &CopyTask, after: usize) {
        self.lock()
            .read_failures
            .insert((task.table.clone(), task.predicate().expect("valid predicate")), after);
    }

    /// The next `count` sink sessions fail to open.
    pub fn fail_sink_opens(&self, count: usize) {
        self.lock().sink_open_failures = count;
    }

    /// Every bulk write sleeps this long before loading.
    pub fn set_write_delay(&self, delay: Duration) {
        self.lock().write_delay = Some(delay);
    }

    pub fn break_counters(&self) {
        self.lock().counter_broken = true;
    }

    /// Pre-load destination rows, as left behind by an earlier run.
    pub fn seed_destination(&self, table: &TableName, rows: usize) {
        if let Some(t) = self.lock().tables.get_mut(table) {
            t.destination.extend((0..rows as i64).map(|i| -1 - i));
        }
    }

    pub fn destination_rows(&self, table: &TableName) -> u64 {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.destination.len() as u64)
            .unwrap_or(0)
    }

    pub fn destination_distinct_rows(&self, table: &TableName) -> u64 {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.destination.iter().collect::<HashSet<_>>().len() as u64)
            .unwrap_or(0)
    }

    /// Number of source rows `task`'s predicate selects.
    pub fn source_rows_claimed_by(&self, task: &CopyTask) -> u64 {
        self.lock()
            .tables
            .get(&task.table)
            .map(|t| t.source.iter().filter(|r| task.claims(&r.locator)).count() as u64)
            .unwrap_or(0)
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    fn missing(table: &TableName) -> CopyError {
        CopyError::metadata(table.to_string(), "table does not exist")
    }
}

/// Evaluate a rendered partition predicate against a row.
fn matches_predicate(predicate: &str, row: &RowLocator) -> bool {
    if predicate.starts_with("$PARTITION.") {
        let ordinal = predicate
            .rsplit_once(" = ")
            .and_then(|(_, n)| n.trim().parse::<u32>().ok());
        return ordinal == Some(row.physical_partition);
    }

    let parsed = predicate.rsplit_once(" % ").and_then(|(_, tail)| {
        let (modulus, remainder) = tail.split_once(" = ")?;
        Some((
            modulus.trim().parse::<u64>().ok()?,
            remainder.trim().parse::<u64>().ok()?,
        ))
    });
    match parsed {
        Some((modulus, remainder)) if modulus > 0 => {
            row.surrogate.unsigned_abs() % modulus == remainder
        }
        _ => false,
    }
}

#[async_trait]
impl MetadataProvider for MemoryBackend {
    async fn is_physically_partitioned(&self, table: &TableName) -> Result<bool> {
        let state = self.lock();
        let t = state.tables.get(table).ok_or_else(|| Self::missing(table))?;
        if t.physical.is_none() {
            return Ok(false);
        }
        let populated: HashSet<u32> = t
            .source
            .iter()
            .map(|r| r.locator.physical_partition)
            .collect();
        Ok(populated.len() > 1)
    }

    async fn physical_partition_info(&self, table: &TableName) -> Result<PhysicalPartitionInfo> {
        let state = self.lock();
        let t = state.tables.get(table).ok_or_else(|| Self::missing(table))?;
        t.physical
            .clone()
            .ok_or_else(|| CopyError::metadata(table.to_string(), "table is not partitioned"))
    }

    async fn insertable_columns(&self, table: &TableName) -> Result<Vec<String>> {
        let state = self.lock();
        let t = state.tables.get(table).ok_or_else(|| Self::missing(table))?;
        Ok(t.insertable())
    }
}

#[async_trait]
impl CopyBackend for MemoryBackend {
    async fn check_connectivity(&self, side: Side) -> Result<()> {
        if self.lock().unreachable.contains(&side) {
            return Err(CopyError::connectivity(side, "connection refused"));
        }
        Ok(())
    }

    async fn truncate(&self, table: &TableName) -> Result<()> {
        let mut state = self.lock();
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| Self::missing(table))?;
        t.destination.clear();
        state.events.push(Event::Truncate(table.clone()));
        Ok(())
    }

    async fn set_bulk_lock(&self, table: &TableName, hint: LockHint) -> Result<()> {
        let mut state = self.lock();
        if !state.tables.contains_key(table) {
            return Err(Self::missing(table));
        }
        state.events.push(Event::BulkLock(table.clone(), hint));
        Ok(())
    }

    async fn row_count(&self, side: Side, table: &TableName) -> Result<i64> {
        let state = self.lock();
        let t = state.tables.get(table).ok_or_else(|| Self::missing(table))?;
        Ok(match side {
            Side::Source => t.source.len() as i64,
            Side::Destination => t.destination.len() as i64,
        })
    }

    async fn open_source(&self) -> Result<Box<dyn RowSource>> {
        Ok(Box::new(MemorySource {
            state: self.state.clone(),
        }))
    }

    async fn open_sink(&self) -> Result<Box<dyn BulkSink>> {
        let mut state = self.lock();
        if state.sink_open_failures > 0 {
            state.sink_open_failures -= 1;
            return Err(CopyError::pool("connection refused", "opening bulk session"));
        }
        Ok(Box::new(MemorySink {
            state: self.state.clone(),
            write_delay: state.write_delay,
        }))
    }

    async fn open_counters(&self) -> Result<Box<dyn CounterSource>> {
        Ok(Box::new(MemoryCounters {
            state: self.state.clone(),
        }))
    }
}

struct MemorySource {
    state: Arc<Mutex<State>>,
}

impl RowSource for MemorySource {
    fn read_rows(
        self: Box<Self>,
        table: &TableName,
        columns: &[String],
        predicate: &str,
        buffer: usize,
    ) -> mpsc::Receiver<Result<RowData>> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let width = columns.len();

        let (rows, fail_after) = {
            let state = self.state.lock().expect("memory backend lock poisoned");
            let rows: Option<Result<Vec<i64>>> = state.tables.get(table).map(|t| {
                if let Some(unknown) = columns
                    .iter()
                    .find(|c| !t.columns.iter().any(|known| &known.name == *c))
                {
                    return Err(CopyError::metadata(
                        table.to_string(),
                        format!("invalid column name '{}'", unknown),
                    ));
                }
                Ok(t.source
                    .iter()
                    .filter(|r| matches_predicate(predicate, &r.locator))
                    .map(|r| r.id)
                    .collect())
            });
            let fail_after = state
                .read_failures
                .get(&(table.clone(), predicate.to_string()))
                .copied();
            (rows, fail_after)
        };
        let table = table.to_string();

        tokio::spawn(async move {
            let rows = match rows {
                Some(Ok(rows)) => rows,
                Some(Err(e)) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                None => {
                    let _ = tx
                        .send(Err(CopyError::metadata(table, "table does not exist")))
                        .await;
                    return;
                }
            };
            for (sent, id) in rows.into_iter().enumerate() {
                if fail_after == Some(sent) {
                    break;
                }
                let row = RowData::new(vec![ColumnData::I64(Some(id)); width]);
                if tx.send(Ok(row)).await.is_err() {
                    return;
                }
            }
            if fail_after.is_some() {
                let err = std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "injected read failure",
                );
                let _ = tx.send(Err(CopyError::from(err))).await;
            }
        });

        rx
    }
}

struct MemorySink {
    state: Arc<Mutex<State>>,
    write_delay: Option<Duration>,
}

#[async_trait]
impl BulkSink for MemorySink {
    async fn write_rows(
        &mut self,
        table: &TableName,
        _options: &BulkOptions,
        mut rows: mpsc::Receiver<Result<RowData>>,
    ) -> Result<u64> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        let expected = {
            let mut state = self.state.lock().expect("memory backend lock poisoned");
            state.events.push(Event::Write(table.clone()));
            state
                .tables
                .get(table)
                .ok_or_else(|| CopyError::metadata(table.to_string(), "table does not exist"))?
                .insertable()
                .len()
        };

        // Uncommitted until the stream ends cleanly
        let mut pending = Vec::new();
        while let Some(row) = rows.recv().await {
            let row = row?;
            if row.values().len() != expected {
                let message = format!(
                    "Expecting {} columns but {} were given",
                    expected,
                    row.values().len()
                );
                return Err(tiberius::error::Error::BulkInput(message.into()).into());
            }
            match row.values().first() {
                Some(ColumnData::I64(Some(id))) => pending.push(*id),
                other => {
                    return Err(CopyError::copy(
                        table.to_string(),
                        0,
                        format!("unexpected row shape: {:?}", other),
                    ))
                }
            }
        }

        let mut state = self.state.lock().expect("memory backend lock poisoned");
        let written = pending.len() as u64;
        state.log_bytes_flushed += written as i64 * LOG_BYTES_PER_ROW;
        state
            .tables
            .get_mut(table)
            .ok_or_else(|| CopyError::metadata(table.to_string(), "table does not exist"))?
            .destination
            .extend(pending);
        Ok(written)
    }
}

struct MemoryCounters {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl CounterSource for MemoryCounters {
    async fn resolve_instance(&mut self, counter: &str) -> Result<String> {
        if self.state.lock().expect("memory backend lock poisoned").counter_broken {
            return Err(CopyError::Monitor(format!(
                "counter '{}' has no instance",
                counter
            )));
        }
        Ok("memdb".to_string())
    }

    async fn sample(&mut self, _counter: &str, _instance: &str) -> Result<i64> {
        Ok(self
            .state
            .lock()
            .expect("memory backend lock poisoned")
            .log_bytes_flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_evaluation_matches_claims() {
        let row = RowLocator {
            surrogate: -13,
            physical_partition: 2,
        };
        assert!(matches_predicate("$PARTITION.[pf]([c]) = 2", &row));
        assert!(!matches_predicate("$PARTITION.[pf]([c]) = 1", &row));
        assert!(matches_predicate("ABS(CAST(%%physloc%% AS BIGINT)) % 4 = 1", &row));
        assert!(!matches_predicate("ABS(x) % 4 = 0", &row));
    }
}
