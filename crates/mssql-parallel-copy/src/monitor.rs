//! Destination log flush throughput monitor.
//!
//! Samples the destination's cumulative "log bytes flushed" counter on a fixed
//! interval and reports the flush rate, which shows whether the destination's
//! transaction log is what limits the copy. The monitor is advisory: its
//! failures are logged and never affect the copy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::CounterSource;
use crate::error::{CopyError, Result};

/// Performance counter sampled by the monitor.
pub const LOG_FLUSH_COUNTER: &str = "Log Bytes Flushed/sec";

/// Default sampling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

const BYTES_PER_MB: f64 = 1_048_576.0;

/// One reported measurement.
#[derive(Debug, Clone, Serialize)]
pub struct ThroughputSample {
    pub log_flush_mb_per_sec: f64,
    /// Rate of rows committed by finished partitions.
    pub rows_per_sec: f64,
    pub taken_at: DateTime<Utc>,
}

/// Convert two cumulative byte samples taken `elapsed` apart into MB/sec.
pub fn flush_rate_mb(first: i64, second: i64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (second - first) as f64 / secs / BYTES_PER_MB
}

pub struct ThroughputMonitor {
    counters: Box<dyn CounterSource>,
    interval: Duration,
    progress: Option<Arc<AtomicU64>>,
}

impl ThroughputMonitor {
    pub fn new(counters: Box<dyn CounterSource>, interval: Duration) -> Self {
        Self {
            counters,
            interval,
            progress: None,
        }
    }

    /// Also report copy progress (rows/sec) from a shared row counter.
    pub fn with_progress(mut self, progress: Arc<AtomicU64>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Sample until `done` fires.
    ///
    /// Each cycle is sample, wait, sample, report. `done` cuts the wait short
    /// and ends the loop after that cycle's report, so the last sample may
    /// cover a shorter window.
    pub async fn run(mut self, done: CancellationToken) -> Result<Vec<ThroughputSample>> {
        let instance = self
            .counters
            .resolve_instance(LOG_FLUSH_COUNTER)
            .await
            .map_err(monitor_error)?;
        debug!("Monitoring '{}' for instance {}", LOG_FLUSH_COUNTER, instance);

        let mut samples = Vec::new();
        loop {
            let first = self.sample(&instance).await?;
            let rows_before = self.rows();
            let start = Instant::now();

            let finished = tokio::select! {
                biased;
                _ = done.cancelled() => true,
                _ = tokio::time::sleep(self.interval) => false,
            };

            let second = self.sample(&instance).await?;
            let elapsed = start.elapsed();

            if !elapsed.is_zero() {
                let sample = ThroughputSample {
                    log_flush_mb_per_sec: flush_rate_mb(first, second, elapsed),
                    rows_per_sec: crate::worker::rate(
                        self.rows().saturating_sub(rows_before),
                        elapsed,
                    ),
                    taken_at: Utc::now(),
                };
                info!(
                    "Log flush: {:.2} MB/s, {:.0} rows/s",
                    sample.log_flush_mb_per_sec, sample.rows_per_sec
                );
                samples.push(sample);
            }

            if finished || done.is_cancelled() {
                break;
            }
        }

        Ok(samples)
    }

    /// Run in the background. Failures are logged and yield no samples.
    pub fn spawn(self, done: CancellationToken) -> JoinHandle<Vec<ThroughputSample>> {
        tokio::spawn(async move {
            match self.run(done).await {
                Ok(samples) => samples,
                Err(e) => {
                    warn!("Throughput monitor stopped: {}", e);
                    Vec::new()
                }
            }
        })
    }

    async fn sample(&mut self, instance: &str) -> Result<i64> {
        self.counters
            .sample(LOG_FLUSH_COUNTER, instance)
            .await
            .map_err(monitor_error)
    }

    fn rows(&self) -> u64 {
        self.progress
            .as_ref()
            .map(|p| p.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

fn monitor_error(e: CopyError) -> CopyError {
    match e {
        e @ CopyError::Monitor(_) => e,
        other => CopyError::Monitor(other.chain()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Counter that grows by a fixed amount per sample.
    struct SteppingCounter {
        value: i64,
        step: i64,
        fail_resolve: bool,
    }

    #[async_trait]
    impl CounterSource for SteppingCounter {
        async fn resolve_instance(&mut self, _counter: &str) -> Result<String> {
            if self.fail_resolve {
                return Err(CopyError::Sql(tiberius::error::Error::Protocol(
                    "no such counter".into(),
                )));
            }
            Ok("tpch".to_string())
        }

        async fn sample(&mut self, counter: &str, instance: &str) -> Result<i64> {
            assert_eq!(counter, LOG_FLUSH_COUNTER);
            assert_eq!(instance, "tpch");
            let current = self.value;
            self.value += self.step;
            Ok(current)
        }
    }

    fn counter(step: i64) -> Box<dyn CounterSource> {
        Box::new(SteppingCounter {
            value: 0,
            step,
            fail_resolve: false,
        })
    }

    #[test]
    fn test_flush_rate_mb() {
        let rate = flush_rate_mb(0, 10 * 1_048_576, Duration::from_secs(5));
        assert!((rate - 2.0).abs() < 1e-9);
        assert_eq!(flush_rate_mb(5, 10, Duration::ZERO), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_rate_per_cycle_until_done() {
        let done = CancellationToken::new();
        let monitor = ThroughputMonitor::new(counter(10 * 1_048_576), DEFAULT_INTERVAL);
        let handle = tokio::spawn(monitor.run(done.clone()));

        tokio::time::sleep(Duration::from_secs(12)).await;
        done.cancel();

        let samples = handle.await.unwrap().unwrap();
        assert!(samples.len() >= 2, "got {} samples", samples.len());
        // Full 5 s windows each flushed 10 MiB
        assert!((samples[0].log_flush_mb_per_sec - 2.0).abs() < 1e-6);
        assert!((samples[1].log_flush_mb_per_sec - 2.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_immediately_when_already_done() {
        let done = CancellationToken::new();
        done.cancel();
        let samples = ThroughputMonitor::new(counter(1), DEFAULT_INTERVAL)
            .run(done)
            .await
            .unwrap();
        assert!(samples.len() <= 1);
    }

    #[tokio::test]
    async fn test_resolution_failure_is_monitor_error() {
        let counters = Box::new(SteppingCounter {
            value: 0,
            step: 1,
            fail_resolve: true,
        });
        let err = ThroughputMonitor::new(counters, DEFAULT_INTERVAL)
            .run(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::Monitor(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_swallows_errors() {
        let counters = Box::new(SteppingCounter {
            value: 0,
            step: 1,
            fail_resolve: true,
        });
        let samples = ThroughputMonitor::new(counters, DEFAULT_INTERVAL)
            .spawn(CancellationToken::new())
            .await
            .unwrap();
        assert!(samples.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rows_per_sec_from_progress() {
        let progress = Arc::new(AtomicU64::new(0));
        let done = CancellationToken::new();
        let monitor =
            ThroughputMonitor::new(counter(0), DEFAULT_INTERVAL).with_progress(progress.clone());
        let handle = tokio::spawn(monitor.run(done.clone()));

        // Let the first cycle take its opening sample
        tokio::time::sleep(Duration::from_secs(1)).await;
        progress.store(500, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(6)).await;
        done.cancel();

        let samples = handle.await.unwrap().unwrap();
        assert!((samples[0].rows_per_sec - 100.0).abs() < 1e-6);
    }
}
