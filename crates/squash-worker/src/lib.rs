//! # SquashWorker: periodic count table compaction
//!
//! Runs the squasher over every registered count table on a fixed interval
//! so delta rows never pile up between squash runs.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │ Ticker / wake  │────▶│ SquashWorker │────▶│ AsyncCounts-     │
//! │ (MPSC Channel) │     │  (one loop)  │     │ Database (SQLite)│
//! └────────────────┘     └──────────────┘     └──────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Single loop**: squash runs never overlap inside one process.
//! - **Backlog draining**: a table that hits its `squash_max_distinct` cap is
//!   squashed again in the same run until it comes back under the cap.
//! - **Backoff**: a table whose squash fails is skipped with exponential
//!   backoff (2s → 4s → ... → 300s max) while other tables keep squashing.
//!
//! ## Example
//!
//! ```ignore
//! let worker = SquashWorker::new(SquashWorkerConfig::default(), db);
//! let handle = worker.start()?;
//! worker.wake(); // squash now instead of waiting for the next tick
//! handle.shutdown().await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use counts_database::{AsyncCountsDatabase, CountsResult};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Capacity of the wake-up channel. Extra wake-ups are dropped.
const WAKE_CAPACITY: usize = 1;

/// Upper bound on squash passes per table within one run.
const MAX_PASSES_PER_RUN: usize = 100;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("SquashWorker already started")]
    AlreadyStarted,
}

/// Configuration for the squash loop.
#[derive(Debug, Clone)]
pub struct SquashWorkerConfig {
    /// Time between squash runs.
    pub interval: Duration,
    /// Base delay before retrying a table whose squash failed.
    pub backoff_base: Duration,
    /// Cap on the retry delay.
    pub backoff_max: Duration,
}

impl Default for SquashWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl SquashWorkerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Outcome of one squash run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SquashReport {
    /// Keys squashed per table, in table order.
    pub squashed: Vec<(String, usize)>,
    /// Tables whose squash failed in this run.
    pub failed: Vec<String>,
    /// Tables skipped while backing off from an earlier failure.
    pub skipped: Vec<String>,
}

impl SquashReport {
    pub fn total_keys(&self) -> usize {
        self.squashed.iter().map(|(_, keys)| keys).sum()
    }
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    count: u32,
    last_attempt: Instant,
}

/// Periodic squasher over all registered count tables.
pub struct SquashWorker {
    config: SquashWorkerConfig,
    db: AsyncCountsDatabase,
    failures: Arc<Mutex<HashMap<String, Failure>>>,
    sender: mpsc::Sender<()>,
    receiver: Mutex<Option<mpsc::Receiver<()>>>,
}

/// Handle to a started worker loop.
pub struct SquashWorkerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SquashWorkerHandle {
    /// Stop the loop after any in-flight run and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "SquashWorker task ended abnormally");
        }
    }
}

impl SquashWorker {
    pub fn new(config: SquashWorkerConfig, db: AsyncCountsDatabase) -> Self {
        let (sender, receiver) = mpsc::channel(WAKE_CAPACITY);
        Self {
            config,
            db,
            failures: Arc::new(Mutex::new(HashMap::new())),
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Spawn the background loop. The first run starts immediately.
    pub fn start(&self) -> Result<SquashWorkerHandle, WorkerError> {
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(WorkerError::AlreadyStarted)?;

        let config = self.config.clone();
        let db = self.db.clone();
        let failures = self.failures.clone();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = config.interval.as_secs(), "SquashWorker started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    Some(()) = receiver.recv() => {
                        debug!("SquashWorker woken");
                    }
                    _ = shutdown_rx.changed() => break,
                }

                if let Err(e) = run_squash(&db, &config, &failures).await {
                    warn!(error = %e, "SquashWorker failed to load count tables");
                }
            }

            info!("SquashWorker stopped");
        });

        Ok(SquashWorkerHandle { shutdown, task })
    }

    /// Ask the loop to squash now. A wake-up already pending absorbs this one.
    pub fn wake(&self) {
        let _ = self.sender.try_send(());
    }

    /// Run one squash pass over every registered table.
    pub async fn run_once(&self) -> CountsResult<SquashReport> {
        run_squash(&self.db, &self.config, &self.failures).await
    }
}

async fn run_squash(
    db: &AsyncCountsDatabase,
    config: &SquashWorkerConfig,
    failures: &Mutex<HashMap<String, Failure>>,
) -> CountsResult<SquashReport> {
    let specs = db.count_specs().await?;
    let started = Instant::now();
    let mut report = SquashReport::default();

    for spec in specs {
        let table = spec.table.clone();
        let now = Instant::now();

        let previous = failures.lock().get(&table).copied();
        if let Some(failure) = previous {
            if !is_table_due(failure, now, config) {
                debug!(table = %table, failures = failure.count, "Skipping table (backing off)");
                report.skipped.push(table);
                continue;
            }
        }

        match drain_table(db, &spec).await {
            Ok(keys) => {
                failures.lock().remove(&table);
                report.squashed.push((table, keys));
            }
            Err(e) => {
                let count = previous.map_or(1, |f| f.count.saturating_add(1));
                warn!(table = %table, failures = count, error = %e, "Squash failed");
                failures.lock().insert(
                    table.clone(),
                    Failure {
                        count,
                        last_attempt: now,
                    },
                );
                report.failed.push(table);
            }
        }
    }

    if report.total_keys() > 0 || !report.failed.is_empty() {
        info!(
            keys = report.total_keys(),
            failed = report.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Squash run finished"
        );
    }
    Ok(report)
}

/// Squash `spec` until a pass comes back under its cap.
async fn drain_table(
    db: &AsyncCountsDatabase,
    spec: &counts_database::CountSpec,
) -> CountsResult<usize> {
    let mut total = 0;
    for _ in 0..MAX_PASSES_PER_RUN {
        let keys = db.squash(spec.clone()).await?;
        total += keys;
        if keys < spec.squash_max_distinct {
            break;
        }
    }
    Ok(total)
}

fn is_table_due(failure: Failure, now: Instant, config: &SquashWorkerConfig) -> bool {
    now >= failure.last_attempt + compute_backoff(failure.count, config)
}

fn compute_backoff(failures: u32, config: &SquashWorkerConfig) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }

    let shift = failures.saturating_sub(1);
    let multiplier = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
    config
        .backoff_base
        .saturating_mul(multiplier)
        .min(config.backoff_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use counts_database::{ColumnType, CountFilter, CountKey, CountSpec};
    use tempfile::tempdir;

    async fn open_db(dir: &tempfile::TempDir) -> AsyncCountsDatabase {
        AsyncCountsDatabase::open(&dir.path().join("counts.sqlite"))
            .await
            .unwrap()
    }

    #[test]
    fn compute_backoff_caps_and_grows() {
        let config = SquashWorkerConfig {
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(10),
            ..SquashWorkerConfig::default()
        };

        assert_eq!(compute_backoff(0, &config), Duration::ZERO);
        assert_eq!(compute_backoff(1, &config), Duration::from_secs(2));
        assert_eq!(compute_backoff(2, &config), Duration::from_secs(4));
        assert_eq!(compute_backoff(3, &config), Duration::from_secs(8));
        assert_eq!(compute_backoff(4, &config), Duration::from_secs(10));
        assert_eq!(compute_backoff(u32::MAX, &config), Duration::from_secs(10));
    }

    #[test]
    fn config_default_values() {
        let config = SquashWorkerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.backoff_base, Duration::from_secs(2));
        assert_eq!(config.backoff_max, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn run_once_squashes_every_table() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir).await;

        let scoped = CountSpec::scoped("reporters_counts");
        let small = CountSpec::scoped("small_counts").with_squash_max_distinct(2);
        db.install(scoped.clone()).await.unwrap();
        db.install(small.clone()).await.unwrap();

        db.record(scoped.clone(), CountKey::scope("total"), 1).await.unwrap();
        db.record(scoped.clone(), CountKey::scope("total"), 1).await.unwrap();
        for scope in ["a", "b", "c", "d", "e"] {
            db.record(small.clone(), CountKey::scope(scope), 1).await.unwrap();
        }

        let worker = SquashWorker::new(SquashWorkerConfig::default(), db.clone());
        let report = worker.run_once().await.unwrap();

        // The capped table is drained across passes.
        assert_eq!(
            report.squashed,
            vec![("reporters_counts".to_string(), 1), ("small_counts".to_string(), 5)]
        );
        assert_eq!(db.unsquashed_count(small.clone()).await.unwrap(), 0);
        assert_eq!(db.sum(small, CountFilter::new()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn failing_table_backs_off_without_blocking_others() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir).await;

        let broken = CountSpec::new("loose_counts").column("scope", ColumnType::Text);
        let good = CountSpec::scoped("reporters_counts");
        db.install(broken).await.unwrap();
        db.install(good.clone()).await.unwrap();
        db.record(good.clone(), CountKey::scope("total"), 1).await.unwrap();

        let worker = SquashWorker::new(SquashWorkerConfig::default(), db);

        let first = worker.run_once().await.unwrap();
        assert_eq!(first.failed, vec!["loose_counts".to_string()]);
        assert_eq!(first.squashed, vec![("reporters_counts".to_string(), 1)]);

        let second = worker.run_once().await.unwrap();
        assert_eq!(second.skipped, vec!["loose_counts".to_string()]);
        assert!(second.failed.is_empty());
    }

    #[tokio::test]
    async fn started_worker_squashes_and_shuts_down() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir).await;
        let spec = CountSpec::scoped("reporters_counts");
        db.install(spec.clone()).await.unwrap();
        for _ in 0..3 {
            db.record(spec.clone(), CountKey::scope("total"), 1).await.unwrap();
        }

        let config = SquashWorkerConfig::default().with_interval(Duration::from_millis(20));
        let worker = SquashWorker::new(config, db.clone());
        let handle = worker.start().unwrap();
        assert!(matches!(worker.start(), Err(WorkerError::AlreadyStarted)));

        let mut remaining = 3;
        for _ in 0..100 {
            remaining = db.unsquashed_count(spec.clone()).await.unwrap();
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remaining, 0);

        handle.shutdown().await;
        assert_eq!(db.sum(spec, CountFilter::new()).await.unwrap(), 3);
    }
}
