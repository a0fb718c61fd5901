//! Metric store for gauges and counters.
//!
//! Every backend implements [`MetricStore`]: gauges are last-write-wins,
//! counters accumulate until reset, and an id keeps the kind of its first
//! write. Three backends are provided:
//!
//! - [`memory::MemStore`]: a locked map, lost on exit;
//! - [`file::FileStore`]: a `MemStore` checkpointed to a JSON snapshot;
//! - [`sqlite::SqliteStore`]: one row per metric in a SQLite database.
//!
//! Use [`open_store`] to pick one from a [`StoreConfig`].

pub mod error;
pub mod file;
pub mod memory;
pub mod sqlite;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metron_common::{MetricRecord, MetricValue};

pub use error::{Result, StorageError};

/// Whole-store snapshot keyed by metric id.
pub type Snapshot = HashMap<String, MetricRecord>;

/// Persistence backend for metrics.
///
/// Implementations must be safe to share across tasks: the agent's poller
/// and report workers, and every server request, hold the same store.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Overwrites a gauge and returns the stored record.
    ///
    /// Fails with [`StorageError::KindMismatch`] when `id` is a counter.
    async fn update_gauge(&self, id: &str, value: f64) -> Result<MetricRecord>;

    /// Adds `delta` to a counter (created at zero) and returns the new total.
    ///
    /// Fails with [`StorageError::KindMismatch`] when `id` is a gauge.
    async fn update_counter(&self, id: &str, delta: i64) -> Result<MetricRecord>;

    /// Applies a batch as one unit.
    ///
    /// Counter entries for the same id are summed and gauge entries resolve
    /// to the last occurrence before anything is written. If any entry is
    /// rejected nothing is applied.
    async fn update_batch(&self, records: &[MetricRecord]) -> Result<()>;

    /// Forces a counter to zero, creating it if absent.
    async fn reset_counter(&self, id: &str) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<MetricRecord>>;

    /// Point-in-time copy of every metric.
    async fn get_all(&self) -> Result<Snapshot>;

    /// Writes the whole store as JSON to `path`. No-op for SQL backends.
    async fn save_snapshot(&self, path: &Path) -> Result<()>;

    /// Replaces the store with the snapshot at `path`. A missing file leaves
    /// the store as it is. No-op for SQL backends.
    async fn load_snapshot(&self, path: &Path) -> Result<()>;

    async fn health_check(&self) -> Result<()>;

    /// Releases background tasks and connections.
    async fn close(&self) -> Result<()>;
}

/// Backend selection, resolved once by [`open_store`].
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Memory,
    File {
        path: PathBuf,
        /// Checkpoint period; zero writes the snapshot after every mutation.
        interval: Duration,
        restore: bool,
    },
    Sqlite {
        dsn: String,
    },
}

impl StoreConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::File { .. } => "file",
            StoreConfig::Sqlite { .. } => "sqlite",
        }
    }
}

pub async fn open_store(config: StoreConfig) -> Result<Arc<dyn MetricStore>> {
    let store: Arc<dyn MetricStore> = match config {
        StoreConfig::Memory => Arc::new(memory::MemStore::new()),
        StoreConfig::File {
            path,
            interval,
            restore,
        } => Arc::new(file::FileStore::open(path, interval, restore).await?),
        StoreConfig::Sqlite { dsn } => Arc::new(sqlite::SqliteStore::open(&dsn).await?),
    };
    Ok(store)
}

/// Rejects NaN and infinite gauge values.
pub(crate) fn check_gauge(id: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(StorageError::NonFinite { id: id.to_string() })
    }
}

/// `total + delta`, or [`StorageError::Overflow`] outside the `i64` range.
pub(crate) fn add_delta(id: &str, total: i64, delta: i64) -> Result<i64> {
    total
        .checked_add(delta)
        .ok_or_else(|| StorageError::Overflow { id: id.to_string() })
}

/// Collapses a batch so each id appears once, in first-seen order.
///
/// Counter deltas for one id are summed, gauges keep the last value, and an
/// id used with both kinds is a [`StorageError::KindMismatch`]. Non-finite
/// gauges and deltas that overflow when summed reject the whole batch.
pub fn fold_batch(records: &[MetricRecord]) -> Result<Vec<MetricRecord>> {
    let mut folded: Vec<MetricRecord> = Vec::with_capacity(records.len());
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(records.len());

    for record in records {
        if let MetricValue::Gauge(v) = record.value {
            check_gauge(&record.id, v)?;
        }
        match index.get(record.id.as_str()) {
            None => {
                index.insert(record.id.as_str(), folded.len());
                folded.push(record.clone());
            }
            Some(&pos) => {
                let existing = &mut folded[pos];
                match (&mut existing.value, record.value) {
                    (MetricValue::Counter(total), MetricValue::Counter(delta)) => {
                        *total = add_delta(&record.id, *total, delta)?;
                    }
                    (MetricValue::Gauge(last), MetricValue::Gauge(value)) => *last = value,
                    (stored, _) => {
                        return Err(StorageError::KindMismatch {
                            id: record.id.clone(),
                            stored: stored.kind(),
                            requested: record.kind(),
                        })
                    }
                }
            }
        }
    }
    Ok(folded)
}
