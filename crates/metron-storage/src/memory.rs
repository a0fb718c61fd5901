use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use metron_common::{MetricKind, MetricRecord, MetricValue};

use crate::error::{Result, StorageError};
use crate::{add_delta, check_gauge, fold_batch, MetricStore, Snapshot};

/// In-memory store: one map behind one lock.
///
/// The lock is never held across an await point.
#[derive(Default)]
pub struct MemStore {
    metrics: Mutex<HashMap<String, MetricRecord>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            metrics: Mutex::new(snapshot),
        }
    }

    /// Lock the map, recovering from a poisoned Mutex if necessary.
    fn lock_metrics(&self) -> MutexGuard<'_, HashMap<String, MetricRecord>> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock_metrics().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn serialize(&self) -> Result<Vec<u8>> {
        let metrics = self.lock_metrics();
        Ok(serde_json::to_vec_pretty(&*metrics)?)
    }

    pub(crate) fn replace(&self, snapshot: Snapshot) {
        *self.lock_metrics() = snapshot;
    }
}

fn mismatch(id: &str, stored: MetricKind, requested: MetricKind) -> StorageError {
    StorageError::KindMismatch {
        id: id.to_string(),
        stored,
        requested,
    }
}

/// The value `record` would leave in the map, or why it is refused.
fn merged(stored: Option<&MetricRecord>, record: &MetricRecord) -> Result<MetricValue> {
    if let MetricValue::Gauge(v) = record.value {
        check_gauge(&record.id, v)?;
    }
    match (stored.map(|s| s.value), record.value) {
        (None, value) => Ok(value),
        (Some(MetricValue::Gauge(_)), value @ MetricValue::Gauge(_)) => Ok(value),
        (Some(MetricValue::Counter(total)), MetricValue::Counter(delta)) => {
            add_delta(&record.id, total, delta).map(MetricValue::Counter)
        }
        (Some(stored), _) => Err(mismatch(&record.id, stored.kind(), record.kind())),
    }
}

/// Merge one record into the map. A refused record changes nothing.
fn apply(
    metrics: &mut HashMap<String, MetricRecord>,
    record: &MetricRecord,
) -> Result<MetricRecord> {
    let value = merged(metrics.get(&record.id), record)?;
    let stored = MetricRecord {
        id: record.id.clone(),
        value,
    };
    metrics.insert(stored.id.clone(), stored.clone());
    Ok(stored)
}

/// Replace the file at `path` by writing a sibling and renaming it over.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Parse snapshot bytes. Blank input is an empty store.
pub(crate) fn parse_snapshot(bytes: &[u8]) -> Result<Snapshot> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Snapshot::new());
    }
    let parsed: Snapshot = serde_json::from_slice(bytes)?;
    // The record's own id is authoritative over the map key.
    Ok(parsed
        .into_values()
        .map(|record| (record.id.clone(), record))
        .collect())
}

pub(crate) async fn read_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(parse_snapshot(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl MetricStore for MemStore {
    async fn update_gauge(&self, id: &str, value: f64) -> Result<MetricRecord> {
        apply(&mut self.lock_metrics(), &MetricRecord::gauge(id, value))
    }

    async fn update_counter(&self, id: &str, delta: i64) -> Result<MetricRecord> {
        apply(&mut self.lock_metrics(), &MetricRecord::counter(id, delta))
    }

    async fn update_batch(&self, records: &[MetricRecord]) -> Result<()> {
        let folded = fold_batch(records)?;
        let mut metrics = self.lock_metrics();

        // Validate everything before the first write so a rejected entry
        // leaves the map untouched.
        let mut merged_values = Vec::with_capacity(folded.len());
        for record in &folded {
            merged_values.push(merged(metrics.get(&record.id), record)?);
        }
        for (record, value) in folded.into_iter().zip(merged_values) {
            metrics.insert(record.id.clone(), MetricRecord { value, ..record });
        }
        Ok(())
    }

    async fn reset_counter(&self, id: &str) -> Result<()> {
        let mut metrics = self.lock_metrics();
        match metrics.get_mut(id) {
            Some(stored) => match &mut stored.value {
                MetricValue::Counter(total) => *total = 0,
                MetricValue::Gauge(_) => {
                    return Err(mismatch(id, MetricKind::Gauge, MetricKind::Counter))
                }
            },
            None => {
                metrics.insert(id.to_string(), MetricRecord::counter(id, 0));
            }
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MetricRecord>> {
        Ok(self.lock_metrics().get(id).cloned())
    }

    async fn get_all(&self) -> Result<Snapshot> {
        Ok(self.lock_metrics().clone())
    }

    async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let bytes = self.serialize()?;
        write_atomic(path, &bytes).await
    }

    async fn load_snapshot(&self, path: &Path) -> Result<()> {
        match read_snapshot(path).await? {
            Some(snapshot) => {
                tracing::info!(
                    path = %path.display(),
                    metrics = snapshot.len(),
                    "Restored metric snapshot"
                );
                self.replace(snapshot);
            }
            None => {
                tracing::info!(path = %path.display(), "No snapshot found, starting empty");
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
