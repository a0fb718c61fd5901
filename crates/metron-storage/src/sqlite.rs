use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use metron_common::{MetricKind, MetricRecord, MetricValue};
use rusqlite::{Connection, OptionalExtension};

use crate::error::{Result, StorageError};
use crate::{add_delta, check_gauge, fold_batch, MetricStore, Snapshot};

const METRICS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS gauge (
    metric_id TEXT PRIMARY KEY,
    metric_value FLOAT8 NOT NULL
);
CREATE TABLE IF NOT EXISTS counter (
    metric_id TEXT PRIMARY KEY,
    metric_delta INT8 NOT NULL
);
";

const UPSERT_GAUGE: &str = "INSERT INTO gauge (metric_id, metric_value) VALUES (?1, ?2)
     ON CONFLICT (metric_id) DO UPDATE SET metric_value = excluded.metric_value
     RETURNING metric_value";

const UPSERT_COUNTER: &str = "INSERT INTO counter (metric_id, metric_delta) VALUES (?1, ?2)
     ON CONFLICT (metric_id)
     DO UPDATE SET metric_delta = counter.metric_delta + excluded.metric_delta
     RETURNING metric_delta";

const RESET_COUNTER: &str = "INSERT INTO counter (metric_id, metric_delta) VALUES (?1, 0)
     ON CONFLICT (metric_id) DO UPDATE SET metric_delta = 0";

/// Rows per multi-row INSERT. Two parameters per row keeps each statement
/// under SQLite's historical 999 variable limit.
const BATCH_CHUNK_ROWS: usize = 400;

type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// Relational store: one row per metric in a `gauge` or `counter` table.
///
/// All SQLite calls run on the blocking thread pool. After [`close`] every
/// operation fails with [`StorageError::Unavailable`].
///
/// [`close`]: MetricStore::close
pub struct SqliteStore {
    conn: SharedConnection,
}

/// Strip the optional `sqlite://` scheme from a DSN.
fn dsn_path(dsn: &str) -> &str {
    dsn.strip_prefix("sqlite://").unwrap_or(dsn)
}

fn lock_connection(conn: &Mutex<Option<Connection>>) -> MutexGuard<'_, Option<Connection>> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SqliteStore {
    /// Opens (creating if needed) the database and its tables.
    ///
    /// Accepts `sqlite://<path>`, a bare path, or `:memory:`.
    pub async fn open(dsn: &str) -> Result<Self> {
        let path = dsn_path(dsn).to_string();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = if path == ":memory:" {
                Connection::open_in_memory()?
            } else {
                let conn = Connection::open(&path)?;
                conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                conn
            };
            conn.execute_batch(METRICS_SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("open task failed: {e}")))??;

        tracing::info!(dsn = %dsn_path(dsn), "SQLite store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_connection<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock_connection(&conn);
            let conn = guard
                .as_mut()
                .ok_or_else(|| StorageError::Unavailable("store closed".to_string()))?;
            f(conn)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("blocking task failed: {e}")))?
    }
}

/// Fails if `id` already lives in the table of the other kind.
fn ensure_kind(conn: &Connection, id: &str, requested: MetricKind) -> Result<()> {
    let (other_table, stored) = match requested {
        MetricKind::Gauge => ("counter", MetricKind::Counter),
        MetricKind::Counter => ("gauge", MetricKind::Gauge),
    };
    let sql = format!("SELECT 1 FROM {other_table} WHERE metric_id = ?1");
    let mut stmt = conn.prepare_cached(&sql)?;
    let exists = stmt
        .query_row([id], |_| Ok(()))
        .optional()?
        .is_some();
    if exists {
        return Err(StorageError::KindMismatch {
            id: id.to_string(),
            stored,
            requested,
        });
    }
    Ok(())
}

/// Fails if adding `delta` to the stored counter would leave the `i64` range.
///
/// SQLite turns an overflowing integer sum into a REAL, so the check has to
/// happen before the upsert.
fn ensure_fits(conn: &Connection, id: &str, delta: i64) -> Result<()> {
    let stored: Option<i64> = conn
        .prepare_cached("SELECT metric_delta FROM counter WHERE metric_id = ?1")?
        .query_row([id], |row| row.get(0))
        .optional()?;
    add_delta(id, stored.unwrap_or(0), delta)?;
    Ok(())
}

fn upsert_many(conn: &Connection, records: &[&MetricRecord], kind: MetricKind) -> Result<()> {
    let (head, tail) = match kind {
        MetricKind::Gauge => (
            "INSERT INTO gauge (metric_id, metric_value) VALUES ",
            " ON CONFLICT (metric_id) DO UPDATE SET metric_value = excluded.metric_value",
        ),
        MetricKind::Counter => (
            "INSERT INTO counter (metric_id, metric_delta) VALUES ",
            " ON CONFLICT (metric_id) \
             DO UPDATE SET metric_delta = counter.metric_delta + excluded.metric_delta",
        ),
    };

    for chunk in records.chunks(BATCH_CHUNK_ROWS) {
        let mut sql = String::from(head);
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
            Vec::with_capacity(chunk.len() * 2);
        for (i, record) in chunk.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&format!("(?{}, ?{})", i * 2 + 1, i * 2 + 2));
            params.push(Box::new(record.id.clone()));
            match record.value {
                MetricValue::Gauge(v) => params.push(Box::new(v)),
                MetricValue::Counter(d) => params.push(Box::new(d)),
            }
        }
        sql.push_str(tail);

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        conn.execute(&sql, param_refs.as_slice())?;
    }
    Ok(())
}

#[async_trait]
impl MetricStore for SqliteStore {
    async fn update_gauge(&self, id: &str, value: f64) -> Result<MetricRecord> {
        check_gauge(id, value)?;
        let id = id.to_string();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            ensure_kind(&tx, &id, MetricKind::Gauge)?;
            let stored: f64 = tx
                .prepare_cached(UPSERT_GAUGE)?
                .query_row(rusqlite::params![&id, value], |row| row.get(0))?;
            tx.commit()?;
            Ok(MetricRecord::gauge(id, stored))
        })
        .await
    }

    async fn update_counter(&self, id: &str, delta: i64) -> Result<MetricRecord> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            ensure_kind(&tx, &id, MetricKind::Counter)?;
            ensure_fits(&tx, &id, delta)?;
            let total: i64 = tx
                .prepare_cached(UPSERT_COUNTER)?
                .query_row(rusqlite::params![&id, delta], |row| row.get(0))?;
            tx.commit()?;
            Ok(MetricRecord::counter(id, total))
        })
        .await
    }

    async fn update_batch(&self, records: &[MetricRecord]) -> Result<()> {
        let folded = fold_batch(records)?;
        if folded.is_empty() {
            return Ok(());
        }
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            for record in &folded {
                ensure_kind(&tx, &record.id, record.kind())?;
                if let MetricValue::Counter(delta) = record.value {
                    ensure_fits(&tx, &record.id, delta)?;
                }
            }
            let (gauges, counters): (Vec<&MetricRecord>, Vec<&MetricRecord>) =
                folded.iter().partition(|r| r.kind() == MetricKind::Gauge);
            upsert_many(&tx, &gauges, MetricKind::Gauge)?;
            upsert_many(&tx, &counters, MetricKind::Counter)?;
            // Dropping the transaction on any error above rolls it back.
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn reset_counter(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            ensure_kind(&tx, &id, MetricKind::Counter)?;
            tx.prepare_cached(RESET_COUNTER)?.execute([&id])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<MetricRecord>> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            let gauge: Option<f64> = conn
                .prepare_cached("SELECT metric_value FROM gauge WHERE metric_id = ?1")?
                .query_row([&id], |row| row.get(0))
                .optional()?;
            if let Some(value) = gauge {
                return Ok(Some(MetricRecord::gauge(id, value)));
            }
            let counter: Option<i64> = conn
                .prepare_cached("SELECT metric_delta FROM counter WHERE metric_id = ?1")?
                .query_row([&id], |row| row.get(0))
                .optional()?;
            Ok(counter.map(|delta| MetricRecord::counter(id, delta)))
        })
        .await
    }

    async fn get_all(&self) -> Result<Snapshot> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let mut snapshot = Snapshot::new();
            {
                let mut stmt = tx.prepare_cached("SELECT metric_id, metric_value FROM gauge")?;
                let rows = stmt.query_map([], |row| {
                    Ok(MetricRecord::gauge(row.get::<_, String>(0)?, row.get(1)?))
                })?;
                for row in rows {
                    let record = row?;
                    snapshot.insert(record.id.clone(), record);
                }
                let mut stmt = tx.prepare_cached("SELECT metric_id, metric_delta FROM counter")?;
                let rows = stmt.query_map([], |row| {
                    Ok(MetricRecord::counter(row.get::<_, String>(0)?, row.get(1)?))
                })?;
                for row in rows {
                    let record = row?;
                    snapshot.insert(record.id.clone(), record);
                }
            }
            tx.commit()?;
            Ok(snapshot)
        })
        .await
    }

    async fn save_snapshot(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    async fn load_snapshot(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.clone();
        let taken = tokio::task::spawn_blocking(move || lock_connection(&conn).take())
            .await
            .map_err(|e| StorageError::Unavailable(format!("close task failed: {e}")))?;
        if let Some(conn) = taken {
            conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
            tracing::info!("SQLite store closed");
        }
        Ok(())
    }
}
