use std::sync::Arc;
use std::time::Duration;

use metron_common::{MetricKind, MetricRecord};
use tempfile::TempDir;

use crate::{open_store, MetricStore, StorageError, StoreConfig};

/// One instance of every backend, each with its own scratch directory.
async fn backends() -> Vec<(&'static str, TempDir, Arc<dyn MetricStore>)> {
    let mut out = Vec::new();

    let dir = TempDir::new().unwrap();
    out.push(("memory", dir, open_store(StoreConfig::Memory).await.unwrap()));

    let dir = TempDir::new().unwrap();
    let config = StoreConfig::File {
        path: dir.path().join("metrics.json"),
        interval: Duration::from_secs(300),
        restore: false,
    };
    out.push(("file", dir, open_store(config).await.unwrap()));

    let dir = TempDir::new().unwrap();
    let config = StoreConfig::Sqlite {
        dsn: format!("sqlite://{}", dir.path().join("metrics.db").display()),
    };
    out.push(("sqlite", dir, open_store(config).await.unwrap()));

    out
}

#[tokio::test]
async fn counters_accumulate() {
    for (name, _dir, store) in backends().await {
        store.update_counter("PollCount", 1).await.unwrap();
        store.update_counter("PollCount", 2).await.unwrap();
        let last = store.update_counter("PollCount", 4).await.unwrap();
        assert_eq!(last, MetricRecord::counter("PollCount", 7), "{name}");
        assert_eq!(
            store.get("PollCount").await.unwrap(),
            Some(MetricRecord::counter("PollCount", 7)),
            "{name}"
        );
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn gauge_last_write_wins() {
    for (name, _dir, store) in backends().await {
        store.update_gauge("Alloc", 10.0).await.unwrap();
        store.update_gauge("Alloc", 0.125).await.unwrap();
        assert_eq!(
            store.get("Alloc").await.unwrap(),
            Some(MetricRecord::gauge("Alloc", 0.125)),
            "{name}"
        );
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn reset_zeroes_and_creates() {
    for (name, _dir, store) in backends().await {
        store.update_counter("PollCount", 9).await.unwrap();
        store.reset_counter("PollCount").await.unwrap();
        assert_eq!(
            store.get("PollCount").await.unwrap(),
            Some(MetricRecord::counter("PollCount", 0)),
            "{name}"
        );

        store.reset_counter("Fresh").await.unwrap();
        assert_eq!(
            store.get("Fresh").await.unwrap(),
            Some(MetricRecord::counter("Fresh", 0)),
            "{name}"
        );

        store.update_counter("PollCount", 2).await.unwrap();
        assert_eq!(
            store.get("PollCount").await.unwrap(),
            Some(MetricRecord::counter("PollCount", 2)),
            "{name}"
        );
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn kind_mismatch_keeps_prior_value() {
    for (name, _dir, store) in backends().await {
        store.update_gauge("g", 1.5).await.unwrap();
        store.update_counter("c", 3).await.unwrap();

        let err = store.update_counter("g", 1).await.unwrap_err();
        assert!(
            matches!(
                &err,
                StorageError::KindMismatch {
                    id,
                    stored: MetricKind::Gauge,
                    requested: MetricKind::Counter,
                } if id == "g"
            ),
            "{name}: {err}"
        );
        assert!(store.update_gauge("c", 2.0).await.unwrap_err().is_kind_mismatch(), "{name}");
        assert!(store.reset_counter("g").await.unwrap_err().is_kind_mismatch(), "{name}");

        assert_eq!(store.get("g").await.unwrap(), Some(MetricRecord::gauge("g", 1.5)), "{name}");
        assert_eq!(store.get("c").await.unwrap(), Some(MetricRecord::counter("c", 3)), "{name}");
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn counter_overflow_is_rejected() {
    for (name, _dir, store) in backends().await {
        store.update_counter("c", i64::MAX).await.unwrap();

        let err = store.update_counter("c", 1).await.unwrap_err();
        assert!(matches!(&err, StorageError::Overflow { id } if id == "c"), "{name}: {err}");
        assert!(err.is_rejected_write() && !err.is_backend_failure(), "{name}");

        let batch = vec![MetricRecord::gauge("g", 1.0), MetricRecord::counter("c", 1)];
        let err = store.update_batch(&batch).await.unwrap_err();
        assert!(matches!(err, StorageError::Overflow { .. }), "{name}: {err}");

        let folded_over = vec![MetricRecord::counter("x", i64::MAX), MetricRecord::counter("x", 1)];
        let err = store.update_batch(&folded_over).await.unwrap_err();
        assert!(matches!(err, StorageError::Overflow { .. }), "{name}: {err}");

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1, "{name}");
        assert_eq!(all["c"], MetricRecord::counter("c", i64::MAX), "{name}");

        // Negative deltas still bring the counter back into range.
        let lower = store.update_counter("c", -1).await.unwrap();
        assert_eq!(lower, MetricRecord::counter("c", i64::MAX - 1), "{name}");
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn non_finite_gauge_is_rejected() {
    for (name, _dir, store) in backends().await {
        store.update_gauge("g", 2.5).await.unwrap();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = store.update_gauge("g", bad).await.unwrap_err();
            assert!(matches!(&err, StorageError::NonFinite { id } if id == "g"), "{name}: {err}");

            let batch = vec![MetricRecord::counter("c", 1), MetricRecord::gauge("h", bad)];
            let err = store.update_batch(&batch).await.unwrap_err();
            assert!(err.is_rejected_write(), "{name}: {err}");
        }
        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1, "{name}");
        assert_eq!(all["g"], MetricRecord::gauge("g", 2.5), "{name}");
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn batch_folds_duplicates() {
    for (name, _dir, store) in backends().await {
        store.update_counter("c", 100).await.unwrap();
        let batch = vec![
            MetricRecord::counter("c", 1),
            MetricRecord::gauge("g", 1.0),
            MetricRecord::counter("c", 2),
            MetricRecord::gauge("g", 2.0),
            MetricRecord::counter("c", 3),
        ];
        store.update_batch(&batch).await.unwrap();

        assert_eq!(store.get("c").await.unwrap(), Some(MetricRecord::counter("c", 106)), "{name}");
        assert_eq!(store.get("g").await.unwrap(), Some(MetricRecord::gauge("g", 2.0)), "{name}");
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    for (name, _dir, store) in backends().await {
        store.update_gauge("g", 1.0).await.unwrap();
        let batch = vec![
            MetricRecord::counter("ok", 5),
            MetricRecord::gauge("ok_gauge", 5.0),
            MetricRecord::counter("g", 1),
        ];
        assert!(store.update_batch(&batch).await.unwrap_err().is_kind_mismatch(), "{name}");
        assert_eq!(store.get("ok").await.unwrap(), None, "{name}");
        assert_eq!(store.get("ok_gauge").await.unwrap(), None, "{name}");
        assert_eq!(store.get_all().await.unwrap().len(), 1, "{name}");

        let mixed = vec![MetricRecord::counter("x", 1), MetricRecord::gauge("x", 1.0)];
        assert!(store.update_batch(&mixed).await.unwrap_err().is_kind_mismatch(), "{name}");
        assert_eq!(store.get("x").await.unwrap(), None, "{name}");
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    for (name, _dir, store) in backends().await {
        store.update_batch(&[]).await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty(), "{name}");
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn get_all_returns_every_metric() {
    for (name, _dir, store) in backends().await {
        store.update_gauge("a", 1.0).await.unwrap();
        store.update_counter("b", 2).await.unwrap();
        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2, "{name}");
        assert_eq!(all["a"], MetricRecord::gauge("a", 1.0), "{name}");
        assert_eq!(all["b"], MetricRecord::counter("b", 2), "{name}");
        assert!(store.get("missing").await.unwrap().is_none(), "{name}");
        store.health_check().await.unwrap();
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn snapshot_round_trip() {
    for (name, dir, store) in backends().await {
        let path = dir.path().join("snapshot.json");
        store.update_gauge("g", 1234.5678).await.unwrap();
        store.update_counter("c", i64::MAX - 1).await.unwrap();
        let before = store.get_all().await.unwrap();

        store.save_snapshot(&path).await.unwrap();
        store.load_snapshot(&path).await.unwrap();
        assert_eq!(store.get_all().await.unwrap(), before, "{name}");

        if name != "sqlite" {
            let fresh = open_store(StoreConfig::Memory).await.unwrap();
            fresh.load_snapshot(&path).await.unwrap();
            assert_eq!(fresh.get_all().await.unwrap(), before, "{name}");
        }
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn load_of_missing_snapshot_is_cold_start() {
    for (name, dir, store) in backends().await {
        store.update_counter("c", 1).await.unwrap();
        store.load_snapshot(&dir.path().join("nope.json")).await.unwrap();
        assert_eq!(store.get("c").await.unwrap(), Some(MetricRecord::counter("c", 1)), "{name}");
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn concurrent_counter_updates_are_not_lost() {
    for (name, _dir, store) in backends().await {
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.spawn(async move {
                for _ in 0..25 {
                    store.update_counter("PollCount", 1).await.unwrap();
                }
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }
        assert_eq!(
            store.get("PollCount").await.unwrap(),
            Some(MetricRecord::counter("PollCount", 200)),
            "{name}"
        );
        store.close().await.unwrap();
    }
}

#[test]
fn fold_keeps_first_seen_order() {
    let folded = crate::fold_batch(&[
        MetricRecord::gauge("b", 1.0),
        MetricRecord::counter("a", 1),
        MetricRecord::gauge("b", 3.0),
        MetricRecord::counter("a", -4),
    ])
    .unwrap();
    assert_eq!(folded, vec![MetricRecord::gauge("b", 3.0), MetricRecord::counter("a", -3)]);
}
