//! In-memory storage backend (§4.5): a single `std::sync::Mutex` guarding
//! both maps (§9 — the original's two separate locks are collapsed into one
//! to remove the lock-ordering hazard between counter and gauge updates).

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use metrics_model::encoding::json::WireMetric;
use metrics_model::{MetricBatch, MetricKind, MetricRecord, StoreState};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::storage::{render_gauge, Snapshottable, Storage};

#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<StoreState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

fn parse_record(kind: &str, name: &str, raw_value: &str) -> Result<MetricRecord, ApiError> {
    let kind: MetricKind = kind
        .parse()
        .map_err(|_| ApiError::Validation(format!("unknown metric kind {kind:?}")))?;
    match kind {
        MetricKind::Counter => {
            let delta: i64 = raw_value
                .parse()
                .map_err(|_| ApiError::Validation(format!("invalid counter value {raw_value:?}")))?;
            Ok(MetricRecord::counter(name, delta))
        }
        MetricKind::Gauge => {
            let value: f64 = raw_value
                .parse()
                .map_err(|_| ApiError::Validation(format!("invalid gauge value {raw_value:?}")))?;
            Ok(MetricRecord::gauge(name, value))
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn add(&self, kind: &str, name: &str, raw_value: &str) -> Result<(), ApiError> {
        let record = parse_record(kind, name, raw_value)?;
        self.with_state(|state| state.apply(&record));
        Ok(())
    }

    async fn add_batch(&self, cancel: &CancellationToken, batch: &MetricBatch) -> Result<(), ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::TransientStorage("request cancelled before write".into()));
        }
        self.with_state(|state| state.apply_all(batch.iter()));
        Ok(())
    }

    async fn get_one(&self, kind: MetricKind, name: &str) -> Result<Option<String>, ApiError> {
        Ok(self.with_state(|state| match kind {
            MetricKind::Counter => state.counter.get(name).map(|v| v.to_string()),
            MetricKind::Gauge => state.gauge.get(name).map(|v| render_gauge(*v)),
        }))
    }

    async fn get_many(
        &self,
        cancel: &CancellationToken,
        requested: &[(MetricKind, String)],
    ) -> Result<Vec<WireMetric>, ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::TransientStorage("request cancelled before read".into()));
        }
        // Unknown keys render as zero-valued entries rather than being
        // omitted (§9 — preserved as specified).
        let mut out = self.with_state(|state| {
            requested
                .iter()
                .map(|(kind, name)| match kind {
                    MetricKind::Counter => WireMetric {
                        id: name.clone(),
                        kind: MetricKind::Counter,
                        delta: Some(state.counter.get(name).copied().unwrap_or(0)),
                        value: None,
                    },
                    MetricKind::Gauge => WireMetric {
                        id: name.clone(),
                        kind: MetricKind::Gauge,
                        delta: None,
                        value: Some(state.gauge.get(name).copied().unwrap_or(0.0)),
                    },
                })
                .collect::<Vec<_>>()
        });
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn render(&self) -> Result<String, ApiError> {
        Ok(self.with_state(|state| {
            let mut lines = Vec::with_capacity(state.gauge.len() + state.counter.len());
            for (name, value) in &state.gauge {
                lines.push(format!("{name} = {}", render_gauge(*value)));
            }
            for (name, value) in &state.counter {
                lines.push(format!("{name} = {value}"));
            }
            lines.join("\n")
        }))
    }

    async fn ping(&self) -> Result<(), ApiError> {
        Ok(())
    }

    fn as_snapshottable(&self) -> Option<&dyn Snapshottable> {
        Some(self)
    }
}

#[async_trait]
impl Snapshottable for MemoryStorage {
    async fn save_snapshot(&self, path: &Path) -> Result<(), ApiError> {
        let snapshot = self.with_state(|state| state.clone());
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|err| ApiError::Internal(format!("failed to encode snapshot: {err}")))?;
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|err| ApiError::Internal(format!("failed to write snapshot: {err}")))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|err| ApiError::Internal(format!("failed to finalize snapshot: {err}")))?;
        Ok(())
    }

    async fn restore_snapshot(&self, path: &Path) -> Result<(), ApiError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no snapshot file to restore from");
                return Ok(());
            }
            Err(err) => return Err(ApiError::Internal(format!("failed to read snapshot: {err}"))),
        };
        let restored: StoreState = serde_json::from_slice(&bytes)
            .map_err(|err| ApiError::Internal(format!("failed to decode snapshot: {err}")))?;
        self.with_state(|state| *state = restored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let storage = MemoryStorage::new();
        storage.add("counter", "hits", "3").await.unwrap();
        storage.add("counter", "hits", "4").await.unwrap();
        storage.add("gauge", "temp", "21.5").await.unwrap();

        assert_eq!(storage.get_one(MetricKind::Counter, "hits").await.unwrap(), Some("7".into()));
        assert_eq!(storage.get_one(MetricKind::Gauge, "temp").await.unwrap(), Some("21.5".into()));
        assert_eq!(storage.get_one(MetricKind::Gauge, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_many_zero_fills_unknown_keys() {
        let storage = MemoryStorage::new();
        storage.add("counter", "hits", "3").await.unwrap();
        let cancel = CancellationToken::new();
        let result = storage
            .get_many(&cancel, &[(MetricKind::Counter, "hits".into()), (MetricKind::Counter, "misses".into())])
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, "hits");
        assert_eq!(result[1].delta, Some(0));
    }

    #[tokio::test]
    async fn rejects_invalid_kind() {
        let storage = MemoryStorage::new();
        assert!(storage.add("bogus", "x", "1").await.is_err());
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let storage = MemoryStorage::new();
        storage.add("gauge", "g", "1.5").await.unwrap();
        storage.add("counter", "c", "9").await.unwrap();

        let dir = tempfile_dir();
        let path = dir.join("snapshot.json");
        storage.as_snapshottable().unwrap().save_snapshot(&path).await.unwrap();

        let restored = MemoryStorage::new();
        restored.as_snapshottable().unwrap().restore_snapshot(&path).await.unwrap();
        assert_eq!(restored.get_one(MetricKind::Gauge, "g").await.unwrap(), Some("1.5".into()));
        assert_eq!(restored.get_one(MetricKind::Counter, "c").await.unwrap(), Some("9".into()));

        let _ = std::fs::remove_dir_all(dir);
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("metrics-server-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
