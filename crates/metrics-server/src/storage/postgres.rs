//! Relational storage backend (§4.5): upsert semantics matching
//! `StoreState::apply`, retried with a fixed 1s/3s/5s backoff on class-08
//! connection errors (§4.3's retry shape, reused here per §9), a 120s
//! overall batch timeout, and early exit on context cancellation.

use std::time::Duration;

use async_trait::async_trait;
use metrics_model::encoding::json::WireMetric;
use metrics_model::{MetricBatch, MetricKind, MetricRecord, MetricValue};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::storage::{render_gauge, Storage};

const RETRY_BACKOFFS: [Duration; 3] = [Duration::from_secs(1), Duration::from_secs(3), Duration::from_secs(5)];
const BATCH_TIMEOUT: Duration = Duration::from_secs(120);

/// SQLSTATE class 08 (connection exception) — the one class of failure this
/// backend treats as transient and worth retrying (§4.5).
fn is_transient(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed)
        || matches!(err, sqlx::Error::Database(db) if db.code().map(|c| c.starts_with("08")).unwrap_or(false))
}

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn connect(dsn: &str) -> Result<Self, ApiError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(dsn)
            .await
            .map_err(|err| ApiError::FatalStorage(format!("failed to connect to database: {err}")))?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS metrics (\
                 id TEXT PRIMARY KEY, \
                 counter BIGINT NOT NULL DEFAULT 0, \
                 gauge DOUBLE PRECISION NOT NULL DEFAULT 0\
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(|err| ApiError::FatalStorage(format!("failed to run migration: {err}")))?;
        Ok(())
    }

    async fn upsert_one(&self, record: &MetricRecord) -> Result<(), sqlx::Error> {
        let result = match record.value {
            MetricValue::Delta(delta) => {
                sqlx::query(
                    "INSERT INTO metrics (id, counter, gauge) VALUES ($1, $2, 0) \
                     ON CONFLICT (id) DO UPDATE SET counter = metrics.counter + EXCLUDED.counter",
                )
                .bind(&record.name)
                .bind(delta)
                .execute(&self.pool)
                .await?
            }
            MetricValue::Value(value) => {
                sqlx::query(
                    "INSERT INTO metrics (id, counter, gauge) VALUES ($1, 0, $2) \
                     ON CONFLICT (id) DO UPDATE SET gauge = EXCLUDED.gauge",
                )
                .bind(&record.name)
                .bind(value)
                .execute(&self.pool)
                .await?
            }
        };
        if result.rows_affected() != 1 {
            return Err(sqlx::Error::Protocol(format!(
                "upsert touched {} rows, expected exactly 1, for metric {:?}",
                result.rows_affected(),
                record.name
            )));
        }
        Ok(())
    }

    /// Retries a single record's upsert against the fixed backoff ladder,
    /// bailing out immediately on a non-transient error or on cancellation.
    async fn upsert_with_retry(&self, cancel: &CancellationToken, record: &MetricRecord) -> Result<(), ApiError> {
        let mut attempt = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(ApiError::TransientStorage("cancelled before write completed".into()));
            }
            match self.upsert_one(record).await {
                Ok(()) => return Ok(()),
                Err(err) if is_transient(&err) && attempt < RETRY_BACKOFFS.len() => {
                    let delay = RETRY_BACKOFFS[attempt];
                    tracing::warn!(metric = %record.name, attempt, delay = ?delay, error = %err, "transient storage error, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return Err(ApiError::TransientStorage("cancelled during retry backoff".into()));
                        }
                    }
                    attempt += 1;
                }
                Err(err) if is_transient(&err) => {
                    return Err(ApiError::TransientStorage(format!("exhausted retries: {err}")));
                }
                Err(err) => return Err(ApiError::FatalStorage(err.to_string())),
            }
        }
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn add(&self, kind: &str, name: &str, raw_value: &str) -> Result<(), ApiError> {
        let kind: MetricKind = kind
            .parse()
            .map_err(|_| ApiError::Validation(format!("unknown metric kind {kind:?}")))?;
        let record = match kind {
            MetricKind::Counter => {
                let delta: i64 = raw_value
                    .parse()
                    .map_err(|_| ApiError::Validation(format!("invalid counter value {raw_value:?}")))?;
                MetricRecord::counter(name, delta)
            }
            MetricKind::Gauge => {
                let value: f64 = raw_value
                    .parse()
                    .map_err(|_| ApiError::Validation(format!("invalid gauge value {raw_value:?}")))?;
                MetricRecord::gauge(name, value)
            }
        };
        self.upsert_with_retry(&CancellationToken::new(), &record).await
    }

    async fn add_batch(&self, cancel: &CancellationToken, batch: &MetricBatch) -> Result<(), ApiError> {
        let deadline = tokio::time::sleep(BATCH_TIMEOUT);
        tokio::pin!(deadline);
        for record in batch.iter() {
            tokio::select! {
                result = self.upsert_with_retry(cancel, record) => result?,
                _ = &mut deadline => {
                    return Err(ApiError::TransientStorage("batch write exceeded its deadline".into()));
                }
            }
        }
        Ok(())
    }

    async fn get_one(&self, kind: MetricKind, name: &str) -> Result<Option<String>, ApiError> {
        let row = sqlx::query("SELECT counter, gauge FROM metrics WHERE id = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| ApiError::TransientStorage(err.to_string()))?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(match kind {
            MetricKind::Counter => row.try_get::<i64, _>("counter").unwrap_or(0).to_string(),
            MetricKind::Gauge => render_gauge(row.try_get::<f64, _>("gauge").unwrap_or(0.0)),
        }))
    }

    async fn get_many(
        &self,
        cancel: &CancellationToken,
        requested: &[(MetricKind, String)],
    ) -> Result<Vec<WireMetric>, ApiError> {
        let mut out = Vec::with_capacity(requested.len());
        for (kind, name) in requested {
            if cancel.is_cancelled() {
                return Err(ApiError::TransientStorage("cancelled before read completed".into()));
            }
            let row = sqlx::query("SELECT counter, gauge FROM metrics WHERE id = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|err| ApiError::TransientStorage(err.to_string()))?;
            out.push(match kind {
                MetricKind::Counter => WireMetric {
                    id: name.clone(),
                    kind: MetricKind::Counter,
                    delta: Some(row.as_ref().and_then(|r| r.try_get("counter").ok()).unwrap_or(0)),
                    value: None,
                },
                MetricKind::Gauge => WireMetric {
                    id: name.clone(),
                    kind: MetricKind::Gauge,
                    delta: None,
                    value: Some(row.as_ref().and_then(|r| r.try_get("gauge").ok()).unwrap_or(0.0)),
                },
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn render(&self) -> Result<String, ApiError> {
        let rows = sqlx::query("SELECT id, counter, gauge FROM metrics ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|err| ApiError::TransientStorage(err.to_string()))?;
        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").unwrap_or_default();
            let counter: i64 = row.try_get("counter").unwrap_or(0);
            let gauge: f64 = row.try_get("gauge").unwrap_or(0.0);
            if counter != 0 {
                lines.push(format!("{id} = {counter}"));
            } else {
                lines.push(format!("{id} = {}", render_gauge(gauge)));
            }
        }
        Ok(lines.join("\n"))
    }

    async fn ping(&self) -> Result<(), ApiError> {
        let ping = sqlx::query("SELECT 1").execute(&self.pool);
        match tokio::time::timeout(Duration::from_secs(5), ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(ApiError::TransientStorage(err.to_string())),
            Err(_) => Err(ApiError::TransientStorage("database ping timed out after 5s".into())),
        }
    }
}
