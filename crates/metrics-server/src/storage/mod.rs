//! Storage abstraction (§4.5): one capability set shared by both backends,
//! plus an explicit optional `Snapshottable` capability rather than the
//! original's dynamic type-check on startup (§9 redesign flag).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use metrics_model::encoding::json::WireMetric;
use metrics_model::{MetricBatch, MetricKind};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Parses and applies a single metric (§4.5). An invalid kind or
    /// unparseable numeric value is a `ValidationError`.
    async fn add(&self, kind: &str, name: &str, raw_value: &str) -> Result<(), ApiError>;

    /// Applies every record in `batch` atomically from the caller's view,
    /// respecting `cancel` before kicking off and between units of work
    /// (§5 cancellation).
    async fn add_batch(&self, cancel: &CancellationToken, batch: &MetricBatch) -> Result<(), ApiError>;

    /// Counters render as a decimal integer, gauges as the shortest
    /// round-trippable decimal (§4.5).
    async fn get_one(&self, kind: MetricKind, name: &str) -> Result<Option<String>, ApiError>;

    /// Returns the current value for each requested `(kind, name)`, sorted
    /// by name; unknown keys yield zero-valued entries rather than being
    /// omitted (§4.5, §9 — preserved as specified, documented here as a
    /// quirk of the original rather than a deliberate design choice).
    async fn get_many(
        &self,
        cancel: &CancellationToken,
        requested: &[(MetricKind, String)],
    ) -> Result<Vec<WireMetric>, ApiError>;

    /// A human listing of all stored metrics (§4.5, used by `GET /`).
    async fn render(&self) -> Result<String, ApiError>;

    /// `true` if the backend can serve a `GET /ping`-style liveness check
    /// beyond simply existing (the Postgres backend pings the pool; the
    /// in-memory backend is always reachable).
    async fn ping(&self) -> Result<(), ApiError>;

    /// The optional "can snapshot to file" capability (§9): only the
    /// in-memory backend implements it. Detected once at startup via this
    /// explicit accessor rather than the original's dynamic type-check.
    fn as_snapshottable(&self) -> Option<&dyn Snapshottable> {
        None
    }
}

#[async_trait]
pub trait Snapshottable: Send + Sync {
    async fn save_snapshot(&self, path: &std::path::Path) -> Result<(), ApiError>;
    async fn restore_snapshot(&self, path: &std::path::Path) -> Result<(), ApiError>;
}

pub(crate) fn render_gauge(value: f64) -> String {
    // Rust's `{}` Display for f64 already produces the shortest
    // round-trippable decimal representation (ryu-equivalent), matching
    // Go's `strconv.FormatFloat(v, 'f', -1, 64)` intent (§4.5). `-1` in Go
    // still always uses fixed notation; Rust's default formatter can
    // switch to `NaN`/`inf` text for non-finite values, which can't occur
    // here since gauges are always finite f64s from parsed input.
    format!("{value}")
}
