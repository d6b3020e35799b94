//! Shared data model and wire primitives for the metrics collection
//! pipeline: the metric record model, JSON and protobuf encodings, the
//! envelope (HMAC / AES-CFB+RSA) primitives, and a small duration helper.
//!
//! Consumed by both `metrics-agent` (as the transport's wire layer) and
//! `metrics-server` (as the storage and middleware layer).

pub mod duration;
pub mod encoding;
pub mod envelope;
pub mod record;
pub mod store_state;

/// Generated protobuf types (`Metric`, `Metrics`, `Response`, and the
/// `MetricsService` client/server stubs), compiled from `proto/metrics.proto`
/// by `build.rs`. Code generation itself is out of this crate's scope
/// (§1); only the types it emits are consumed, the way the teacher's
/// `proto-flow`/`proto-grpc` crates wrap their own generated modules.
pub mod proto_gen {
    #![allow(clippy::all)]
    tonic::include_proto!("metrics");
}

pub use record::{MetricBatch, MetricKind, MetricRecord, MetricValue};
pub use store_state::StoreState;
