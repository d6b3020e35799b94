//! Protobuf wire encoding (§6): `Metric{id,type,delta,value}`,
//! `Metrics{metrics:[Metric]}`, `Response{success}`.

use prost::Message;

use crate::proto_gen;
use crate::record::{MetricBatch, MetricKind, MetricRecord, MetricValue};

pub use proto_gen::{Metric, Metrics, Response};

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("metric {0:?} carries neither delta nor value")]
    NoValuePresent(String),
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),
}

impl From<&MetricRecord> for Metric {
    fn from(record: &MetricRecord) -> Self {
        match record.value {
            MetricValue::Delta(d) => Metric {
                id: record.name.clone(),
                r#type: MetricKind::Counter.to_string(),
                delta: Some(d),
                value: None,
            },
            MetricValue::Value(v) => Metric {
                id: record.name.clone(),
                r#type: MetricKind::Gauge.to_string(),
                delta: None,
                value: Some(v),
            },
        }
    }
}

impl TryFrom<Metric> for MetricRecord {
    type Error = ProtoError;

    fn try_from(metric: Metric) -> Result<Self, Self::Error> {
        let value = match (metric.delta, metric.value) {
            (Some(d), _) => MetricValue::Delta(d),
            (None, Some(v)) => MetricValue::Value(v),
            (None, None) => return Err(ProtoError::NoValuePresent(metric.id)),
        };
        Ok(MetricRecord { name: metric.id, value })
    }
}

impl From<&MetricBatch> for Metrics {
    fn from(batch: &MetricBatch) -> Self {
        Metrics {
            metrics: batch.iter().map(Metric::from).collect(),
        }
    }
}

impl TryFrom<Metrics> for MetricBatch {
    type Error = ProtoError;

    fn try_from(metrics: Metrics) -> Result<Self, Self::Error> {
        metrics
            .metrics
            .into_iter()
            .map(MetricRecord::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map(MetricBatch)
    }
}

pub fn encode_batch(batch: &MetricBatch) -> Vec<u8> {
    Metrics::from(batch).encode_to_vec()
}

pub fn decode_batch(body: &[u8]) -> Result<MetricBatch, ProtoError> {
    let metrics = Metrics::decode(body)?;
    MetricBatch::try_from(metrics)
}

/// A deterministic textual rendering of a `Metrics` message, used as the
/// HMAC signing input for the RPC transport (§4.3, §6: "HMAC is computed
/// over the canonical textual rendering of `Metrics`"). Field order
/// follows declaration order in `metrics.proto`, matching what generated
/// `String()`/text-format renderers produce for a message with no unknown
/// fields or extensions.
pub fn canonical_string(metrics: &Metrics) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    for metric in &metrics.metrics {
        out.push_str("metrics:<");
        let _ = write!(out, "id:{:?} ", metric.id);
        let _ = write!(out, "type:{:?} ", metric.r#type);
        if let Some(delta) = metric.delta {
            let _ = write!(out, "delta:{delta} ");
        }
        if let Some(value) = metric.value {
            let _ = write!(out, "value:{value} ");
        }
        out.push_str("> ");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_round_trips() {
        let batch = MetricBatch(vec![
            MetricRecord::gauge("g1", 23.4),
            MetricRecord::counter("c", 43),
        ]);
        let encoded = encode_batch(&batch);
        let decoded = decode_batch(&encoded).unwrap();
        assert_eq!(batch, decoded);
    }

    #[test]
    fn canonical_string_is_stable() {
        let batch = MetricBatch(vec![MetricRecord::counter("c", 1)]);
        let metrics = Metrics::from(&batch);
        assert_eq!(canonical_string(&metrics), canonical_string(&metrics));
    }
}
