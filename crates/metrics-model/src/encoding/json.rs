//! JSON wire encoding (§6): `{"id":"X","type":"gauge|counter","value":f64?,
//! "delta":i64?}`, singly or as a batch array.

use serde::{Deserialize, Serialize};

use crate::record::{MetricBatch, MetricKind, MetricRecord, MetricValue};

/// The wire shape of one metric, kept distinct from [`MetricRecord`]
/// because the wire uses `id`/`type` while the internal model uses
/// `name`/an enum-carried kind — translating at the boundary keeps both
/// shapes honest about what they are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMetric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("metric {0:?} carries both delta and value")]
    BothValuesPresent(String),
    #[error("metric {0:?} carries neither delta nor value")]
    NoValuePresent(String),
    #[error("metric {0:?} is kind {1} but carries a {2} value")]
    KindMismatch(String, MetricKind, &'static str),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TryFrom<WireMetric> for MetricRecord {
    type Error = WireError;

    fn try_from(wire: WireMetric) -> Result<Self, Self::Error> {
        let value = match (wire.kind, wire.delta, wire.value) {
            (MetricKind::Counter, Some(d), None) => MetricValue::Delta(d),
            (MetricKind::Gauge, None, Some(v)) => MetricValue::Value(v),
            (MetricKind::Counter, Some(_), Some(_)) | (MetricKind::Gauge, Some(_), Some(_)) => {
                return Err(WireError::BothValuesPresent(wire.id))
            }
            (MetricKind::Counter, None, None) | (MetricKind::Gauge, None, None) => {
                return Err(WireError::NoValuePresent(wire.id))
            }
            (MetricKind::Counter, None, Some(_)) => {
                return Err(WireError::KindMismatch(wire.id, MetricKind::Counter, "value"))
            }
            (MetricKind::Gauge, Some(_), None) => {
                return Err(WireError::KindMismatch(wire.id, MetricKind::Gauge, "delta"))
            }
        };
        Ok(MetricRecord { name: wire.id, value })
    }
}

impl From<&MetricRecord> for WireMetric {
    fn from(record: &MetricRecord) -> Self {
        match record.value {
            MetricValue::Delta(d) => WireMetric {
                id: record.name.clone(),
                kind: MetricKind::Counter,
                delta: Some(d),
                value: None,
            },
            MetricValue::Value(v) => WireMetric {
                id: record.name.clone(),
                kind: MetricKind::Gauge,
                delta: None,
                value: Some(v),
            },
        }
    }
}

/// Encodes a batch as compact JSON (§4.3 step 1).
pub fn encode_batch(batch: &MetricBatch) -> Result<Vec<u8>, WireError> {
    let wire: Vec<WireMetric> = batch.iter().map(WireMetric::from).collect();
    Ok(serde_json::to_vec(&wire)?)
}

pub fn encode_one(record: &MetricRecord) -> Result<Vec<u8>, WireError> {
    Ok(serde_json::to_vec(&WireMetric::from(record))?)
}

pub fn decode_batch(body: &[u8]) -> Result<MetricBatch, WireError> {
    let wire: Vec<WireMetric> = serde_json::from_slice(body)?;
    wire.into_iter()
        .map(MetricRecord::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map(MetricBatch)
}

pub fn decode_one(body: &[u8]) -> Result<MetricRecord, WireError> {
    let wire: WireMetric = serde_json::from_slice(body)?;
    MetricRecord::try_from(wire)
}

/// `POST /update/`'s body may be a single object or a batch array (§4.6):
/// attempt list-decode first, falling back to scalar. This mirrors the
/// handler-level auto-detection named explicitly in the spec rather than
/// inspecting the first JSON token ourselves.
pub fn decode_auto(body: &[u8]) -> Result<MetricBatch, WireError> {
    if let Ok(batch) = decode_batch(body) {
        return Ok(batch);
    }
    decode_one(body).map(|record| MetricBatch(vec![record]))
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
        let encoded = encode_batch(&batch).unwrap();
        let decoded = decode_batch(&encoded).unwrap();
        assert_eq!(batch, decoded);
    }

    #[test]
    fn auto_detects_scalar_and_batch() {
        let single = br#"{"id":"g1","type":"gauge","value":23.4}"#;
        let batch = decode_auto(single).unwrap();
        assert_eq!(batch.len(), 1);

        let many = br#"[{"id":"c","type":"counter","delta":1}]"#;
        let batch = decode_auto(many).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn rejects_both_value_and_delta() {
        let bad = br#"{"id":"x","type":"gauge","value":1.0,"delta":1}"#;
        assert!(decode_one(bad).is_err());
    }
}
