use std::fmt;

/// Kind of a metric: a monotonically-accumulated integer, or a set-latest
/// double.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => f.write_str("counter"),
            MetricKind::Gauge => f.write_str("gauge"),
        }
    }
}

impl std::str::FromStr for MetricKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown metric kind: {0}")]
pub struct ParseKindError(String);

/// Value carried by a single metric record. Exactly one variant exists at a
/// time; that's the record model's invariant (§3), enforced here by
/// construction rather than by a pair of `Option` fields.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Delta(i64),
    Value(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Delta(_) => MetricKind::Counter,
            MetricValue::Value(_) => MetricKind::Gauge,
        }
    }
}

/// Identity `(kind, name)` plus exactly one value (§3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: MetricValue,
}

impl MetricRecord {
    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Delta(delta),
        }
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Value(value),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

/// Ordered sequence of metric records (§3). Order is not semantically
/// significant across records but must round-trip byte-for-byte through
/// encode/decode, so this is a plain `Vec` rather than any de-duplicating
/// collection.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricBatch(pub Vec<MetricRecord>);

impl MetricBatch {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, record: MetricRecord) {
        self.0.push(record)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricRecord> {
        self.0.iter()
    }
}

impl IntoIterator for MetricBatch {
    type Item = MetricRecord;
    type IntoIter = std::vec::IntoIter<MetricRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<MetricRecord> for MetricBatch {
    fn from_iter<T: IntoIterator<Item = MetricRecord>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_value() {
        assert_eq!(MetricValue::Delta(4).kind(), MetricKind::Counter);
        assert_eq!(MetricValue::Value(4.0).kind(), MetricKind::Gauge);
    }

    #[test]
    fn kind_from_str_rejects_unknown() {
        assert!("unknown".parse::<MetricKind>().is_err());
        assert_eq!("counter".parse::<MetricKind>().unwrap(), MetricKind::Counter);
    }
}
