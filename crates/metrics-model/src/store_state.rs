use std::collections::BTreeMap;

use crate::record::{MetricRecord, MetricValue};

/// The whole store state (§3): two mappings, `gauge` (set-latest) and
/// `counter` (sum). This is both the snapshot file's in-memory shape and
/// the in-memory storage backend's shape.
///
/// `BTreeMap` rather than `HashMap` so iteration order (used by `render`
/// and snapshot JSON) is deterministic without an extra sort at each call
/// site.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoreState {
    pub gauge: BTreeMap<String, f64>,
    pub counter: BTreeMap<String, i64>,
}

impl StoreState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a single record's value (§3 invariants): gauge is set-latest,
    /// counter is summed with an absent key treated as zero.
    pub fn apply(&mut self, record: &MetricRecord) {
        match record.value {
            MetricValue::Value(v) => {
                self.gauge.insert(record.name.clone(), v);
            }
            MetricValue::Delta(d) => {
                *self.counter.entry(record.name.clone()).or_insert(0) += d;
            }
        }
    }

    pub fn apply_all<'a>(&mut self, records: impl IntoIterator<Item = &'a MetricRecord>) {
        for record in records {
            self.apply(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_sums_regardless_of_interleaving() {
        let deltas = [3, -1, 10, 0, 5];
        let mut forward = StoreState::new();
        for d in deltas {
            forward.apply(&MetricRecord::counter("n", d));
        }
        let mut reversed = StoreState::new();
        for d in deltas.iter().rev() {
            reversed.apply(&MetricRecord::counter("n", *d));
        }
        let total: i64 = deltas.iter().sum();
        assert_eq!(forward.counter["n"], total);
        assert_eq!(reversed.counter["n"], total);
    }

    #[test]
    fn gauge_is_set_latest() {
        let mut state = StoreState::new();
        state.apply(&MetricRecord::gauge("g", 1.0));
        state.apply(&MetricRecord::gauge("g", 2.0));
        assert_eq!(state.gauge["g"], 2.0);
    }
}
