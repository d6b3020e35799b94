//! One producer, N competing consumers (§4.2), modelled as a single
//! bounded queue shared by N worker tasks rather than N fresh channels per
//! tick (§9 redesign flag) — each record is still delivered exactly once
//! to exactly one worker. The producer emits every gauge then every
//! counter as distinct records; within a worker's batch, insertion order
//! is preserved, while ordering across workers is non-deterministic.

use std::sync::Arc;

use async_trait::async_trait;
use metrics_model::{MetricBatch, MetricRecord, StoreState};
use tokio::sync::{mpsc, Mutex};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, worker_id: usize, batch: MetricBatch) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
#[error("transport error (worker {worker_id}): {source}")]
pub struct TransportError {
    pub worker_id: usize,
    #[source]
    pub source: anyhow::Error,
}

/// Fans `snapshot` out across `fan_out` workers and hands each worker's
/// batch to `transport`. Waits for every worker before returning, matching
/// the producer/consumer join in §4.2 and §5.
pub async fn dispatch_tick(
    snapshot: &StoreState,
    fan_out: usize,
    transport: Arc<dyn Transport>,
) {
    assert!(fan_out >= 1, "fan-out degree must be at least 1");

    // tokio's mpsc requires capacity >= 1; a capacity of 1 is the closest
    // approximation of the unbuffered channel in §4.2 — a slow worker
    // still slows the producer almost immediately, which is acceptable
    // because each report is a single fixed-size pass.
    let (tx, rx) = mpsc::channel::<MetricRecord>(1);
    let rx = Arc::new(Mutex::new(rx));

    let producer = {
        let records: Vec<MetricRecord> = snapshot
            .gauge
            .iter()
            .map(|(name, value)| MetricRecord::gauge(name.clone(), *value))
            .chain(
                snapshot
                    .counter
                    .iter()
                    .map(|(name, value)| MetricRecord::counter(name.clone(), *value)),
            )
            .collect();
        tokio::spawn(async move {
            for record in records {
                if tx.send(record).await.is_err() {
                    break;
                }
            }
            // Dropping `tx` here closes the channel, signalling workers to drain and stop.
        })
    };

    let mut workers = Vec::with_capacity(fan_out);
    for worker_id in 0..fan_out {
        let rx = Arc::clone(&rx);
        let transport = Arc::clone(&transport);
        workers.push(tokio::spawn(async move {
            let mut batch = MetricBatch::new();
            loop {
                let record = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };
                match record {
                    Some(record) => batch.push(record),
                    None => break,
                }
            }
            if !batch.is_empty() {
                if let Err(err) = transport.send(worker_id, batch).await {
                    tracing::warn!(worker_id, error = %err, "worker's batch failed to send");
                }
            }
        }));
    }

    let _ = producer.await;
    for worker in workers {
        let _ = worker.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingTransport {
        received: TokioMutex<Vec<MetricRecord>>,
        batches_seen: AtomicUsize,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, _worker_id: usize, batch: MetricBatch) -> Result<(), TransportError> {
            self.batches_seen.fetch_add(1, Ordering::SeqCst);
            self.received.lock().await.extend(batch.into_iter());
            Ok(())
        }
    }

    #[tokio::test]
    async fn every_record_delivered_exactly_once() {
        let mut state = StoreState::new();
        for i in 0..20 {
            state.apply(&MetricRecord::gauge(format!("g{i}"), i as f64));
        }
        for i in 0..5 {
            state.apply(&MetricRecord::counter(format!("c{i}"), i as i64));
        }

        let transport = Arc::new(RecordingTransport {
            received: TokioMutex::new(Vec::new()),
            batches_seen: AtomicUsize::new(0),
        });
        dispatch_tick(&state, 4, transport.clone()).await;

        let received = transport.received.lock().await;
        assert_eq!(received.len(), 25);
        let mut names: Vec<&str> = received.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 25, "every record delivered exactly once");
    }

    #[tokio::test]
    async fn empty_snapshot_produces_no_batches() {
        let state = StoreState::new();
        let transport = Arc::new(RecordingTransport {
            received: TokioMutex::new(Vec::new()),
            batches_seen: AtomicUsize::new(0),
        });
        dispatch_tick(&state, 3, transport.clone()).await;
        assert_eq!(transport.batches_seen.load(Ordering::SeqCst), 0);
    }
}
