//! RPC surface (§4.6): the `MetricsService::AddMetrics` implementation,
//! running the same [`crate::middleware::Pipeline`] the HTTP surface uses
//! (§9 redesign flag), keyed off RPC metadata instead of headers.

use std::sync::Arc;

use metrics_model::encoding::proto;
use metrics_model::proto_gen::metrics_service_server::MetricsService;
use metrics_model::proto_gen::{Metrics as ProtoMetrics, Response as ProtoResponse};
use metrics_model::MetricBatch;
use tonic::{Request, Response, Status};

use crate::ingress::AppState;

pub struct MetricsServiceImpl {
    state: Arc<AppState>,
}

impl MetricsServiceImpl {
    pub fn new(state: AppState) -> Self {
        Self { state: Arc::new(state) }
    }
}

#[tonic::async_trait]
impl MetricsService for MetricsServiceImpl {
    async fn add_metrics(&self, request: Request<ProtoMetrics>) -> Result<Response<ProtoResponse>, Status> {
        self.state
            .pipeline
            .check_trusted_subnet(request.metadata())
            .map_err(|err| err.into_status())?;

        let message: &ProtoMetrics = request.get_ref();
        if let Some(signature) = request.metadata().get("hashsha256").and_then(|v| v.to_str().ok()) {
            if let Some(hmac_key) = self.hmac_key() {
                let canonical = proto::canonical_string(message);
                match metrics_model::envelope::verify_hex(hmac_key.as_bytes(), canonical.as_bytes(), signature) {
                    Ok(()) => {}
                    Err(metrics_model::envelope::EnvelopeError::WrongHmacLength(len)) => {
                        tracing::warn!(len, "HMAC signature had an unexpected length, accepting request anyway");
                    }
                    Err(_) => return Err(Status::unauthenticated("HMAC signature mismatch")),
                }
            }
        }

        let batch = MetricBatch::try_from(message.clone())
            .map_err(|err| Status::invalid_argument(err.to_string()))?;

        self.state
            .storage
            .add_batch(&self.state.shutdown, &batch)
            .await
            .map_err(|err| err.into_status())?;

        Ok(Response::new(ProtoResponse { success: true }))
    }
}

impl MetricsServiceImpl {
    fn hmac_key(&self) -> Option<&str> {
        self.state.hmac_key.as_deref()
    }
}
