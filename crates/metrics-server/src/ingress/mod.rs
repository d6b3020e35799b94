pub mod grpc;
pub mod http;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::middleware::Pipeline;
use crate::storage::Storage;

/// Shared dependencies for both ingress surfaces (§4.6).
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub pipeline: Pipeline,
    pub shutdown: CancellationToken,
    /// Carried alongside `pipeline` because protobuf HMAC signing hashes
    /// the canonical textual rendering of `Metrics` (§4.3), not the raw
    /// wire bytes `Pipeline::sign_response`/`verify` operate on — the RPC
    /// surface needs the bare key to re-derive that signing input itself.
    pub hmac_key: Option<String>,
}
