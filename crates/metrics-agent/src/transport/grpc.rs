//! RPC transport (§4.3): protobuf-marshals the batch, attaches metadata
//! (`X-Real-IP`, `HashSHA256` over the canonical textual rendering), uses
//! insecure transport credentials and the gzip compressor. One RPC call
//! per batch; no application-level retry beyond whatever tonic's channel
//! itself does.

use async_trait::async_trait;
use metrics_model::encoding::proto::{self, Metrics};
use metrics_model::envelope;
use metrics_model::proto_gen::metrics_service_client::MetricsServiceClient;
use metrics_model::MetricBatch;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;

use crate::dispatcher::{Transport, TransportError};

pub struct GrpcTransport {
    client: MetricsServiceClient<Channel>,
    hmac_key: Option<String>,
    local_ip: Option<String>,
}

impl GrpcTransport {
    pub async fn connect(
        address: &str,
        hmac_key: Option<String>,
        local_ip: Option<String>,
    ) -> Result<Self, anyhow::Error> {
        let endpoint = Channel::from_shared(format!("http://{address}"))?;
        let channel = endpoint.connect().await?;
        let client = MetricsServiceClient::new(channel)
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);
        Ok(Self {
            client,
            hmac_key,
            local_ip,
        })
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, worker_id: usize, batch: MetricBatch) -> Result<(), TransportError> {
        let to_transport_error = |source: anyhow::Error| TransportError { worker_id, source };

        let message = Metrics::from(&batch);
        let mut request = tonic::Request::new(message.clone());

        if let Some(ip) = &self.local_ip {
            request
                .metadata_mut()
                .insert("x-real-ip", ip.parse().map_err(|e| to_transport_error(anyhow::anyhow!("{e}")))?);
        }
        if let Some(key) = &self.hmac_key {
            let signature = envelope::sign_hex(key.as_bytes(), proto::canonical_string(&message).as_bytes());
            request
                .metadata_mut()
                .insert("hashsha256", signature.parse().map_err(|e| to_transport_error(anyhow::anyhow!("{e}")))?);
        }

        let mut client = self.client.clone();
        client
            .add_metrics(request)
            .await
            .map(|_response| ())
            .map_err(|status| to_transport_error(anyhow::anyhow!(status)))
    }
}
