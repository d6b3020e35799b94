//! HTTP transport (§4.3): encode -> optional asymmetric envelope -> optional
//! HMAC sign -> gzip -> POST, with bounded retry/backoff. Grounded on
//! `examples/original_source/internal/clients/http/client.go`.

use std::time::Duration;

use async_trait::async_trait;
use metrics_model::encoding::json;
use metrics_model::envelope;
use metrics_model::MetricBatch;
use rsa::RsaPublicKey;

use crate::dispatcher::{Transport, TransportError};

/// Backoff delays between retry attempts (§4.3 step 6): 1s, 3s, 5s.
const RETRY_BACKOFFS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    hmac_key: Option<String>,
    public_key: Option<RsaPublicKey>,
    local_ip: Option<String>,
}

impl HttpTransport {
    pub fn new(
        address: &str,
        hmac_key: Option<String>,
        public_key: Option<RsaPublicKey>,
        local_ip: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("http://{address}"),
            hmac_key,
            public_key,
            local_ip,
        }
    }

    fn prepare_body(&self, batch: &MetricBatch) -> Result<(Vec<u8>, Option<String>, Option<String>), anyhow::Error> {
        let json_body = json::encode_batch(batch)?;

        let (body, session_key_hex) = match &self.public_key {
            Some(public_key) => {
                let (session_key, ciphertext) = envelope::encrypt(public_key, &json_body)?;
                (ciphertext, Some(hex::encode(session_key)))
            }
            None => (json_body, None),
        };

        let signature = self.hmac_key.as_ref().map(|key| envelope::sign_hex(key.as_bytes(), &body));

        let gzipped = envelope::gzip_compress(&body)?;
        Ok((gzipped, session_key_hex, signature))
    }

    fn build_request(
        &self,
        body: Vec<u8>,
        session_key_hex: Option<&str>,
        signature: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(format!("{}/updates/", self.base_url))
            .header("Content-Type", "application/json")
            .header("Content-Encoding", "gzip")
            .header("Accept-Encoding", "gzip")
            .body(body);

        if let Some(ip) = &self.local_ip {
            request = request.header("X-Real-IP", ip.clone());
        }
        if let Some(key) = session_key_hex {
            request = request.header("X-Key", key.to_string());
        }
        if let Some(sig) = signature {
            request = request.header("HashSHA256", sig.to_string());
        }
        request
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, worker_id: usize, batch: MetricBatch) -> Result<(), TransportError> {
        let to_transport_error = |source: anyhow::Error| TransportError { worker_id, source };

        let (body, session_key_hex, signature) = self.prepare_body(&batch).map_err(to_transport_error)?;

        let mut attempt = 0usize;
        loop {
            let request = self.build_request(body.clone(), session_key_hex.as_deref(), signature.as_deref());
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    // Fully drain and close the response body (§4.3 step 6).
                    let _ = response.bytes().await;
                    if !status.is_success() {
                        tracing::warn!(worker_id, %status, "non-2xx response, not retrying");
                    }
                    return Ok(());
                }
                Err(err) if attempt < RETRY_BACKOFFS.len() => {
                    tracing::warn!(worker_id, attempt = attempt + 1, error = %err, "retrying after transport error");
                    tokio::time::sleep(RETRY_BACKOFFS[attempt]).await;
                    attempt += 1;
                }
                Err(err) => return Err(to_transport_error(err.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_model::MetricRecord;

    #[test]
    fn prepare_body_without_secrets_is_plain_gzip_json() {
        let transport = HttpTransport::new("example.invalid:1", None, None, None);
        let batch = MetricBatch(vec![MetricRecord::counter("c", 1)]);
        let (body, session_key, signature) = transport.prepare_body(&batch).unwrap();
        assert!(session_key.is_none());
        assert!(signature.is_none());
        let decompressed = envelope::gzip_decompress(&body).unwrap();
        let decoded = json::decode_batch(&decompressed).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn prepare_body_signs_when_hmac_key_present() {
        let transport = HttpTransport::new("example.invalid:1", Some("secret".into()), None, None);
        let batch = MetricBatch(vec![MetricRecord::gauge("g", 1.0)]);
        let (_, _, signature) = transport.prepare_body(&batch).unwrap();
        assert!(signature.is_some());
    }
}
