//! HTTP surface (§4.6). Grounded on
//! `examples/original_source/internal/api/handler.go` for the route table
//! and on `estuary-flow`'s `oidc-discovery-server`/`control-plane-api` for
//! the axum router shape (state extension, `tower-http` trace/compression
//! layers).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, Request as HttpRequest, Response as HttpResponse, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use metrics_model::encoding::json::{self, WireMetric};
use metrics_model::{MetricBatch, MetricKind};
use serde::Deserialize;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::error::ApiError;
use crate::ingress::AppState;

/// Assigns each request a monotonically increasing id (§4.4.2, §5), used
/// to correlate its start/completion log lines.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn header_str<'a>(headers: &'a axum::http::HeaderMap, name: axum::http::HeaderName) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(render_all))
        .route("/ping", get(ping))
        .route("/update/:kind/:name/:value", post(update_path))
        .route("/update/", post(update_one))
        // Same handler as `/update/`: both auto-detect a bare object vs. a
        // batch array and echo back enriched values (§4.6).
        .route("/updates/", post(update_one))
        .route("/value/:kind/:name", get(value_path))
        .route("/value/", post(value_one))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &HttpRequest<axum::body::Body>| {
                    let request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
                    let peer = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    tracing::info_span!(
                        "http_request",
                        request_id,
                        method = %request.method(),
                        path = %request.uri().path(),
                        body_size = header_str(request.headers(), axum::http::header::CONTENT_LENGTH),
                        peer,
                        user_agent = header_str(request.headers(), axum::http::header::USER_AGENT),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                        response_size = tracing::field::Empty,
                    )
                })
                .on_response(|response: &HttpResponse<axum::body::Body>, latency: Duration, span: &Span| {
                    let status = response.status().as_u16();
                    let latency_ms = latency.as_millis() as u64;
                    let response_size = header_str(response.headers(), axum::http::header::CONTENT_LENGTH);
                    span.record("status", status);
                    span.record("latency_ms", latency_ms);
                    span.record("response_size", response_size);
                    // Completions at or above 400 are elevated to error (§4.4.2).
                    if status >= 400 {
                        tracing::error!(parent: span, status, latency_ms, response_size, "request completed");
                    } else {
                        tracing::info!(parent: span, status, latency_ms, response_size, "request completed");
                    }
                }),
        )
        .layer(CompressionLayer::new())
        .with_state(Arc::new(state))
}

fn is_gzip_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false)
}

fn sign_headers(pipeline: &crate::middleware::Pipeline, body: &[u8]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(signature) = pipeline.sign_response(body) {
        if let Ok(value) = signature.parse() {
            headers.insert("HashSHA256", value);
        }
    }
    headers
}

async fn render_all(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let body = html_escape(&state.storage.render().await?);
    Ok((StatusCode::OK, sign_headers(&state.pipeline, body.as_bytes()), body).into_response())
}

/// `GET /` is a plain listing escaped for safe embedding in an HTML page
/// (§4.6); metric names and rendered values are untrusted input from the
/// agent side, so they're escaped rather than trusted verbatim.
fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Re-reads each applied record's current value from storage so the
/// response can echo enriched values (§8 scenarios 1-3), rather than
/// echoing back the caller's own un-applied input. A batch may name the
/// same `(kind, name)` more than once (§8 scenario 3); the response
/// collapses those to one entry per distinct key.
async fn enrich(state: &AppState, batch: &MetricBatch) -> Result<Vec<WireMetric>, ApiError> {
    let mut seen = std::collections::HashSet::new();
    let mut keys = Vec::new();
    for record in batch.iter() {
        if seen.insert((record.kind(), record.name.clone())) {
            keys.push((record.kind(), record.name.clone()));
        }
    }

    let mut wire = Vec::with_capacity(keys.len());
    for (kind, name) in keys {
        let rendered = state
            .storage
            .get_one(kind, &name)
            .await?
            .ok_or_else(|| ApiError::Internal(format!("metric {name:?} vanished immediately after being applied")))?;
        wire.push(match kind {
            MetricKind::Counter => WireMetric { id: name, kind, delta: rendered.parse().ok(), value: None },
            MetricKind::Gauge => WireMetric { id: name, kind, delta: None, value: rendered.parse().ok() },
        });
    }
    Ok(wire)
}

async fn ping(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    state.storage.ping().await?;
    Ok((StatusCode::OK, "pong").into_response())
}

async fn update_path(
    State(state): State<Arc<AppState>>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    state.storage.add(&kind, &name, &value).await?;
    Ok((StatusCode::OK, "").into_response())
}

async fn update_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let plaintext = state.pipeline.process_request(&headers, &body, is_gzip_encoded(&headers))?;
    // `/update/` accepts a bare object or a batch array (§4.6); the response
    // shape mirrors whichever one the caller sent.
    let (batch, is_batch) = match json::decode_batch(&plaintext) {
        Ok(batch) => (batch, true),
        Err(_) => {
            let record = json::decode_one(&plaintext).map_err(|err| ApiError::Validation(err.to_string()))?;
            (MetricBatch(vec![record]), false)
        }
    };
    state.storage.add_batch(&state.shutdown, &batch).await?;
    let enriched = enrich(&state, &batch).await?;

    let response_body = if is_batch {
        serde_json::to_vec(&enriched).map_err(|err| ApiError::Internal(err.to_string()))?
    } else {
        serde_json::to_vec(&enriched[0]).map_err(|err| ApiError::Internal(err.to_string()))?
    };
    Ok((StatusCode::OK, sign_headers(&state.pipeline, &response_body), response_body).into_response())
}

async fn value_path(
    State(state): State<Arc<AppState>>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let kind: MetricKind = kind.parse().map_err(|_| ApiError::Validation(format!("unknown metric kind {kind:?}")))?;
    match state.storage.get_one(kind, &name).await? {
        Some(value) => Ok((StatusCode::OK, value).into_response()),
        None => Err(ApiError::NotFound(format!("no {kind} named {name:?}"))),
    }
}

#[derive(Debug, Deserialize)]
struct ValueRequest {
    id: String,
    #[serde(rename = "type")]
    kind: MetricKind,
}

async fn value_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let plaintext = state.pipeline.process_request(&headers, &body, is_gzip_encoded(&headers))?;
    let request: ValueRequest =
        serde_json::from_slice(&plaintext).map_err(|err| ApiError::Validation(err.to_string()))?;

    let wire = match state.storage.get_one(request.kind, &request.id).await? {
        Some(rendered) => match request.kind {
            MetricKind::Counter => WireMetric {
                id: request.id,
                kind: request.kind,
                delta: rendered.parse().ok(),
                value: None,
            },
            MetricKind::Gauge => WireMetric {
                id: request.id,
                kind: request.kind,
                delta: None,
                value: rendered.parse().ok(),
            },
        },
        None => return Err(ApiError::NotFound(format!("no {} named {:?}", request.kind, request.id))),
    };

    let response_body = serde_json::to_vec(&wire).map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok((StatusCode::OK, sign_headers(&state.pipeline, &response_body), response_body).into_response())
}
