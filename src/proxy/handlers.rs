//! HTTP request handlers.

use axum::{
    body::{Body, Bytes},
    extract::{Extension, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::Instrument;

use super::server::{AppState, RequestId};
use super::types::RequestView;
use crate::error::Error;
use crate::relay::{
    reconcile_usage, relay_full, relay_stream, EventSink, FullRelayRequest, Pacer, RelayMode,
    UpstreamResponse,
};

/// Handle POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Response {
    relay(state, request_id, RelayMode::ChatCompletions, body).await
}

/// Handle POST /v1/completions
pub async fn completions(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Response {
    relay(state, request_id, RelayMode::Completions, body).await
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "trickle"
    }))
}

async fn relay(state: AppState, request_id: RequestId, mode: RelayMode, body: Bytes) -> Response {
    let span = tracing::info_span!("relay", request_id = %request_id.0, mode = ?mode);
    match forward(state, mode, body).instrument(span).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(request_id = %request_id.0, error = %e, "Request failed before relay");
            e.into_response()
        }
    }
}

/// Forward the request upstream and relay whatever comes back.
///
/// Transport and request errors surface as [`Error`]; relay failures are
/// answered directly with their own status and envelope.
async fn forward(state: AppState, mode: RelayMode, body: Bytes) -> Result<Response, Error> {
    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| Error::BadRequest(format!("Request body is not valid JSON: {}", e)))?;
    let request = RequestView::deserialize_from(&payload)?;

    let prompt_tokens = request.prompt_tokens(mode, state.counter.as_ref());
    tracing::info!(
        model = %request.model,
        stream = request.is_streaming(),
        prompt_tokens,
        "Received completion request"
    );

    let mut upstream_request = state
        .http_client
        .post(state.config.upstream_endpoint(mode.upstream_path()))
        .json(&payload);
    if let Some(api_key) = &state.config.upstream.api_key {
        upstream_request = upstream_request.bearer_auth(api_key.expose_secret());
    }

    let upstream = UpstreamResponse::from(upstream_request.send().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to reach upstream");
        Error::Upstream(e)
    })?);

    tracing::debug!(
        status = %upstream.status,
        event_stream = upstream.is_event_stream(),
        "Upstream responded"
    );

    // A successful response streams when the client asked for a stream or the
    // upstream labelled it as one.
    if upstream.status.is_success() && (request.is_streaming() || upstream.is_event_stream()) {
        return Ok(stream_response(state, mode, upstream, request.model, prompt_tokens));
    }

    let full_request = FullRelayRequest {
        prompt_tokens,
        model: &request.model,
        consume_quota: state.config.relay.consume_quota,
        header_copy: state.config.relay.header_copy,
    };
    match relay_full(upstream, &full_request, state.counter.as_ref()).await {
        Ok(outcome) => {
            tracing::info!(
                status = %outcome.response.status(),
                prompt_tokens = outcome.usage.prompt_tokens,
                completion_tokens = outcome.usage.completion_tokens,
                total_tokens = outcome.usage.total_tokens,
                "Relayed full response"
            );
            Ok(outcome.response)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Full relay failed");
            Ok(e.into_response())
        }
    }
}

/// Start the stream relay on its own task and return the event-stream response
/// it feeds.
fn stream_response(
    state: AppState,
    mode: RelayMode,
    upstream: UpstreamResponse,
    model: String,
    prompt_tokens: u32,
) -> Response {
    let (sink, events) = EventSink::channel();
    let pacer = Pacer::new(state.config.relay.stream_speed.delay());
    let counter = state.counter.clone();

    tokio::spawn(
        async move {
            match relay_stream(upstream.body, mode, pacer, &sink).await {
                Ok(outcome) => {
                    let usage = reconcile_usage(
                        outcome.usage.unwrap_or_default(),
                        [outcome.text.as_str()],
                        prompt_tokens,
                        &model,
                        counter.as_ref(),
                    );
                    tracing::info!(
                        delivered = outcome.delivered,
                        text_chars = outcome.text.chars().count(),
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        total_tokens = usage.total_tokens,
                        "Relayed stream"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "Stream relay failed"),
            }
        }
        .in_current_span(),
    );

    let mut response = Response::new(Body::from_stream(events));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}
