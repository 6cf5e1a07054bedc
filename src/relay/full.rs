//! Full-body (non-streaming) relay.
//!
//! The upstream body is buffered and inspected before anything is handed to
//! the client, so an embedded error envelope can still become a clean error
//! response instead of a half-written success.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use super::types::{TextResponse, Usage};
use super::upstream::UpstreamResponse;
use super::usage::{reconcile_usage, TokenCounter};
use crate::error::{error_wrapper, RelayError};

/// How upstream response headers are copied to the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderCopy {
    /// Every value of every header.
    #[default]
    Verbatim,
    /// Only the first value per header name.
    FirstValue,
}

/// Per-call inputs of the full-body relay.
#[derive(Debug, Clone, Copy)]
pub struct FullRelayRequest<'a> {
    /// Prompt tokens counted by the caller, used when upstream omits usage.
    pub prompt_tokens: u32,
    pub model: &'a str,
    /// Decode the body for usage and error envelopes. When false the body is
    /// replayed without inspection.
    pub consume_quota: bool,
    pub header_copy: HeaderCopy,
}

/// Successful full-body relay.
#[derive(Debug)]
pub struct FullRelayOutcome {
    /// Upstream status, headers and body, ready to send.
    pub response: Response,
    pub usage: Usage,
}

/// Relay a complete upstream response.
///
/// The body is closed exactly once, right after it has been read, on every
/// path. Nothing client-visible exists unless this returns `Ok`.
pub async fn relay_full(
    upstream: UpstreamResponse,
    request: &FullRelayRequest<'_>,
    counter: &dyn TokenCounter,
) -> Result<FullRelayOutcome, RelayError> {
    let UpstreamResponse {
        status,
        headers,
        mut body,
    } = upstream;

    let read = body.read_to_end().await;
    let closed = body.close();

    let bytes = read.map_err(|e| {
        if let Err(close_err) = &closed {
            tracing::warn!(error = %close_err, "Failed to close upstream body after read failure");
        }
        error_wrapper(e, "read_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    closed.map_err(|e| {
        error_wrapper(e, "close_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;

    let text_response = if request.consume_quota {
        let decoded: TextResponse = serde_json::from_slice(&bytes).map_err(|e| {
            tracing::warn!(error = %e, status = %status, "Upstream body is not a completion response");
            error_wrapper(
                e,
                "unmarshal_response_body_failed",
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        })?;

        if decoded.error.is_set() {
            tracing::info!(
                status = %status,
                error_type = %decoded.error.error_type,
                code = %decoded.error.code_str(),
                "Upstream returned an error envelope"
            );
            return Err(RelayError {
                error: decoded.error,
                status_code: status,
            });
        }
        decoded
    } else {
        TextResponse::default()
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    copy_headers(&headers, response.headers_mut(), request.header_copy);

    let usage = reconcile_usage(
        text_response.usage,
        text_response.choices.iter().map(|c| c.content()),
        request.prompt_tokens,
        request.model,
        counter,
    );

    Ok(FullRelayOutcome { response, usage })
}

/// Connection-level headers owned by the server, never copied.
const HOP_BY_HOP: [HeaderName; 2] = [header::TRANSFER_ENCODING, header::CONNECTION];

/// Copy upstream headers onto a client response.
pub fn copy_headers(from: &HeaderMap, to: &mut HeaderMap, policy: HeaderCopy) {
    for name in from.keys() {
        if HOP_BY_HOP.contains(name) {
            continue;
        }
        match policy {
            HeaderCopy::Verbatim => {
                for value in from.get_all(name) {
                    to.append(name.clone(), value.clone());
                }
            }
            HeaderCopy::FirstValue => {
                if let Some(value) = from.get(name) {
                    to.insert(name.clone(), value.clone());
                }
            }
        }
    }
}
