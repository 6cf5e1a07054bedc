//! Ownership of the upstream response being relayed.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::{HeaderMap, StatusCode};
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

type CloseHook = Box<dyn FnOnce() -> std::io::Result<()> + Send>;

/// Upstream response body, owned by exactly one relay call.
///
/// [`close`](UpstreamBody::close) consumes the body, so it can run at most
/// once; every relay path ends by calling it. A body dropped without being
/// closed (a relay task that panicked, say) runs its close hook on drop.
pub struct UpstreamBody {
    stream: BoxStream<'static, std::io::Result<Bytes>>,
    on_close: Option<CloseHook>,
}

impl UpstreamBody {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            on_close: None,
        }
    }

    /// A body that yields `bytes` in one piece.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes: Bytes = bytes.into();
        Self::new(futures::stream::once(async move { Ok(bytes) }))
    }

    /// Run `hook` when the body is closed; its error becomes the close error.
    pub fn with_close_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> std::io::Result<()> + Send + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Buffer the remaining body in memory.
    pub async fn read_to_end(&mut self) -> std::io::Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(piece) = self.stream.next().await {
            buf.extend_from_slice(&piece?);
        }
        Ok(buf.freeze())
    }

    /// Release the connection.
    pub fn close(mut self) -> std::io::Result<()> {
        let hook = self.on_close.take();
        drop(self);
        match hook {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}

impl Drop for UpstreamBody {
    fn drop(&mut self) {
        let Some(hook) = self.on_close.take() else {
            return;
        };
        self.stream = futures::stream::empty().boxed();
        if let Err(e) = hook() {
            tracing::warn!(error = %e, "Failed to close dropped upstream body");
        }
    }
}

impl Stream for UpstreamBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamBody")
            .field("close_hook", &self.on_close.is_some())
            .finish_non_exhaustive()
    }
}

impl From<reqwest::Response> for UpstreamBody {
    fn from(response: reqwest::Response) -> Self {
        Self::new(response.bytes_stream().map(|r| r.map_err(std::io::Error::other)))
    }
}

/// Status, headers and body of an upstream response.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    /// Whether the upstream answered with an event stream.
    pub fn is_event_stream(&self) -> bool {
        self.headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false)
    }
}

impl From<reqwest::Response> for UpstreamResponse {
    fn from(response: reqwest::Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            body: UpstreamBody::from(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn read_to_end_concatenates_pieces() {
        let mut body = UpstreamBody::new(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"a\":")),
            Ok(Bytes::from_static(b"1}")),
        ]));
        assert_eq!(body.read_to_end().await.unwrap(), Bytes::from_static(b"{\"a\":1}"));
        assert!(body.close().is_ok());
    }

    #[tokio::test]
    async fn read_to_end_surfaces_errors() {
        let mut body = UpstreamBody::new(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "cut")),
        ]));
        let err = body.read_to_end().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn close_runs_hook_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let body = UpstreamBody::from_bytes("x").with_close_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        body.close().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_unclosed_body_runs_hook_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let body = UpstreamBody::from_bytes("x").with_close_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        drop(body);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_hook_error_is_returned() {
        let body = UpstreamBody::from_bytes("x")
            .with_close_hook(|| Err(std::io::Error::other("socket already gone")));
        let err = body.close().unwrap_err();
        assert_eq!(err.to_string(), "socket already gone");
    }

    #[test]
    fn detects_event_stream_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            "text/event-stream; charset=utf-8".parse().unwrap(),
        );
        let response = UpstreamResponse {
            status: StatusCode::OK,
            headers,
            body: UpstreamBody::from_bytes(""),
        };
        assert!(response.is_event_stream());

        let response = UpstreamResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: UpstreamBody::from_bytes(""),
        };
        assert!(!response.is_event_stream());
    }
}
