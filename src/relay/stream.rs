//! Streaming relay: upstream event stream to paced client events.
//!
//! A producer task frames, filters, decodes and paces upstream lines; the
//! calling task runs the [`DeliveryLoop`]. They meet on a single-slot data
//! channel (the only backpressure) and a one-shot completion channel.

use axum::http::StatusCode;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::delivery::{DeliveryLoop, EventSink};
use super::extract::DeltaExtractor;
use super::filter::classify;
use super::frame::FrameReader;
use super::pacing::Pacer;
use super::types::{RelayMode, Usage};
use super::upstream::UpstreamBody;
use crate::error::{error_wrapper, RelayError};

/// Result of a completed stream relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Concatenated content of every decoded chunk, in arrival order.
    pub text: String,
    /// Last non-zero usage the upstream sent in-stream, if any.
    pub usage: Option<Usage>,
    /// Events written to the client.
    pub delivered: usize,
}

/// Relay an upstream event stream to `sink`.
///
/// The body is closed exactly once after delivery stops. A close failure is
/// fatal and the accumulated text is not returned. If the producer panics the
/// body is dropped with the task, which still runs its close hook.
pub async fn relay_stream(
    body: UpstreamBody,
    mode: RelayMode,
    pacer: Pacer,
    sink: &EventSink,
) -> Result<StreamOutcome, RelayError> {
    let (data_tx, data_rx) = mpsc::channel(1);
    let (done_tx, done_rx) = oneshot::channel();

    let producer = tokio::spawn(produce(
        FrameReader::new(body),
        DeltaExtractor::new(mode),
        pacer,
        data_tx,
        done_tx,
    ));

    let delivered = DeliveryLoop::new(data_rx, done_rx).run(sink).await;

    let (body, extractor) = producer.await.map_err(|e| {
        tracing::error!(error = %e, "Stream producer task failed");
        error_wrapper(e, "relay_task_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;

    let skipped = extractor.skipped();
    let (text, usage) = extractor.finish();

    if let Err(e) = body.close() {
        tracing::warn!(
            error = %e,
            accumulated_bytes = text.len(),
            "Failed to close upstream body, dropping accumulated text"
        );
        return Err(error_wrapper(
            e,
            "close_response_body_failed",
            StatusCode::INTERNAL_SERVER_ERROR,
        ));
    }

    tracing::debug!(delivered, skipped, text_bytes = text.len(), "Stream relay finished");

    Ok(StreamOutcome {
        text,
        usage,
        delivered,
    })
}

/// Producer side: read, filter, decode and pace lines one at a time.
///
/// Returns the body so the caller can close it, and the extractor holding the
/// accumulated text.
async fn produce(
    mut frames: FrameReader<UpstreamBody>,
    mut extractor: DeltaExtractor,
    pacer: Pacer,
    data_tx: mpsc::Sender<Bytes>,
    done_tx: oneshot::Sender<()>,
) -> (UpstreamBody, DeltaExtractor) {
    let mode = extractor.mode();

    'lines: while let Some(line) = frames.next_line().await {
        let Some(frame) = classify(&line) else {
            continue;
        };

        let chunk = extractor.extract(frame);
        for paced in pacer.pace(&line, chunk.as_ref(), mode) {
            if !paced.delay.is_zero() {
                tokio::time::sleep(paced.delay).await;
            }
            if data_tx.send(paced.data).await.is_err() {
                break 'lines;
            }
        }
    }

    let _ = done_tx.send(());
    (frames.into_inner(), extractor)
}
