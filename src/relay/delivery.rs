//! Client-side delivery of relayed events.

use std::convert::Infallible;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

/// Canonical terminal event sent to clients.
pub const TERMINAL_EVENT: &str = "data: [DONE]";

/// Body stream backing a streaming client response.
pub type EventStream = ReceiverStream<Result<Bytes, Infallible>>;

/// The client stopped reading the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client disconnected")]
pub struct ClientGone;

/// Event-emission side of the client transport.
///
/// Each [`emit`](EventSink::emit) hands one framed event to the response body,
/// which hyper flushes as its own frame.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
}

impl EventSink {
    /// Create a sink and the body stream it feeds.
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, ReceiverStream::new(rx))
    }

    /// Emit one event. Fails once the client side has gone away.
    pub async fn emit(&self, data: &[u8]) -> Result<(), ClientGone> {
        let mut frame = BytesMut::with_capacity(data.len() + 2);
        frame.extend_from_slice(data);
        frame.extend_from_slice(b"\n\n");
        self.tx.send(Ok(frame.freeze())).await.map_err(|_| ClientGone)
    }
}

/// Normalize an event before it reaches the client.
///
/// Anything after the terminal literal is cut, then one trailing `\r` left by
/// CRLF upstreams is removed.
pub fn canonicalize(data: &[u8]) -> &[u8] {
    let data = if data.starts_with(TERMINAL_EVENT.as_bytes()) {
        &data[..TERMINAL_EVENT.len()]
    } else {
        data
    };
    data.strip_suffix(b"\r").unwrap_or(data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Streaming,
    /// Terminal.
    Stopped,
}

/// Single consumer draining the producer's data channel into the client.
pub struct DeliveryLoop {
    data_rx: mpsc::Receiver<Bytes>,
    done_rx: oneshot::Receiver<()>,
}

impl DeliveryLoop {
    pub fn new(data_rx: mpsc::Receiver<Bytes>, done_rx: oneshot::Receiver<()>) -> Self {
        Self { data_rx, done_rx }
    }

    /// Deliver events until the producer signals completion or the client
    /// disconnects. Returns the number of events delivered.
    ///
    /// Pending data always wins over the completion signal, so nothing the
    /// producer sent before completing is lost.
    pub async fn run(self, sink: &EventSink) -> usize {
        let DeliveryLoop {
            mut data_rx,
            mut done_rx,
        } = self;
        let mut state = DeliveryState::Streaming;
        let mut delivered = 0;

        while state == DeliveryState::Streaming {
            state = tokio::select! {
                biased;
                Some(data) = data_rx.recv() => {
                    match sink.emit(canonicalize(&data)).await {
                        Ok(()) => {
                            delivered += 1;
                            DeliveryState::Streaming
                        }
                        Err(ClientGone) => {
                            tracing::debug!(delivered, "Client went away, stopping delivery");
                            DeliveryState::Stopped
                        }
                    }
                }
                _ = &mut done_rx => DeliveryState::Stopped,
            };
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn drain(events: EventStream) -> Vec<String> {
        events
            .map(|frame| String::from_utf8(frame.unwrap().to_vec()).unwrap())
            .collect()
            .await
    }

    #[test]
    fn canonicalize_truncates_terminal_event() {
        assert_eq!(canonicalize(b"data: [DONE]"), b"data: [DONE]");
        assert_eq!(canonicalize(b"data: [DONE] trailing junk"), b"data: [DONE]");
        assert_eq!(canonicalize(b"data: [DONE]\r"), b"data: [DONE]");
    }

    #[test]
    fn canonicalize_trims_one_carriage_return() {
        assert_eq!(canonicalize(b"data: {}\r"), b"data: {}");
        assert_eq!(canonicalize(b"data: {}\r\r"), b"data: {}\r");
        assert_eq!(canonicalize(b"data: {}"), b"data: {}");
        assert_eq!(canonicalize(b"data: \xff\r"), b"data: \xff");
    }

    #[tokio::test]
    async fn emit_frames_event() {
        let (sink, mut events) = EventSink::channel();
        sink.emit(b"data: {}").await.unwrap();
        let frame = events.next().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"data: {}\n\n");
    }

    #[tokio::test]
    async fn emit_fails_after_client_drops() {
        let (sink, events) = EventSink::channel();
        drop(events);
        assert_eq!(sink.emit(b"data: {}").await, Err(ClientGone));
    }

    #[tokio::test]
    async fn delivers_everything_sent_before_completion() {
        let (data_tx, data_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();
        let (sink, events) = EventSink::channel();

        let producer = tokio::spawn(async move {
            for line in ["data: a\r", "data: b", "data: [DONE]"] {
                data_tx.send(Bytes::from_static(line.as_bytes())).await.unwrap();
            }
            done_tx.send(()).unwrap();
        });

        let consumer = tokio::spawn(async move {
            let delivered = DeliveryLoop::new(data_rx, done_rx).run(&sink).await;
            drop(sink);
            delivered
        });

        let received = drain(events).await;
        producer.await.unwrap();
        assert_eq!(consumer.await.unwrap(), 3);
        assert_eq!(received, vec!["data: a\n\n", "data: b\n\n", "data: [DONE]\n\n"]);
    }

    #[tokio::test]
    async fn stops_when_completion_sender_dropped() {
        let (data_tx, data_rx) = mpsc::channel::<Bytes>(1);
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let (sink, _events) = EventSink::channel();

        drop(data_tx);
        drop(done_tx);

        assert_eq!(DeliveryLoop::new(data_rx, done_rx).run(&sink).await, 0);
    }

    #[tokio::test]
    async fn stops_when_client_disconnects() {
        let (data_tx, data_rx) = mpsc::channel(1);
        let (_done_tx, done_rx) = oneshot::channel();
        let (sink, events) = EventSink::channel();
        drop(events);

        data_tx.send(Bytes::from_static(b"data: x")).await.unwrap();
        assert_eq!(DeliveryLoop::new(data_rx, done_rx).run(&sink).await, 0);

        // The data receiver is gone, so the producer's next send fails.
        assert!(data_tx.send(Bytes::from_static(b"data: y")).await.is_err());
    }
}
