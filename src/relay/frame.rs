//! Incremental line framing over an upstream byte stream.
//!
//! Upstream bytes arrive in arbitrary TCP-sized pieces. [`FrameReader`]
//! reassembles them into `\n`-delimited lines without dropping or duplicating
//! bytes across piece boundaries.

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};

/// Lazy, finite line reader.
///
/// Each [`next_line`](FrameReader::next_line) call yields one line without
/// its `\n`, byte for byte as the upstream sent it. Once the source is exhausted, trailing bytes without a newline
/// are yielded once as a final line and every later call returns `None`.
pub struct FrameReader<S> {
    source: S,
    buffer: BytesMut,
    /// Prefix of `buffer` already known to contain no newline.
    scanned: usize,
    eof: bool,
}

impl<S> FrameReader<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    pub fn new(source: S) -> Self {
        Self {
            source,
            buffer: BytesMut::with_capacity(4096),
            scanned: 0,
            eof: false,
        }
    }

    /// Read the next line, suspending until one is complete.
    ///
    /// A read error ends the sequence as if the source had finished.
    pub async fn next_line(&mut self) -> Option<Bytes> {
        loop {
            if let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
                let end = self.scanned + offset;
                let line = self.buffer.split_to(end).freeze();
                self.buffer.advance(1);
                self.scanned = 0;
                return Some(line);
            }
            self.scanned = self.buffer.len();

            if self.eof {
                if self.buffer.is_empty() {
                    return None;
                }
                self.scanned = 0;
                return Some(self.buffer.split().freeze());
            }

            match self.source.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Upstream read failed, ending stream");
                    self.eof = true;
                }
                None => self.eof = true,
            }
        }
    }

    /// Give back the underlying source, e.g. to close it.
    pub fn into_inner(self) -> S {
        self.source
    }
}
