//! Synthetic pacing of streamed content.
//!
//! Upstreams often deliver several words per chunk. [`Pacer`] re-expands a
//! decoded chunk into one chunk per Unicode code point, each carrying a delay,
//! so clients render the reply as if it were typed.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde_json::Value;

use super::filter::{DATA_MARKER, MARKER_LEN};
use super::types::{DeltaChunk, RelayMode};

/// One line handed to delivery, with the delay to wait before sending it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacedLine {
    pub data: Bytes,
    pub delay: Duration,
}

/// Splits decoded chunks into per-code-point sub-chunks.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    delay: Duration,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Pace one filtered line.
    ///
    /// `chunk` is the line's decoded payload, or `None` when it was the
    /// terminal sentinel or failed to decode. Lines that cannot be split
    /// (no chunk, no choices, empty first content) are forwarded once,
    /// unmodified and without delay.
    pub fn pace(&self, line: &Bytes, chunk: Option<&DeltaChunk>, mode: RelayMode) -> PacedLines {
        let Some(chunk) = chunk else {
            return PacedLines::raw(line);
        };

        let content = match chunk.first_content() {
            Some(content) if !content.is_empty() => content.to_string(),
            Some(_) => {
                tracing::debug!("First choice has no content, forwarding line as-is");
                return PacedLines::raw(line);
            }
            None => {
                tracing::debug!("Chunk has no choices, forwarding line as-is");
                return PacedLines::raw(line);
            }
        };

        PacedLines {
            state: State::Split {
                marker: if line.len() >= MARKER_LEN {
                    line.slice(..MARKER_LEN)
                } else {
                    Bytes::from_static(DATA_MARKER.as_bytes())
                },
                doc: chunk.raw().clone(),
                pointer: mode.content_pointer(),
                content,
                pos: 0,
                delay: self.delay,
            },
        }
    }
}

/// Lazy sequence of paced lines for a single upstream line.
///
/// Finite and not restartable; each sub-chunk is serialized only when the
/// consumer asks for it.
#[derive(Debug)]
pub struct PacedLines {
    state: State,
}

#[derive(Debug)]
enum State {
    Raw(Option<Bytes>),
    Split {
        marker: Bytes,
        doc: Value,
        pointer: &'static str,
        content: String,
        pos: usize,
        delay: Duration,
    },
    Exhausted,
}

impl PacedLines {
    fn raw(line: &Bytes) -> Self {
        Self {
            state: State::Raw(Some(line.clone())),
        }
    }
}

impl Iterator for PacedLines {
    type Item = PacedLine;

    fn next(&mut self) -> Option<PacedLine> {
        match &mut self.state {
            State::Raw(line) => {
                return line.take().map(|data| PacedLine {
                    data,
                    delay: Duration::ZERO,
                })
            }
            State::Split {
                marker,
                doc,
                pointer,
                content,
                pos,
                delay,
            } => {
                let ch = content[*pos..].chars().next()?;
                *pos += ch.len_utf8();

                if let Some(slot) = doc.pointer_mut(pointer) {
                    *slot = Value::String(ch.to_string());
                }

                match serde_json::to_vec(doc) {
                    Ok(json) => {
                        let mut data = BytesMut::with_capacity(marker.len() + json.len());
                        data.extend_from_slice(&marker[..]);
                        data.extend_from_slice(&json);
                        return Some(PacedLine {
                            data: data.freeze(),
                            delay: *delay,
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to re-serialize paced chunk"),
                }
            }
            State::Exhausted => return None,
        }

        self.state = State::Exhausted;
        None
    }
}
