//! Per-line decoding and text accumulation.

use super::filter::Frame;
use super::types::{DeltaChunk, RelayMode, Usage};

/// Decodes data lines for one relay call and accumulates the generated text.
///
/// Decode failures are logged and skipped; they never end the stream.
#[derive(Debug)]
pub struct DeltaExtractor {
    mode: RelayMode,
    text: String,
    usage: Option<Usage>,
    skipped: usize,
}

impl DeltaExtractor {
    pub fn new(mode: RelayMode) -> Self {
        Self {
            mode,
            text: String::new(),
            usage: None,
            skipped: 0,
        }
    }

    /// Decode one filtered line.
    ///
    /// Returns the decoded chunk for pacing, or `None` for the terminal
    /// sentinel and for payloads that fail to decode.
    pub fn extract(&mut self, frame: Frame<'_>) -> Option<DeltaChunk> {
        let payload = match frame {
            Frame::Done => return None,
            Frame::Data(payload) => payload,
        };

        match DeltaChunk::decode(payload, self.mode) {
            Ok(chunk) => {
                chunk.append_text(&mut self.text);
                if let Some(usage) = chunk.usage.filter(|u| u.total_tokens > 0) {
                    self.usage = Some(usage);
                }
                Some(chunk)
            }
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(
                    error = %e,
                    payload = %String::from_utf8_lossy(&payload[..payload.len().min(100)]),
                    "Failed to decode stream chunk, skipping"
                );
                None
            }
        }
    }

    pub fn mode(&self) -> RelayMode {
        self.mode
    }

    /// Number of lines dropped for failing to decode.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Consume the extractor, returning the text and the last non-zero usage
    /// the upstream reported in-stream.
    pub fn finish(self) -> (String, Option<Usage>) {
        (self.text, self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::filter::classify;

    fn run(mode: RelayMode, lines: &[&str]) -> DeltaExtractor {
        let mut extractor = DeltaExtractor::new(mode);
        for line in lines {
            if let Some(frame) = classify(line.as_bytes()) {
                extractor.extract(frame);
            }
        }
        extractor
    }

    #[test]
    fn accumulates_in_arrival_order() {
        let extractor = run(
            RelayMode::ChatCompletions,
            &[
                r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{"content":"Hello"}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{"content":", world"}}]}"#,
                "data: [DONE]",
            ],
        );
        assert_eq!(extractor.skipped(), 0);
        assert_eq!(extractor.finish().0, "Hello, world");
    }

    #[test]
    fn failed_lines_contribute_nothing() {
        let extractor = run(
            RelayMode::ChatCompletions,
            &[
                r#"data: {"choices":[{"delta":{"content":"a"}}]}"#,
                "data: {this is not valid json}",
                r#"data: {"choices":[{"delta":{"content":"b"}}]}"#,
                "[DONE]",
            ],
        );
        // The malformed line and the bare sentinel both fail to decode.
        assert_eq!(extractor.skipped(), 2);
        assert_eq!(extractor.finish().0, "ab");
    }

    #[test]
    fn terminal_line_is_not_decoded() {
        let mut extractor = DeltaExtractor::new(RelayMode::ChatCompletions);
        assert!(extractor.extract(Frame::Done).is_none());
        assert_eq!(extractor.skipped(), 0);
        assert_eq!(extractor.finish(), (String::new(), None));
    }

    #[test]
    fn completions_mode_reads_text_field() {
        let extractor = run(
            RelayMode::Completions,
            &[
                r#"data: {"choices":[{"index":0,"text":"foo"}]}"#,
                r#"data: {"choices":[{"index":0,"text":"bar"}]}"#,
                "data: [DONE]",
            ],
        );
        assert_eq!(extractor.finish().0, "foobar");
    }

    #[test]
    fn captures_last_reported_usage() {
        let extractor = run(
            RelayMode::ChatCompletions,
            &[
                r#"data: {"choices":[{"delta":{"content":"Hi"}}],"usage":null}"#,
                r#"data: {"choices":[],"usage":{"prompt_tokens":4,"completion_tokens":2,"total_tokens":6}}"#,
                "data: [DONE]",
            ],
        );
        let (text, usage) = extractor.finish();
        assert_eq!(text, "Hi");
        assert_eq!(
            usage,
            Some(Usage {
                prompt_tokens: 4,
                completion_tokens: 2,
                total_tokens: 6,
            })
        );
    }
}
