//! Recognition of data lines and the terminal sentinel.

/// Prefix of every data line.
pub const DATA_MARKER: &str = "data: ";

/// Payload prefix marking end of stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Both literals are matched over the same fixed width.
pub const MARKER_LEN: usize = 6;

/// A line that survived filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Payload following the 6-byte marker, to be decoded.
    Data(&'a [u8]),
    /// The payload starts with `[DONE]`; forwarded untouched.
    Done,
}

/// Classify a framed line.
///
/// Lines shorter than the marker are noise. Otherwise the first six bytes must
/// equal `data: ` or `[DONE]`. A bare `[DONE]` line is kept but its (empty)
/// remainder is not the sentinel, so it reaches the decoder as data.
pub fn classify(line: &[u8]) -> Option<Frame<'_>> {
    let head = line.get(..MARKER_LEN)?;
    if head != DATA_MARKER.as_bytes() && head != DONE_SENTINEL.as_bytes() {
        return None;
    }

    let payload = &line[MARKER_LEN..];
    if payload.starts_with(DONE_SENTINEL.as_bytes()) {
        Some(Frame::Done)
    } else {
        Some(Frame::Data(payload))
    }
}
