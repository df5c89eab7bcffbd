//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `Seeking`: looking for the next `START_` marker
//! - `WaitingForHeader`: marker found, need 22 header bytes
//! - `WaitingForBody`: header parsed, need payload plus terminator
//!
//! A read may deliver any number of bytes: less than a header, several
//! frames, or a frame split mid-payload. Bytes that precede a marker are
//! discarded with a diagnostic, never treated as payload.
//!
//! # Example
//!
//! ```
//! use tickwire::protocol::{encode_frame, FrameBuffer, RequestId};
//!
//! let bytes = encode_frame(RequestId::new(1).unwrap(), b"plugins").unwrap();
//! let mut buffer = FrameBuffer::new();
//!
//! assert!(buffer.push(&bytes[..10]).is_empty());
//! let frames = buffer.push(&bytes[10..]);
//! assert_eq!(frames[0].payload(), b"plugins");
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{
    Header, DEFAULT_MAX_PAYLOAD_SIZE, END_MARKER, HEADER_SIZE, START_MARKER, TRAILER_SIZE,
};
use super::Frame;
use crate::error::FramingError;

/// Outcome of a single decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame was extracted.
    Frame(Frame),
    /// More bytes are needed.
    Incomplete,
    /// Malformed framing; the buffer has been resynchronised.
    Invalid(FramingError),
}

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Buffer may start with bytes that are not a marker.
    Seeking,
    /// Buffer starts with a marker; need the full header.
    WaitingForHeader,
    /// Header consumed; need payload and terminator.
    WaitingForBody { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with a 64 KiB initial capacity, accepting
    /// payloads up to [`DEFAULT_MAX_PAYLOAD_SIZE`].
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with a custom max payload size.
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::Seeking,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Malformed framing is logged and skipped; partial data stays buffered
    /// for the next push.
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match self.decode_next() {
                Decoded::Frame(frame) => frames.push(frame),
                Decoded::Incomplete => break,
                Decoded::Invalid(err) => {
                    tracing::warn!(error = %err, "dropping malformed frame");
                }
            }
        }
        frames
    }

    /// Append data to the buffer without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode one frame from the buffered bytes.
    pub fn decode_next(&mut self) -> Decoded {
        loop {
            match self.state {
                State::Seeking => {
                    if !self.seek_marker() {
                        return Decoded::Incomplete;
                    }
                    self.state = State::WaitingForHeader;
                }

                State::WaitingForHeader => {
                    let header = match Header::decode(&self.buffer) {
                        Ok(Some(header)) => header,
                        Ok(None) => return Decoded::Incomplete,
                        Err(err) => return self.resync(err),
                    };

                    if header.payload_length > self.max_payload_size {
                        return self.resync(FramingError::PayloadTooLarge {
                            len: header.payload_length,
                            max: self.max_payload_size,
                        });
                    }

                    self.buffer.advance(HEADER_SIZE);
                    self.state = State::WaitingForBody { header };
                }

                State::WaitingForBody { header } => {
                    let needed = header.payload_length + TRAILER_SIZE;
                    if self.buffer.len() < needed {
                        return Decoded::Incomplete;
                    }

                    if &self.buffer[header.payload_length..needed] != END_MARKER {
                        // Header already consumed; rescan the body for the next marker
                        self.state = State::Seeking;
                        return Decoded::Invalid(FramingError::MissingTerminator);
                    }

                    let payload = self.buffer.split_to(header.payload_length).freeze();
                    self.buffer.advance(TRAILER_SIZE);
                    self.state = State::Seeking;

                    return Decoded::Frame(Frame { header, payload });
                }
            }
        }
    }

    /// Discard bytes up to the next marker.
    ///
    /// Returns `true` if the buffer now starts with a marker. Otherwise keeps
    /// only a trailing fragment that could still grow into a marker.
    fn seek_marker(&mut self) -> bool {
        let found = self
            .buffer
            .windows(START_MARKER.len())
            .position(|w| w == START_MARKER);

        let discard = match found {
            Some(pos) => pos,
            None => self.buffer.len() - partial_marker_suffix(&self.buffer),
        };

        if discard > 0 {
            tracing::warn!(
                discarded = discard,
                "discarding bytes preceding frame marker"
            );
            self.buffer.advance(discard);
        }

        found.is_some()
    }

    /// Drop the current marker and report the framing error.
    fn resync(&mut self, err: FramingError) -> Decoded {
        self.buffer.advance(1);
        self.state = State::Seeking;
        Decoded::Invalid(err)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::Seeking;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::Seeking => "Seeking",
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the longest suffix of `buf` that is a proper prefix of the marker.
fn partial_marker_suffix(buf: &[u8]) -> usize {
    (1..START_MARKER.len())
        .rev()
        .find(|&k| buf.len() >= k && buf[buf.len() - k..] == START_MARKER[..k])
        .unwrap_or(0)
}
