//! Frame struct and encoder.
//!
//! # Example
//!
//! ```
//! use tickwire::protocol::{encode_frame, RequestId};
//!
//! let bytes = encode_frame(RequestId::new(3).unwrap(), b"ready").unwrap();
//! assert_eq!(&bytes[..], b"START_0000000300000005readyEND_OF_MESSAGE");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    Header, RequestId, END_MARKER, HEADER_SIZE, SHUTDOWN_PAYLOAD, TRAILER_SIZE,
};
use crate::error::FramingError;

/// A complete decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame; the header length is taken from the payload.
    pub fn new(request_id: RequestId, payload: Bytes) -> Self {
        Self {
            header: Header::new(request_id, payload.len()),
            payload,
        }
    }

    /// Get the request ID.
    #[inline]
    pub fn request_id(&self) -> RequestId {
        self.header.request_id
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Payload as UTF-8 text.
    pub fn text(&self) -> Result<&str, FramingError> {
        std::str::from_utf8(&self.payload).map_err(|_| FramingError::InvalidUtf8)
    }

    /// Check if this is the `SHUTDOWN` control frame.
    ///
    /// Both the reserved id and the payload must match; a request whose
    /// text merely reads `SHUTDOWN` is an ordinary command.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.request_id() == RequestId::SHUTDOWN && self.payload.as_ref() == SHUTDOWN_PAYLOAD
    }

    /// Encode this frame to wire bytes.
    pub fn encode(&self) -> Result<Bytes, FramingError> {
        encode_frame(self.request_id(), &self.payload)
    }
}

/// Encode a complete frame into a single contiguous buffer.
///
/// Fails only if the payload length does not fit in 8 decimal digits.
pub fn encode_frame(request_id: RequestId, payload: &[u8]) -> Result<Bytes, FramingError> {
    let header = Header::new(request_id, payload.len()).encode()?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    buf.put_slice(&header);
    buf.put_slice(payload);
    buf.put_slice(END_MARKER);
    Ok(buf.freeze())
}
