//! Wire format encoding and decoding.
//!
//! Every message is ASCII-framed:
//! ```text
//! ┌────────┬──────────────┬──────────────┬─────────┬────────────────┐
//! │ START_ │ Request ID   │ Payload len  │ Payload │ END_OF_MESSAGE │
//! │ 6 bytes│ 8 dec digits │ 8 dec digits │ N bytes │ 14 bytes       │
//! └────────┴──────────────┴──────────────┴─────────┴────────────────┘
//! ```
//!
//! Both numeric fields are zero-padded decimal.

use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, FramingError, Result};

/// Marker that opens every frame.
pub const START_MARKER: &[u8] = b"START_";

/// Marker that closes every frame.
pub const END_MARKER: &[u8] = b"END_OF_MESSAGE";

/// Width of each decimal header field.
pub const FIELD_WIDTH: usize = 8;

/// Header size in bytes: marker plus both fields (exactly 22).
pub const HEADER_SIZE: usize = START_MARKER.len() + 2 * FIELD_WIDTH;

/// Trailer size in bytes (exactly 14).
pub const TRAILER_SIZE: usize = END_MARKER.len();

/// Largest value representable in an 8-digit field.
pub const MAX_FIELD_VALUE: u32 = 99_999_999;

/// Default maximum payload size accepted by the decoder.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = MAX_FIELD_VALUE as usize;

/// Payload of the control frame sent before closing a connection.
pub const SHUTDOWN_PAYLOAD: &[u8] = b"SHUTDOWN";

/// Payload of the announcement sent once a connection is established.
pub const READY_PAYLOAD: &[u8] = b"READY";

/// Opaque request token, echoed back unchanged in responses.
///
/// Rendered on the wire as 8 zero-padded decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RequestId(u32);

impl RequestId {
    /// Id carried by the `READY` announcement.
    pub const ANNOUNCE: RequestId = RequestId(0);

    /// Id carried by the `SHUTDOWN` control frame.
    pub const SHUTDOWN: RequestId = RequestId(MAX_FIELD_VALUE);

    /// Create a request id, rejecting values wider than 8 digits.
    ///
    /// # Example
    ///
    /// ```
    /// use tickwire::protocol::RequestId;
    ///
    /// let id = RequestId::new(42).unwrap();
    /// assert_eq!(id.to_string(), "00000042");
    /// assert!(RequestId::new(100_000_000).is_err());
    /// ```
    pub fn new(value: u64) -> Result<Self> {
        if value > MAX_FIELD_VALUE as u64 {
            return Err(BridgeError::InvalidRequestId(value));
        }
        Ok(Self(value as u32))
    }

    /// Numeric value of the id.
    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = FramingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_field("request id", s.as_bytes()).map(RequestId)
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Request identifier.
    pub request_id: RequestId,
    /// Payload length in bytes.
    pub payload_length: usize,
}

impl Header {
    /// Create a new header.
    pub fn new(request_id: RequestId, payload_length: usize) -> Self {
        Self {
            request_id,
            payload_length,
        }
    }

    /// Encode the header to its 22 ASCII bytes.
    ///
    /// Fails if the payload length does not fit in 8 decimal digits.
    pub fn encode(&self) -> std::result::Result<[u8; HEADER_SIZE], FramingError> {
        if self.payload_length > MAX_FIELD_VALUE as usize {
            return Err(FramingError::FieldOverflow {
                field: "payload length",
                value: self.payload_length,
            });
        }

        let mut buf = [0u8; HEADER_SIZE];
        buf[..START_MARKER.len()].copy_from_slice(START_MARKER);
        let fields = format!("{:08}{:08}", self.request_id.0, self.payload_length);
        buf[START_MARKER.len()..].copy_from_slice(fields.as_bytes());
        Ok(buf)
    }

    /// Decode a header from the start of `buf`.
    ///
    /// Returns `Ok(None)` if fewer than 22 bytes are available.
    pub fn decode(buf: &[u8]) -> std::result::Result<Option<Self>, FramingError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        if !buf.starts_with(START_MARKER) {
            return Err(FramingError::BadHeader {
                field: "marker",
                raw: String::from_utf8_lossy(&buf[..START_MARKER.len()]).into_owned(),
            });
        }

        let id_start = START_MARKER.len();
        let len_start = id_start + FIELD_WIDTH;
        let request_id = parse_field("request id", &buf[id_start..len_start])?;
        let payload_length = parse_field("payload length", &buf[len_start..HEADER_SIZE])?;

        Ok(Some(Self {
            request_id: RequestId(request_id),
            payload_length: payload_length as usize,
        }))
    }

    /// Total encoded size of the frame this header describes.
    #[inline]
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_length + TRAILER_SIZE
    }
}

/// Parse one fixed-width decimal field.
fn parse_field(field: &'static str, raw: &[u8]) -> std::result::Result<u32, FramingError> {
    let bad = || FramingError::BadHeader {
        field,
        raw: String::from_utf8_lossy(raw).into_owned(),
    };

    if raw.len() != FIELD_WIDTH || !raw.iter().all(u8::is_ascii_digit) {
        return Err(bad());
    }

    raw.iter()
        .try_fold(0u32, |acc, &b| {
            acc.checked_mul(10)?.checked_add(u32::from(b - b'0'))
        })
        .ok_or_else(bad)
}
