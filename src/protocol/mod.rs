//! Protocol module - wire format, framing, and command batches.
//!
//! This module implements the text protocol spoken over the channel:
//! - 22-byte ASCII header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct and encoder
//! - `;`/`,` command batch parsing

mod command;
mod frame;
mod frame_buffer;
mod wire_format;

pub use command::{parse_batch, Command, COMMAND_SEPARATOR, FIELD_SEPARATOR};
pub use frame::{encode_frame, Frame};
pub use frame_buffer::{Decoded, FrameBuffer};
pub use wire_format::{
    Header, RequestId, DEFAULT_MAX_PAYLOAD_SIZE, END_MARKER, FIELD_WIDTH, HEADER_SIZE,
    MAX_FIELD_VALUE, READY_PAYLOAD, SHUTDOWN_PAYLOAD, START_MARKER, TRAILER_SIZE,
};
