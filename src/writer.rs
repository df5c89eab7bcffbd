//! Chunked response writer.
//!
//! The host thread must never block, so a response is framed once and then
//! written in bounded chunks, one chunk per host tick, through the link's
//! non-blocking writer.
//!
//! ```text
//! begin_write ─► [chunk 1] ─tick─► pump ─► [chunk 2] ─tick─► pump ─► ... ─► Complete
//! ```
//!
//! At most one write is in flight per connection. A second `begin_write`
//! while one is active is rejected with [`BridgeError::AlreadyWriting`]; the
//! caller decides whether to retry later.

use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::{BridgeError, Result};
use crate::protocol::{encode_frame, RequestId};
use crate::transport::{ConnectionId, HostLink, DEFAULT_WRITE_TIMEOUT};

/// Default bytes written per step.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Outcome of one write step.
#[derive(Debug)]
pub enum WriteProgress {
    /// Nothing is being written.
    Idle,
    /// More steps are needed.
    InProgress {
        /// Bytes accepted by this step (0 when the channel was full).
        written: usize,
        /// Bytes still to write.
        remaining: usize,
    },
    /// The whole frame was written.
    Complete {
        /// Request the response belonged to.
        request_id: RequestId,
        /// Frame size in bytes.
        total: usize,
    },
    /// The write was abandoned; nothing more will be sent for it.
    Failed {
        /// Request the response belonged to.
        request_id: RequestId,
        /// Why.
        error: BridgeError,
    },
}

impl WriteProgress {
    /// Whether further steps are needed.
    #[inline]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, WriteProgress::InProgress { .. })
    }
}

/// In-flight state of one response.
#[derive(Debug)]
struct PendingWrite {
    connection: ConnectionId,
    request_id: RequestId,
    buffer: Bytes,
    offset: usize,
    seq: u64,
    last_progress: Instant,
}

/// Writes framed responses across host ticks.
#[derive(Debug)]
pub struct ChunkedWriter {
    chunk_size: usize,
    write_timeout: Duration,
    pending: Option<PendingWrite>,
    next_seq: u64,
}

impl ChunkedWriter {
    /// Create a writer.
    ///
    /// A zero `chunk_size` is treated as 1.
    pub fn new(chunk_size: usize, write_timeout: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            write_timeout,
            pending: None,
            next_seq: 0,
        }
    }

    /// Bytes written per step.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Whether a write is in flight.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.pending.is_some()
    }

    /// Sequence number of the write in flight.
    ///
    /// Each `begin_write` gets a fresh number, so a deferred pump can tell
    /// whether the write it was scheduled for is still the current one.
    pub fn active_seq(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.seq)
    }

    /// Bytes of the in-flight frame already written.
    pub fn sent(&self) -> Option<usize> {
        self.pending.as_ref().map(|p| p.offset)
    }

    /// Frame `message` and write the first chunk.
    ///
    /// Fails with [`BridgeError::AlreadyWriting`] if a write for the same
    /// connection is in flight. A leftover write from another (dead)
    /// connection is discarded.
    pub fn begin_write(
        &mut self,
        link: &HostLink,
        request_id: RequestId,
        message: &str,
    ) -> Result<WriteProgress> {
        if let Some(active) = &self.pending {
            if active.connection == link.id() {
                return Err(BridgeError::AlreadyWriting(active.request_id));
            }
            tracing::warn!(
                connection = %active.connection,
                request_id = %active.request_id,
                "discarding response for a closed connection"
            );
            self.pending = None;
        }

        let buffer = encode_frame(request_id, message.as_bytes())?;
        self.next_seq += 1;

        tracing::debug!(
            connection = %link.id(),
            %request_id,
            len = buffer.len(),
            "response started"
        );

        self.pending = Some(PendingWrite {
            connection: link.id(),
            request_id,
            buffer,
            offset: 0,
            seq: self.next_seq,
            last_progress: Instant::now(),
        });

        Ok(self.pump(link))
    }

    /// Write the next chunk of the in-flight response.
    pub fn pump(&mut self, link: &HostLink) -> WriteProgress {
        let Some(pending) = self.pending.as_mut() else {
            return WriteProgress::Idle;
        };
        let request_id = pending.request_id;

        if pending.connection != link.id() {
            let connection = pending.connection;
            self.pending = None;
            return WriteProgress::Failed {
                request_id,
                error: BridgeError::ConnectionLost(format!("connection {connection} closed")),
            };
        }

        let end = (pending.offset + self.chunk_size).min(pending.buffer.len());
        let written = match link.writer().try_write(&pending.buffer[pending.offset..end]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                tracing::warn!(%request_id, "response write failed: {}", e);
                self.pending = None;
                return WriteProgress::Failed {
                    request_id,
                    error: BridgeError::WriteFailed(e),
                };
            }
        };

        if written > 0 {
            pending.offset += written;
            pending.last_progress = Instant::now();
        }

        let total = pending.buffer.len();
        if pending.offset == total {
            tracing::debug!(%request_id, total, "response sent");
            self.pending = None;
            return WriteProgress::Complete { request_id, total };
        }

        if written == 0 && pending.last_progress.elapsed() >= self.write_timeout {
            tracing::warn!(
                %request_id,
                sent = pending.offset,
                total,
                "response write stalled, giving up"
            );
            self.pending = None;
            return WriteProgress::Failed {
                request_id,
                error: BridgeError::WriteTimeout(self.write_timeout),
            };
        }

        WriteProgress::InProgress {
            written,
            remaining: total - pending.offset,
        }
    }

    /// Drop the in-flight write if it belongs to `connection`.
    pub fn abort_for(&mut self, connection: ConnectionId) -> bool {
        match &self.pending {
            Some(p) if p.connection == connection => {
                tracing::debug!(%connection, request_id = %p.request_id, "response aborted");
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for ChunkedWriter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_WRITE_TIMEOUT)
    }
}
