//! Channel halves shared by every connector.
//!
//! A connector yields a [`Channel`]: a boxed async reader that moves into the
//! reader task, and a [`LinkWriter`] shared between the connection manager
//! (bounded `READY`/`SHUTDOWN` sends) and the host thread (non-blocking chunk
//! writes).

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::error::{BridgeError, Result};

/// Boxed future, `Send` so it can run on the I/O runtime.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read half of a channel.
pub type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Write half of a channel.
///
/// `try_write` must never block: it writes what the OS accepts right now
/// and returns `WouldBlock` when nothing can be written.
pub trait LinkWriter: Send + Sync + 'static {
    /// Write as many bytes as possible without blocking.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Wait until the channel is likely writable.
    fn writable(&self) -> BoxFuture<'_, io::Result<()>>;
}

/// An established, not yet started, channel.
pub struct Channel {
    /// Read half; moved into the reader task.
    pub reader: BoxedReader,
    /// Write half.
    pub writer: Arc<dyn LinkWriter>,
}

impl Channel {
    /// Create a channel from its halves.
    pub fn new(reader: BoxedReader, writer: Arc<dyn LinkWriter>) -> Self {
        Self { reader, writer }
    }
}

/// Write all of `buf`, giving up after `timeout`.
///
/// An unresponsive peer surfaces as [`BridgeError::WriteTimeout`], an OS
/// error as [`BridgeError::WriteFailed`].
pub async fn write_all_bounded(
    writer: &dyn LinkWriter,
    buf: &[u8],
    timeout: Duration,
) -> Result<()> {
    let write = async move {
        let mut remaining = buf;
        while !remaining.is_empty() {
            writer.writable().await?;
            match writer.try_write(remaining) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "channel accepted 0 bytes",
                    ))
                }
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok::<(), io::Error>(())
    };

    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(BridgeError::WriteFailed(e)),
        Err(_) => Err(BridgeError::WriteTimeout(timeout)),
    }
}

impl LinkWriter for tokio::net::tcp::OwnedWriteHalf {
    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        tokio::net::tcp::OwnedWriteHalf::try_write(self, buf)
    }

    fn writable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(tokio::net::tcp::OwnedWriteHalf::writable(self))
    }
}

#[cfg(unix)]
impl LinkWriter for tokio::net::unix::pipe::Sender {
    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        tokio::net::unix::pipe::Sender::try_write(self, buf)
    }

    fn writable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(tokio::net::unix::pipe::Sender::writable(self))
    }
}

#[cfg(windows)]
impl LinkWriter for tokio::net::windows::named_pipe::NamedPipeClient {
    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        tokio::net::windows::named_pipe::NamedPipeClient::try_write(self, buf)
    }

    fn writable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(tokio::net::windows::named_pipe::NamedPipeClient::writable(self))
    }
}
