//! Platform-specific pipe pair connector.
//!
//! The controller owns two pipes: one carrying requests to us, one carrying
//! our responses back.
//!
//! - Unix: a pair of FIFOs created by the controller (`mkfifo`)
//! - Windows: a pair of named pipe servers (`\\.\pipe\...`)
//!
//! The response pipe is opened first. On Unix, opening a FIFO for writing
//! without blocking fails with `ENXIO` until the controller holds the read
//! end, so a successful open means the peer is up.

use std::io;
use std::path::{Path, PathBuf};

use super::link::{BoxFuture, Channel};
use super::Connector;

/// Default pipe paths for this platform as `(request, response)`.
pub fn default_pipe_paths() -> (PathBuf, PathBuf) {
    #[cfg(unix)]
    {
        (
            PathBuf::from("/tmp/tickwire_request"),
            PathBuf::from("/tmp/tickwire_response"),
        )
    }

    #[cfg(windows)]
    {
        (
            PathBuf::from(r"\\.\pipe\tickwire_request"),
            PathBuf::from(r"\\.\pipe\tickwire_response"),
        )
    }
}

/// Connects to the controller through a request/response pipe pair.
#[derive(Debug, Clone)]
pub struct PipeConnector {
    request: PathBuf,
    response: PathBuf,
}

impl PipeConnector {
    /// Create a connector for the given pipe paths.
    pub fn new(request: impl Into<PathBuf>, response: impl Into<PathBuf>) -> Self {
        Self {
            request: request.into(),
            response: response.into(),
        }
    }

    /// Path of the pipe we read requests from.
    pub fn request_path(&self) -> &Path {
        &self.request
    }

    /// Path of the pipe we write responses to.
    pub fn response_path(&self) -> &Path {
        &self.response
    }
}

impl Connector for PipeConnector {
    fn connect(&self) -> BoxFuture<'_, io::Result<Channel>> {
        Box::pin(async move { open_pair(&self.request, &self.response) })
    }

    fn describe(&self) -> String {
        format!(
            "pipes(request={}, response={})",
            self.request.display(),
            self.response.display()
        )
    }
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
fn open_pair(request: &Path, response: &Path) -> io::Result<Channel> {
    use std::sync::Arc;
    use tokio::net::unix::pipe::OpenOptions;

    let writer = OpenOptions::new().open_sender(response)?;
    let reader = OpenOptions::new().open_receiver(request)?;

    Ok(Channel::new(Box::new(reader), Arc::new(writer)))
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
fn open_pair(request: &Path, response: &Path) -> io::Result<Channel> {
    use std::sync::Arc;
    use tokio::net::windows::named_pipe::ClientOptions;

    // ERROR_PIPE_BUSY and ERROR_FILE_NOT_FOUND both surface here and are
    // retried by the connection manager.
    let writer = ClientOptions::new().read(false).write(true).open(response)?;
    let reader = ClientOptions::new().read(true).write(false).open(request)?;

    Ok(Channel::new(Box::new(reader), Arc::new(writer)))
}
