//! Transport module - platform-specific pipe/socket handling.
//!
//! Provides one [`Connector`] interface over:
//! - TCP to a loopback host/port
//! - A request/response pipe pair (FIFOs on Unix, named pipes on Windows)

mod connection;
mod link;
mod pipe;
mod tcp;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use connection::{
    Connection, ConnectionId, ConnectionState, HostLink, ReadEnd, Transport, TransportConfig,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_JOIN_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};
pub use link::{write_all_bounded, BoxFuture, BoxedReader, Channel, LinkWriter};
pub use pipe::{default_pipe_paths, PipeConnector};
pub use tcp::TcpConnector;

#[cfg(test)]
pub(crate) use link::testing;

/// Default controller host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default controller port.
pub const DEFAULT_PORT: u16 = 47474;

/// Establishes raw channels to the controller.
pub trait Connector: Send + Sync + 'static {
    /// Make one connection attempt.
    fn connect(&self) -> BoxFuture<'_, io::Result<Channel>>;

    /// Human-readable endpoint, for logs.
    fn describe(&self) -> String;
}

/// Where the controller listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// TCP socket on the loopback interface.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port number.
        port: u16,
    },
    /// Request/response pipe pair.
    Pipes {
        /// Pipe the controller writes requests into.
        request: PathBuf,
        /// Pipe we write responses into.
        response: PathBuf,
    },
}

impl Endpoint {
    /// Pipe pair at the platform default paths.
    pub fn default_pipes() -> Self {
        let (request, response) = default_pipe_paths();
        Endpoint::Pipes { request, response }
    }

    /// Build the connector for this endpoint.
    pub fn connector(&self) -> Box<dyn Connector> {
        match self {
            Endpoint::Tcp { host, port } => Box::new(TcpConnector::new(host.clone(), *port)),
            Endpoint::Pipes { request, response } => {
                Box::new(PipeConnector::new(request.clone(), response.clone()))
            }
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::Tcp {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}
