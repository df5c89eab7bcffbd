//! TCP loopback connector.

use std::io;
use std::sync::Arc;

use tokio::net::TcpStream;

use super::link::{BoxFuture, Channel};
use super::Connector;

/// Connects to the controller over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    /// Create a connector for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> BoxFuture<'_, io::Result<Channel>> {
        Box::pin(async move {
            let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            stream.set_nodelay(true)?;

            let (reader, writer) = stream.into_split();
            Ok(Channel::new(Box::new(reader), Arc::new(writer)))
        })
    }

    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}
