//! Connections and the per-connection reader task.
//!
//! [`Transport`] turns a [`Connector`] into [`Connection`]s with bounded
//! connect and write timeouts. Each connection owns its reader task; the
//! host only ever sees a [`HostLink`].

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::link::{write_all_bounded, BoxedReader, LinkWriter};
use super::Connector;
use crate::error::{BridgeError, Result};
use crate::inbound::{Inbound, InboundSender};
use crate::protocol::{
    Frame, FrameBuffer, RequestId, DEFAULT_MAX_PAYLOAD_SIZE, READY_PAYLOAD, SHUTDOWN_PAYLOAD,
};

/// Size of the reader task's read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on any single blocking write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default time allowed for the reader task to exit on disconnect.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Identifies one established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a connection id.
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No channel; initial state.
    #[default]
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Channel established.
    Connected,
    /// Shutdown has begun.
    Closing,
}

/// Why a reader task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// Zero-length read: the peer closed its end.
    PeerClosed,
    /// The peer sent a `SHUTDOWN` frame.
    PeerShutdown,
    /// The OS reported an error.
    Failed(io::ErrorKind),
    /// Stopped by [`Connection::disconnect`].
    Stopped,
    /// The host side of the inbound queue is gone.
    QueueClosed,
}

/// The host thread's view of a live connection.
#[derive(Clone)]
pub struct HostLink {
    id: ConnectionId,
    writer: Arc<dyn LinkWriter>,
}

impl HostLink {
    /// Create a link from a connection id and its writer.
    pub fn new(id: ConnectionId, writer: Arc<dyn LinkWriter>) -> Self {
        Self { id, writer }
    }

    /// Connection this link belongs to.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Non-blocking writer for chunked responses.
    #[inline]
    pub fn writer(&self) -> &dyn LinkWriter {
        self.writer.as_ref()
    }
}

impl fmt::Debug for HostLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostLink").field("id", &self.id).finish()
    }
}

/// Timeouts and limits applied by the transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Bound on a whole-frame blocking send.
    pub write_timeout: Duration,
    /// Bound on joining the reader task at disconnect.
    pub join_timeout: Duration,
    /// Largest payload the reader accepts.
    pub max_payload_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Opens connections through a platform connector.
pub struct Transport {
    connector: Box<dyn Connector>,
    config: TransportConfig,
    next_id: u64,
}

impl Transport {
    /// Create a transport.
    pub fn new(connector: Box<dyn Connector>, config: TransportConfig) -> Self {
        Self {
            connector,
            config,
            next_id: 0,
        }
    }

    /// Human-readable endpoint description.
    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    /// Attempt one connection, bounded by the connect timeout.
    pub async fn connect(&mut self) -> Result<Connection> {
        let timeout = self.config.connect_timeout;
        let channel = match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => return Err(BridgeError::Io(e)),
            Err(_) => return Err(BridgeError::ConnectTimeout(timeout)),
        };

        self.next_id += 1;
        let (stop, _) = watch::channel(false);

        Ok(Connection {
            id: ConnectionId(self.next_id),
            writer: channel.writer,
            reader: Some(channel.reader),
            reader_task: None,
            stop,
            config: self.config.clone(),
        })
    }
}

/// An established connection.
///
/// Owns the reader task and the channel handles. Dropping it stops the
/// reader and closes the channel.
pub struct Connection {
    id: ConnectionId,
    writer: Arc<dyn LinkWriter>,
    reader: Option<BoxedReader>,
    reader_task: Option<JoinHandle<ReadEnd>>,
    stop: watch::Sender<bool>,
    config: TransportConfig,
}

impl Connection {
    /// Connection id.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Link handed to the host thread.
    pub fn link(&self) -> HostLink {
        HostLink::new(self.id, self.writer.clone())
    }

    /// Send a whole frame, bounded by the write timeout.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        write_all_bounded(self.writer.as_ref(), &bytes, self.config.write_timeout).await
    }

    /// Send the `READY` announcement.
    pub async fn announce(&self) -> Result<()> {
        self.send(&Frame::new(
            RequestId::ANNOUNCE,
            Bytes::from_static(READY_PAYLOAD),
        ))
        .await
    }

    /// Spawn the reader task feeding `inbound`.
    ///
    /// Must be called from within the I/O runtime. Calling it twice is a
    /// no-op.
    pub fn start_reader(&mut self, inbound: InboundSender) {
        let Some(reader) = self.reader.take() else {
            tracing::warn!(connection = %self.id, "reader already started");
            return;
        };

        let task = tokio::spawn(read_loop(
            reader,
            self.id,
            inbound,
            self.stop.subscribe(),
            self.config.max_payload_size,
        ));
        self.reader_task = Some(task);
    }

    /// Wait for the reader task to end.
    ///
    /// Never resolves if the reader was not started. Cancel safe.
    pub async fn closed(&mut self) -> ReadEnd {
        let Some(task) = self.reader_task.as_mut() else {
            return std::future::pending().await;
        };

        let end = match task.await {
            Ok(end) => end,
            Err(e) => {
                tracing::error!(connection = %self.id, "reader task failed: {}", e);
                ReadEnd::Failed(io::ErrorKind::Other)
            }
        };
        self.reader_task = None;
        end
    }

    /// Close the connection.
    ///
    /// When `announce` is set, a `SHUTDOWN` frame is sent first (best
    /// effort). The reader is then signalled and joined with the join
    /// timeout; a reader that does not exit in time is abandoned.
    pub async fn disconnect(mut self, announce: bool) {
        if announce {
            let shutdown = Frame::new(RequestId::SHUTDOWN, Bytes::from_static(SHUTDOWN_PAYLOAD));
            match self.send(&shutdown).await {
                Ok(()) => tracing::debug!(connection = %self.id, "SHUTDOWN sent"),
                Err(e) => tracing::debug!(connection = %self.id, "SHUTDOWN not delivered: {}", e),
            }
        }

        let _ = self.stop.send(true);

        if let Some(task) = self.reader_task.take() {
            if tokio::time::timeout(self.config.join_timeout, task)
                .await
                .is_err()
            {
                tracing::warn!(
                    connection = %self.id,
                    timeout = ?self.config.join_timeout,
                    "reader task did not exit in time, abandoning it"
                );
            }
        }

        tracing::info!(connection = %self.id, "disconnected");
    }
}

/// Reader task: bytes -> frames -> inbound queue.
async fn read_loop(
    mut reader: BoxedReader,
    id: ConnectionId,
    inbound: InboundSender,
    mut stop: watch::Receiver<bool>,
    max_payload_size: usize,
) -> ReadEnd {
    let mut frames = FrameBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = stop.changed() => return ReadEnd::Stopped,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::info!(connection = %id, "peer closed the channel");
                    return ReadEnd::PeerClosed;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(connection = %id, "read failed: {}", e);
                    return ReadEnd::Failed(e.kind());
                }
            },
        };

        for frame in frames.push(&buf[..n]) {
            if frame.is_shutdown() {
                tracing::info!(connection = %id, "peer sent SHUTDOWN");
                return ReadEnd::PeerShutdown;
            }

            tracing::trace!(
                connection = %id,
                request_id = %frame.request_id(),
                len = frame.payload_len(),
                "frame received"
            );
            if !inbound.push(Inbound::Frame {
                connection: id,
                frame,
            }) {
                return ReadEnd::QueueClosed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::inbound_queue;
    use crate::protocol::encode_frame;
    use crate::transport::link::testing::MemoryWriter;
    use crate::transport::link::{BoxFuture, Channel};
    use std::sync::Mutex;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    /// Hands out pre-built duplex channels, one per connect.
    struct DuplexConnector {
        channels: Mutex<Vec<(DuplexStream, Arc<MemoryWriter>)>>,
    }

    impl Connector for DuplexConnector {
        fn connect(&self) -> BoxFuture<'_, io::Result<Channel>> {
            let next = self.channels.lock().unwrap().pop();
            Box::pin(async move {
                let (reader, writer) =
                    next.ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))?;
                Ok(Channel::new(Box::new(reader), writer))
            })
        }

        fn describe(&self) -> String {
            "duplex".to_string()
        }
    }

    fn transport_with(
        channels: Vec<(DuplexStream, Arc<MemoryWriter>)>,
    ) -> Transport {
        Transport::new(
            Box::new(DuplexConnector {
                channels: Mutex::new(channels),
            }),
            TransportConfig {
                join_timeout: Duration::from_millis(200),
                ..TransportConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_reader_pushes_frames_and_detects_eof() {
        let (ours, mut theirs) = tokio::io::duplex(1024);
        let writer = Arc::new(MemoryWriter::default());
        let mut transport = transport_with(vec![(ours, writer)]);
        let (tx, mut queue) = inbound_queue();

        let mut connection = transport.connect().await.unwrap();
        connection.start_reader(tx);

        let bytes = encode_frame(RequestId::new(5).unwrap(), b"path").unwrap();
        theirs.write_all(&bytes[..9]).await.unwrap();
        theirs.write_all(&bytes[9..]).await.unwrap();
        drop(theirs);

        assert_eq!(connection.closed().await, ReadEnd::PeerClosed);

        let events = queue.drain();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Inbound::Frame { connection: id, frame } => {
                assert_eq!(*id, connection.id());
                assert_eq!(frame.payload(), b"path");
                assert_eq!(frame.request_id().value(), 5);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_peer_shutdown_frame_ends_reader() {
        let (ours, mut theirs) = tokio::io::duplex(1024);
        let mut transport = transport_with(vec![(ours, Arc::new(MemoryWriter::default()))]);
        let (tx, mut queue) = inbound_queue();

        let mut connection = transport.connect().await.unwrap();
        connection.start_reader(tx);

        let bytes = encode_frame(RequestId::SHUTDOWN, SHUTDOWN_PAYLOAD).unwrap();
        theirs.write_all(&bytes).await.unwrap();

        assert_eq!(connection.closed().await, ReadEnd::PeerShutdown);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_connection_can_be_borrowed_across_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Connection>();
        assert_send_sync::<Channel>();
    }

    #[tokio::test]
    async fn test_shutdown_text_with_ordinary_id_is_delivered() {
        let (ours, mut theirs) = tokio::io::duplex(1024);
        let mut transport = transport_with(vec![(ours, Arc::new(MemoryWriter::default()))]);
        let (tx, mut queue) = inbound_queue();

        let mut connection = transport.connect().await.unwrap();
        connection.start_reader(tx);

        let bytes = encode_frame(RequestId::new(3).unwrap(), SHUTDOWN_PAYLOAD).unwrap();
        theirs.write_all(&bytes).await.unwrap();
        drop(theirs);

        assert_eq!(connection.closed().await, ReadEnd::PeerClosed);
        let events = queue.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            Inbound::Frame { frame, .. } if frame.request_id().value() == 3
        ));
    }

    #[tokio::test]
    async fn test_announce_and_disconnect_send_control_frames() {
        let (ours, _theirs) = tokio::io::duplex(1024);
        let writer = Arc::new(MemoryWriter::default());
        let mut transport = transport_with(vec![(ours, writer.clone())]);
        let (tx, _queue) = inbound_queue();

        let mut connection = transport.connect().await.unwrap();
        connection.start_reader(tx);
        connection.announce().await.unwrap();
        connection.disconnect(true).await;

        let mut expected = encode_frame(RequestId::ANNOUNCE, READY_PAYLOAD)
            .unwrap()
            .to_vec();
        expected.extend_from_slice(&encode_frame(RequestId::SHUTDOWN, SHUTDOWN_PAYLOAD).unwrap());
        assert_eq!(writer.bytes(), expected);
    }

    #[tokio::test]
    async fn test_connection_ids_increase() {
        let (a, _a) = tokio::io::duplex(64);
        let (b, _b) = tokio::io::duplex(64);
        let mut transport = transport_with(vec![
            (a, Arc::new(MemoryWriter::default())),
            (b, Arc::new(MemoryWriter::default())),
        ]);

        let first = transport.connect().await.unwrap();
        let second = transport.connect().await.unwrap();
        assert!(second.id() > first.id());
        assert_eq!(first.link().id(), first.id());
    }

    #[tokio::test]
    async fn test_connect_error_is_reported() {
        let mut transport = transport_with(vec![]);
        assert!(matches!(
            transport.connect().await,
            Err(BridgeError::Io(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        struct Hanging;

        impl Connector for Hanging {
            fn connect(&self) -> BoxFuture<'_, io::Result<Channel>> {
                Box::pin(std::future::pending())
            }

            fn describe(&self) -> String {
                "hanging".to_string()
            }
        }

        let mut transport = Transport::new(Box::new(Hanging), TransportConfig::default());
        assert!(matches!(
            transport.connect().await,
            Err(BridgeError::ConnectTimeout(_))
        ));
    }
}
