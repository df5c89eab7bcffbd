//! Inbound queue between the I/O runtime and the host thread.
//!
//! The reader task and the connection manager only ever *push* events; the
//! host drains them from its own tick. Commands are therefore never executed
//! on an I/O thread.
//!
//! ```text
//! Reader task ──┐
//!               ├─► InboundSender ─► mpsc ─► InboundQueue::drain() ─► host tick
//! Manager task ─┘
//! ```

use tokio::sync::mpsc;

use crate::protocol::Frame;
use crate::transport::{ConnectionId, HostLink};

/// Event delivered to the host thread.
#[derive(Debug)]
pub enum Inbound {
    /// A connection was established and announced.
    Connected(HostLink),
    /// A complete frame arrived on a connection.
    Frame {
        /// Connection the frame arrived on.
        connection: ConnectionId,
        /// The decoded frame.
        frame: Frame,
    },
    /// The connection was lost or closed.
    Disconnected(ConnectionId),
}

/// Producer half, cheaply cloneable and `Send`.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl InboundSender {
    /// Push an event. Returns `false` if the host side has been dropped.
    pub fn push(&self, event: Inbound) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Consumer half, owned by the host thread.
#[derive(Debug)]
pub struct InboundQueue {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

impl InboundQueue {
    /// Pop the next event without blocking.
    pub fn try_pop(&mut self) -> Option<Inbound> {
        self.rx.try_recv().ok()
    }

    /// Take every event currently queued, in arrival order.
    pub fn drain(&mut self) -> Vec<Inbound> {
        std::iter::from_fn(|| self.try_pop()).collect()
    }
}

/// Create a connected sender/queue pair.
pub fn inbound_queue() -> (InboundSender, InboundQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InboundSender { tx }, InboundQueue { rx })
}
