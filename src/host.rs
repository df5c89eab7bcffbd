//! Host-thread state and the inbound poll.
//!
//! Everything here runs on the host's single thread from inside
//! [`TickScheduler::advance`]. The I/O runtime never touches a [`Session`].
//!
//! Per tick, in scheduler order:
//! - the poll task drains the inbound queue every `poll_interval` ticks and
//!   dispatches frames;
//! - a pump task writes the next chunk of the response in flight;
//! - busy responses wait in one-shot retry tasks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::CatalogCollaborator;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::handler::{failure_message, Dispatcher};
use crate::inbound::{Inbound, InboundQueue};
use crate::protocol::RequestId;
use crate::scheduler::{Next, TaskId, TickScheduler};
use crate::transport::{ConnectionId, HostLink};
use crate::writer::{ChunkedWriter, WriteProgress};

/// Pause between attempts on a full channel while finishing a write.
const FINISH_WRITE_BACKOFF: Duration = Duration::from_millis(1);

/// Host-side bridge state.
pub struct Session {
    link: Option<HostLink>,
    writer: ChunkedWriter,
    catalog: Box<dyn CatalogCollaborator>,
    module_path: PathBuf,
    ready_reply: String,
    idle_poll_interval: u32,
    ready_poll_interval: u32,
    poll_interval: u32,
    write_retry_ticks: u32,
    write_retry_limit: u32,
}

impl Session {
    /// Create a session from the bridge config.
    pub fn new(config: &BridgeConfig, catalog: Box<dyn CatalogCollaborator>) -> Self {
        Self {
            link: None,
            writer: ChunkedWriter::new(config.chunk_size, config.write_timeout()),
            catalog,
            module_path: config.resolved_module_path(),
            ready_reply: config.ready_reply.clone(),
            idle_poll_interval: config.poll_interval_ticks.max(1),
            ready_poll_interval: config.ready_poll_interval_ticks.max(1),
            poll_interval: config.poll_interval_ticks.max(1),
            write_retry_ticks: config.write_retry_ticks,
            write_retry_limit: config.write_retry_limit,
        }
    }

    /// The live connection, if any.
    pub fn link(&self) -> Option<&HostLink> {
        self.link.as_ref()
    }

    /// Whether a connection is live.
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Ticks between inbound polls.
    pub fn poll_interval(&self) -> u32 {
        self.poll_interval
    }

    /// Change the poll interval; takes effect after the next poll.
    pub fn set_poll_interval(&mut self, ticks: u32) {
        let ticks = ticks.max(1);
        if ticks != self.poll_interval {
            tracing::info!(from = self.poll_interval, to = ticks, "poll interval changed");
        }
        self.poll_interval = ticks;
    }

    /// Poll interval used once the controller is ready.
    pub fn ready_poll_interval(&self) -> u32 {
        self.ready_poll_interval
    }

    /// Path reported to the controller.
    pub fn module_path(&self) -> &Path {
        &self.module_path
    }

    /// Payload answering `ready`.
    pub fn ready_reply(&self) -> &str {
        &self.ready_reply
    }

    /// The catalog collaborator.
    pub fn catalog(&mut self) -> &mut dyn CatalogCollaborator {
        self.catalog.as_mut()
    }

    /// Whether a response is being written.
    pub fn is_writing(&self) -> bool {
        self.writer.is_active()
    }

    fn on_connected(&mut self, link: HostLink) {
        if let Some(old) = self.link.take() {
            self.writer.abort_for(old.id());
        }
        tracing::info!(connection = %link.id(), "controller connected");
        self.link = Some(link);
        self.poll_interval = self.idle_poll_interval;

        match self.catalog.refresh() {
            Ok(items) => tracing::debug!(count = items.len(), "catalog refreshed"),
            Err(e) => tracing::error!("catalog refresh failed: {}", e),
        }
    }

    fn on_disconnected(&mut self, id: ConnectionId) {
        self.writer.abort_for(id);
        if self.link.as_ref().map(HostLink::id) == Some(id) {
            tracing::info!(connection = %id, "controller disconnected");
            self.link = None;
            self.poll_interval = self.idle_poll_interval;
        }
    }

    /// Write the rest of the response in flight, blocking the calling
    /// thread until it completes or the writer's stall timeout fires.
    ///
    /// Returns `false` if a frame was left partly written on the channel.
    pub(crate) fn finish_write(&mut self) -> bool {
        let Some(link) = self.link.clone() else {
            return true;
        };

        loop {
            let sent = self.writer.sent().unwrap_or(0);
            match self.writer.pump(&link) {
                WriteProgress::Idle | WriteProgress::Complete { .. } => return true,
                WriteProgress::InProgress { written: 0, .. } => {
                    std::thread::sleep(FINISH_WRITE_BACKOFF);
                }
                WriteProgress::InProgress { .. } => {}
                WriteProgress::Failed { request_id, error } => {
                    tracing::warn!(%request_id, sent, "response cut short at shutdown: {}", error);
                    return sent == 0;
                }
            }
        }
    }

    /// Drop the link and any response in flight.
    pub(crate) fn close(&mut self) {
        if let Some(link) = self.link.take() {
            self.writer.abort_for(link.id());
        }
    }

    fn pump_write(&mut self, seq: u64) -> Next {
        if self.writer.active_seq() != Some(seq) {
            return Next::Stop;
        }
        let Some(link) = self.link.clone() else {
            return Next::Stop;
        };

        match self.writer.pump(&link) {
            WriteProgress::InProgress { .. } => Next::After(1),
            WriteProgress::Failed { request_id, error } => {
                tracing::warn!(%request_id, "response abandoned: {}", error);
                Next::Stop
            }
            WriteProgress::Complete { .. } | WriteProgress::Idle => Next::Stop,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("link", &self.link)
            .field("writer", &self.writer)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Send `message` as the response to `request_id`.
///
/// The first chunk goes out immediately; the rest follow one chunk per tick.
/// If another response is still being written, this one is retried every
/// `write_retry_ticks` up to `write_retry_limit` times and then dropped.
pub fn send_response(
    session: &mut Session,
    scheduler: &mut TickScheduler<Session>,
    request_id: RequestId,
    message: String,
) {
    let Some(connection) = session.link.as_ref().map(HostLink::id) else {
        tracing::warn!(%request_id, "not connected, dropping response");
        return;
    };
    attempt_send(session, scheduler, connection, request_id, message, 0);
}

/// A response belongs to the connection its request arrived on; it is
/// dropped rather than sent to a later connection.
fn attempt_send(
    session: &mut Session,
    scheduler: &mut TickScheduler<Session>,
    connection: ConnectionId,
    request_id: RequestId,
    message: String,
    retries: u32,
) {
    let link = match session.link.clone() {
        Some(link) if link.id() == connection => link,
        _ => {
            tracing::debug!(%connection, %request_id, "connection closed, dropping response");
            return;
        }
    };

    match session.writer.begin_write(&link, request_id, &message) {
        Ok(WriteProgress::InProgress { .. }) => {
            if let Some(seq) = session.writer.active_seq() {
                scheduler.schedule_repeating(1, move |session, _| session.pump_write(seq));
            }
        }
        Ok(WriteProgress::Failed { error, .. }) => {
            tracing::warn!(%request_id, "response abandoned: {}", error);
        }
        Ok(WriteProgress::Complete { .. }) | Ok(WriteProgress::Idle) => {}
        Err(BridgeError::AlreadyWriting(active)) if retries < session.write_retry_limit => {
            tracing::debug!(%request_id, %active, retries, "writer busy, retrying response");
            scheduler.schedule_once(session.write_retry_ticks, move |session, scheduler| {
                attempt_send(session, scheduler, connection, request_id, message, retries + 1)
            });
        }
        Err(e) => tracing::warn!(%request_id, "response dropped: {}", e),
    }
}

/// Send a failure response for `action`.
pub fn send_failure(
    session: &mut Session,
    scheduler: &mut TickScheduler<Session>,
    request_id: RequestId,
    action: &str,
    detail: &str,
) {
    send_response(session, scheduler, request_id, failure_message(action, detail));
}

/// Apply one inbound event.
pub fn process_event(
    event: Inbound,
    dispatcher: &Dispatcher,
    session: &mut Session,
    scheduler: &mut TickScheduler<Session>,
) {
    match event {
        Inbound::Connected(link) => session.on_connected(link),
        Inbound::Disconnected(id) => session.on_disconnected(id),
        Inbound::Frame { connection, frame } => {
            if session.link.as_ref().map(HostLink::id) != Some(connection) {
                tracing::debug!(
                    %connection,
                    request_id = %frame.request_id(),
                    "dropping frame from a closed connection"
                );
                return;
            }

            let request_id = frame.request_id();
            match frame.text() {
                Ok(text) => {
                    tracing::info!(%request_id, payload = text, "request received");
                    dispatcher.dispatch(request_id, text, session, scheduler);
                }
                Err(e) => {
                    tracing::warn!(%request_id, "undecodable request: {}", e);
                    send_failure(session, scheduler, request_id, "request", &e.to_string());
                }
            }
        }
    }
}

/// Register the repeating inbound poll. The task owns the dispatcher and the
/// queue and reschedules itself at the session's poll interval.
pub fn install_poll(
    scheduler: &mut TickScheduler<Session>,
    dispatcher: Dispatcher,
    mut inbound: InboundQueue,
) -> TaskId {
    scheduler.schedule_repeating(1, move |session, scheduler| {
        while let Some(event) = inbound.try_pop() {
            process_event(event, &dispatcher, session, scheduler);
        }
        Next::After(session.poll_interval())
    })
}
