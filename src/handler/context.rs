//! Request context for handlers.
//!
//! A [`RequestContext`] lives for one command. It carries the request id
//! that every response must echo, and gives the handler the host session and
//! the scheduler.

use std::path::Path;

use crate::catalog::CatalogCollaborator;
use crate::host::{send_failure, send_response, Session};
use crate::protocol::RequestId;
use crate::scheduler::{TaskId, TickScheduler};

/// Build a failure response payload: `ERROR:<action>:<detail>`.
pub fn failure_message(action: &str, detail: &str) -> String {
    format!("ERROR:{action}:{detail}")
}

/// Context for one command of a batch.
pub struct RequestContext<'a> {
    request_id: RequestId,
    action: &'a str,
    session: &'a mut Session,
    scheduler: &'a mut TickScheduler<Session>,
}

impl<'a> RequestContext<'a> {
    /// Create a context.
    pub fn new(
        request_id: RequestId,
        action: &'a str,
        session: &'a mut Session,
        scheduler: &'a mut TickScheduler<Session>,
    ) -> Self {
        Self {
            request_id,
            action,
            session,
            scheduler,
        }
    }

    /// Request id of the frame this command came in.
    #[inline]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Lower-cased action name.
    #[inline]
    pub fn action(&self) -> &str {
        self.action
    }

    /// Send a response echoing the request id.
    ///
    /// Written in chunks over the following ticks; queued for retry if
    /// another response is still in flight.
    pub fn respond(&mut self, message: impl Into<String>) {
        send_response(
            self.session,
            self.scheduler,
            self.request_id,
            message.into(),
        );
    }

    /// Send `ERROR:<action>:<detail>`.
    pub fn fail(&mut self, detail: &str) {
        send_failure(
            self.session,
            self.scheduler,
            self.request_id,
            self.action,
            detail,
        );
    }

    /// The host's catalog.
    pub fn catalog(&mut self) -> &mut dyn CatalogCollaborator {
        self.session.catalog()
    }

    /// Current inbound poll interval, in ticks.
    pub fn poll_interval(&self) -> u32 {
        self.session.poll_interval()
    }

    /// Change the inbound poll interval.
    pub fn set_poll_interval(&mut self, ticks: u32) {
        self.session.set_poll_interval(ticks);
    }

    /// The host session.
    pub fn session(&mut self) -> &mut Session {
        &mut *self.session
    }

    /// Path reported to the controller.
    pub fn module_path(&self) -> &Path {
        self.session.module_path()
    }

    /// Run `f` on the host thread after `ticks`.
    pub fn schedule_once<F>(&mut self, ticks: u32, f: F) -> TaskId
    where
        F: FnOnce(&mut Session, &mut TickScheduler<Session>) + 'static,
    {
        self.scheduler.schedule_once(ticks, f)
    }
}
