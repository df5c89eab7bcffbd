//! Action dispatcher.
//!
//! Maps lower-cased action names to handlers registered at startup. A frame
//! payload is a batch of commands; they run in order on the host thread, and
//! each one sees the side effects of the ones before it.
//!
//! # Example
//!
//! ```ignore
//! use tickwire::handler::{Dispatcher, RequestContext};
//!
//! let mut dispatcher = Dispatcher::with_builtins();
//!
//! dispatcher.register("echo", |ctx: &mut RequestContext<'_>, params: &[String]| {
//!     ctx.respond(params.join(","));
//!     Ok(())
//! });
//! ```

use std::collections::HashMap;

use super::{builtin, RequestContext};
use crate::error::{BridgeError, Result};
use crate::host::{send_failure, Session};
use crate::protocol::{parse_batch, RequestId};
use crate::scheduler::TickScheduler;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Trait for handler functions.
///
/// Handlers run on the host thread, so they need not be `Send`.
pub trait Handler: 'static {
    /// Run the action with its parameters.
    fn call(&self, ctx: &mut RequestContext<'_>, params: &[String]) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&mut RequestContext<'_>, &[String]) -> HandlerResult + 'static,
{
    fn call(&self, ctx: &mut RequestContext<'_>, params: &[String]) -> HandlerResult {
        self(ctx, params)
    }
}

/// What happened to each command of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Actions whose handler returned `Ok`, in order.
    pub executed: Vec<String>,
    /// Actions with no registered handler.
    pub unknown: Vec<String>,
    /// Actions whose handler returned an error.
    pub failed: Vec<String>,
}

/// Registry mapping action names to handlers.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dispatcher with `ready`, `path`, `plugins` and `load_item`.
    pub fn with_builtins() -> Self {
        let mut dispatcher = Self::new();
        builtin::register_builtins(&mut dispatcher);
        dispatcher
    }

    /// Register a handler. Names are case-insensitive; a later registration
    /// replaces an earlier one.
    pub fn register<F>(&mut self, action: &str, handler: F)
    where
        F: Fn(&mut RequestContext<'_>, &[String]) -> HandlerResult + 'static,
    {
        let name = action.to_lowercase();
        if self.handlers.insert(name.clone(), Box::new(handler)).is_some() {
            tracing::debug!(action = %name, "handler replaced");
        }
    }

    /// Whether `action` has a handler.
    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(&action.to_lowercase())
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run every command of `payload`.
    ///
    /// Unknown actions and handler errors are logged and answered with a
    /// failure response; the rest of the batch still runs.
    pub fn dispatch(
        &self,
        request_id: RequestId,
        payload: &str,
        session: &mut Session,
        scheduler: &mut TickScheduler<Session>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for command in parse_batch(payload) {
            let action = command.action();

            let Some(handler) = self.handlers.get(action) else {
                tracing::warn!(%request_id, action, "no such action");
                let error = BridgeError::UnknownAction(action.to_string());
                send_failure(session, scheduler, request_id, action, &error.to_string());
                report.unknown.push(action.to_string());
                continue;
            };

            tracing::debug!(%request_id, action, params = ?command.params(), "running action");
            let mut ctx = RequestContext::new(request_id, action, session, scheduler);
            match handler.call(&mut ctx, command.params()) {
                Ok(()) => report.executed.push(action.to_string()),
                Err(e) => {
                    tracing::error!(%request_id, action, "action failed: {}", e);
                    ctx.fail(&e.to_string());
                    report.failed.push(action.to_string());
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("actions", &self.actions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::host::testing::connected_session;
    use crate::protocol::encode_frame;
    use crate::transport::testing::MemoryWriter;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    fn rid(value: u64) -> RequestId {
        RequestId::new(value).unwrap()
    }

    #[test]
    fn test_register_is_case_insensitive() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("Echo", |_ctx: &mut RequestContext<'_>, _params: &[String]| Ok(()));

        assert!(dispatcher.contains("echo"));
        assert!(dispatcher.contains("ECHO"));
        assert_eq!(dispatcher.actions(), vec!["echo"]);
    }

    #[test]
    fn test_builtins_registered() {
        let dispatcher = Dispatcher::with_builtins();
        assert_eq!(
            dispatcher.actions(),
            vec!["load_item", "path", "plugins", "ready"]
        );
    }

    #[test]
    fn test_batch_runs_in_order_and_skips_unknown() {
        let writer = Arc::new(MemoryWriter::default());
        let mut session = connected_session(&BridgeConfig::default(), &writer);
        let mut scheduler = TickScheduler::new();
        let dispatcher = Dispatcher::with_builtins();

        let report = dispatcher.dispatch(rid(12), "ready;plugins;bogus,1,2", &mut session, &mut scheduler);

        assert_eq!(report.executed, vec!["ready", "plugins"]);
        assert_eq!(report.unknown, vec!["bogus"]);
        assert!(report.failed.is_empty());
        assert_eq!(session.poll_interval(), 1);

        let mut expected = encode_frame(rid(12), b"SPAGHETTI").unwrap().to_vec();
        expected.extend_from_slice(
            &encode_frame(rid(12), b"0,Reverb,vst:reverb|1,Delay,vst:delay").unwrap(),
        );
        expected.extend_from_slice(
            &encode_frame(rid(12), b"ERROR:bogus:unknown action: bogus").unwrap(),
        );
        assert_eq!(writer.bytes(), expected);
    }

    #[test]
    fn test_side_effects_visible_to_later_commands() {
        let writer = Arc::new(MemoryWriter::default());
        let mut session = connected_session(&BridgeConfig::default(), &writer);
        let mut scheduler = TickScheduler::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let mut dispatcher = Dispatcher::new();
        dispatcher.register("slow", |ctx: &mut RequestContext<'_>, params: &[String]| {
            let ticks = params.first().and_then(|p| p.parse().ok()).unwrap_or(1);
            ctx.set_poll_interval(ticks);
            Ok(())
        });
        let log = seen.clone();
        dispatcher.register("probe", move |ctx: &mut RequestContext<'_>, _params: &[String]| {
            log.borrow_mut().push(ctx.poll_interval());
            Ok(())
        });

        dispatcher.dispatch(rid(1), "probe;slow,9;probe", &mut session, &mut scheduler);
        assert_eq!(*seen.borrow(), vec![5, 9]);
    }

    #[test]
    fn test_handler_error_answers_failure_and_continues() {
        let writer = Arc::new(MemoryWriter::default());
        let mut session = connected_session(&BridgeConfig::default(), &writer);
        let mut scheduler = TickScheduler::new();

        let mut dispatcher = Dispatcher::with_builtins();
        dispatcher.register("broken", |_ctx: &mut RequestContext<'_>, _params: &[String]| {
            Err(BridgeError::Collaborator("host refused".into()))
        });

        let report = dispatcher.dispatch(rid(3), "BROKEN;path", &mut session, &mut scheduler);
        assert_eq!(report.failed, vec!["broken"]);
        assert_eq!(report.executed, vec!["path"]);

        let text = String::from_utf8(writer.bytes()).unwrap();
        assert!(text.contains("ERROR:broken:collaborator error: host refused"));
    }

    #[test]
    fn test_empty_payload_runs_nothing() {
        let writer = Arc::new(MemoryWriter::default());
        let mut session = connected_session(&BridgeConfig::default(), &writer);
        let mut scheduler = TickScheduler::new();

        let report = Dispatcher::with_builtins().dispatch(rid(1), " ; ", &mut session, &mut scheduler);
        assert_eq!(report, DispatchReport::default());
        assert!(writer.bytes().is_empty());
    }
}
