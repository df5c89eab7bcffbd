//! Handler module - command dispatch on the host thread.
//!
//! Provides:
//! - [`Dispatcher`] - maps action names to handlers and runs command batches
//! - [`RequestContext`] - lets handlers respond, fail, and reach the session
//! - [`builtin`] - the `ready`, `path`, `plugins` and `load_item` actions
//!
//! # Example
//!
//! ```ignore
//! use tickwire::handler::{Dispatcher, RequestContext};
//!
//! let mut dispatcher = Dispatcher::with_builtins();
//!
//! dispatcher.register("count", |ctx: &mut RequestContext<'_>, _params: &[String]| {
//!     let n = ctx.catalog().items().len();
//!     ctx.respond(n.to_string());
//!     Ok(())
//! });
//! ```

pub mod builtin;
mod context;
mod registry;

pub use context::{failure_message, RequestContext};
pub use registry::{DispatchReport, Dispatcher, Handler, HandlerResult};
