//! Bridge builder and host entry point.
//!
//! The [`BridgeBuilder`] provides a fluent API for configuring the endpoint,
//! handlers and catalog. The [`Bridge`] owns both sides:
//! 1. An I/O runtime running the connection manager and reader tasks
//! 2. The host session and scheduler, advanced by [`Bridge::tick`]
//!
//! # Example
//!
//! ```ignore
//! use tickwire::{Bridge, BridgeConfig, StaticCatalog};
//!
//! let mut bridge = Bridge::builder()
//!     .config(BridgeConfig::default())
//!     .catalog(StaticCatalog::default())
//!     .handle("version", |ctx, _params| {
//!         ctx.respond(env!("CARGO_PKG_VERSION"));
//!         Ok(())
//!     })
//!     .build()?;
//!
//! loop {
//!     bridge.tick(); // from the host's own tick callback
//! #   break;
//! }
//! bridge.shutdown();
//! ```

use std::path::PathBuf;

use tokio::runtime::Runtime;

use crate::catalog::{CatalogCollaborator, StaticCatalog};
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::handler::{Dispatcher, HandlerResult, RequestContext};
use crate::host::{install_poll, Session};
use crate::inbound::inbound_queue;
use crate::manager::{ConnectionManager, ManagerHandle, ManagerStatus};
use crate::scheduler::TickScheduler;
use crate::transport::{ConnectionState, Connector, Endpoint, Transport};

/// Default number of I/O worker threads.
pub const DEFAULT_IO_THREADS: usize = 1;

/// Builder for configuring and creating a [`Bridge`].
pub struct BridgeBuilder {
    config: BridgeConfig,
    dispatcher: Dispatcher,
    catalog: Option<Box<dyn CatalogCollaborator>>,
    connector: Option<Box<dyn Connector>>,
    io_threads: usize,
}

impl BridgeBuilder {
    /// Create a builder with default config and the built-in actions.
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
            dispatcher: Dispatcher::with_builtins(),
            catalog: None,
            connector: None,
            io_threads: DEFAULT_IO_THREADS,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the controller endpoint.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.config.endpoint = endpoint;
        self
    }

    /// Use a custom connector instead of the configured endpoint.
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    /// Set the catalog collaborator. Defaults to an empty [`StaticCatalog`].
    pub fn catalog(mut self, catalog: impl CatalogCollaborator + 'static) -> Self {
        self.catalog = Some(Box::new(catalog));
        self
    }

    /// Register an action handler.
    pub fn handle<F>(mut self, action: &str, handler: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>, &[String]) -> HandlerResult + 'static,
    {
        self.dispatcher.register(action, handler);
        self
    }

    /// Set the bytes written per tick.
    ///
    /// Default: 8192
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    /// Set the ticks between inbound polls.
    ///
    /// Default: 5
    pub fn poll_interval_ticks(mut self, ticks: u32) -> Self {
        self.config.poll_interval_ticks = ticks;
        self
    }

    /// Set the path reported by `path`.
    pub fn module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.module_path = Some(path.into());
        self
    }

    /// Set the number of I/O worker threads.
    ///
    /// Default: 1
    pub fn io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Start the I/O side and return the bridge.
    ///
    /// Must not be called from inside a tokio runtime.
    pub fn build(self) -> Result<Bridge> {
        self.config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.io_threads)
            .thread_name("tickwire-io")
            .enable_all()
            .build()?;

        let connector = self
            .connector
            .unwrap_or_else(|| self.config.endpoint.connector());
        let transport = Transport::new(connector, self.config.transport_config());
        let endpoint = transport.describe();

        let (inbound_tx, inbound) = inbound_queue();
        let manager = ConnectionManager::spawn(
            transport,
            self.config.retry_policy(),
            inbound_tx,
            runtime.handle(),
        );

        let catalog = self
            .catalog
            .unwrap_or_else(|| Box::new(StaticCatalog::default()));
        let session = Session::new(&self.config, catalog);

        let mut scheduler = TickScheduler::new();
        install_poll(&mut scheduler, self.dispatcher, inbound);

        tracing::info!(%endpoint, "bridge started");

        Ok(Bridge {
            runtime: Some(runtime),
            manager,
            scheduler,
            session,
            config: self.config,
        })
    }
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running bridge.
///
/// Not `Send`: it stays on the host thread that built it.
pub struct Bridge {
    runtime: Option<Runtime>,
    manager: ManagerHandle,
    scheduler: TickScheduler<Session>,
    session: Session,
    config: BridgeConfig,
}

impl Bridge {
    /// Create a new bridge builder.
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Run one host tick: poll, pump and retry as due.
    pub fn tick(&mut self) {
        self.scheduler.advance(&mut self.session);
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.scheduler.now()
    }

    /// Connection state published by the manager.
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// State and retry attempt published by the manager.
    pub fn manager_status(&self) -> ManagerStatus {
        self.manager.status()
    }

    /// Whether the host has processed a live connection.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Reset the retry tier on the next successful connect.
    pub fn begin_new_session(&self) {
        self.manager.begin_new_session();
    }

    /// Host-side session state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The host-side scheduler, for registering host callbacks.
    pub fn scheduler(&mut self) -> &mut TickScheduler<Session> {
        &mut self.scheduler
    }

    /// The configuration the bridge was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Disconnect and stop the I/O side.
    ///
    /// Finishes the response in flight, bounded by the write timeout, then
    /// sends `SHUTDOWN` to the controller if connected and waits for the
    /// manager and the runtime, each bounded by the shutdown timeout. If the
    /// response could not be finished the channel is closed without
    /// `SHUTDOWN`. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        let timeout = self.config.shutdown_timeout();

        if let Some(link) = self.session.link() {
            tracing::info!(connection = %link.id(), "shutting down bridge");
        }

        // SHUTDOWN must not land inside a half-written response frame
        let announce = self.session.finish_write();
        runtime.block_on(self.manager.shutdown_with(timeout, announce));
        self.session.close();
        runtime.shutdown_timeout(timeout);
        tracing::info!("bridge stopped");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.connection_state())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
