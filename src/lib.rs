//! # tickwire
//!
//! Local IPC bridge between a single-threaded host application and an
//! external controller process.
//!
//! The host exposes a cooperative tick loop and must never block. The
//! controller sends text command batches over TCP or a pipe pair and reads
//! back possibly large text responses.
//!
//! ## Architecture
//!
//! - **I/O side** (tokio runtime): connection manager with tiered retry, one
//!   reader task per connection decoding `START_`/`END_OF_MESSAGE` frames
//! - **Host side** (the host's thread): [`Bridge::tick`] drains the inbound
//!   queue, dispatches commands and writes responses in bounded chunks
//!
//! ## Example
//!
//! ```ignore
//! use tickwire::{Bridge, StaticCatalog};
//!
//! let mut bridge = Bridge::builder()
//!     .catalog(StaticCatalog::default())
//!     .build()?;
//!
//! // From the host's tick callback:
//! bridge.tick();
//!
//! // On unload:
//! bridge.shutdown();
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod handler;
pub mod host;
pub mod inbound;
pub mod manager;
pub mod protocol;
pub mod scheduler;
pub mod transport;
pub mod writer;

mod bridge;

pub use bridge::{Bridge, BridgeBuilder};
pub use catalog::{CatalogCollaborator, CatalogItem, CatalogNode, StaticCatalog};
pub use config::BridgeConfig;
pub use error::{BridgeError, FramingError, Result};
pub use handler::{Dispatcher, RequestContext};
pub use transport::{ConnectionState, Endpoint};
