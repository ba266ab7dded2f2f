//! # mcp-bridge
//!
//! Transport bridge connecting a long-lived host editor process to an
//! external MCP tool server.
//!
//! The bridge maintains a reliable, message-framed channel over one of two
//! mutually exclusive carriers:
//!
//! - **Stdio**: a local loopback socket bridge speaking 8-byte length-prefixed
//!   frames, with a one-line `FRAMING=1` capability handshake.
//! - **Http**: a persistent WebSocket channel to a remote hub.
//!
//! On top of the carriers sit the [`manager::TransportManager`] (at most one
//! active transport, all start/stop funnelled through it) and the
//! [`reload::ReloadCoordinator`], which parks the stdio transport across the
//! host's teardown/rebuild boundary so the peer sees "reloading", not "gone".
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_bridge::{
//!     BridgeConfig, JsonFileStore, PortAllocator, ReloadCoordinator,
//!     StdioTransportClient, TransportManager, TransportMode,
//! };
//!
//! #[tokio::main]
//! async fn main() -> mcp_bridge::Result<()> {
//!     let store = Arc::new(JsonFileStore::open("bridge-prefs.json")?);
//!     let config = BridgeConfig::default();
//!
//!     let allocator = PortAllocator::new(config.host.clone(), store.clone());
//!     let port = allocator.set_preferred_port(6500).await?;
//!
//!     let factory_config = config.clone();
//!     let manager = Arc::new(TransportManager::new(Box::new(move |mode| {
//!         match mode {
//!             TransportMode::Stdio => {
//!                 Arc::new(StdioTransportClient::new(factory_config.clone(), port))
//!             }
//!             TransportMode::Http => unimplemented!(),
//!         }
//!     })));
//!
//!     manager.start(TransportMode::Stdio).await;
//!     let report = manager.verify().await;
//!     println!("{}", report.message);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod manager;
pub mod port;
pub mod probe;
pub mod protocol;
pub mod reload;
pub mod store;
pub mod transport;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use heartbeat::{FileHeartbeatWriter, HeartbeatRecord, HeartbeatStatus, HeartbeatWriter};
pub use manager::{TransportFactory, TransportManager};
pub use port::PortAllocator;
pub use probe::VerificationReport;
pub use reload::{ExternalListener, ReloadCoordinator};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
pub use transport::{
    HttpTransportClient, PayloadDispatcher, StdioTransportClient, TransportClient, TransportMode,
    TransportState,
};
