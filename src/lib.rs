//! # dx-ghost - GhostText bridge for local editors
//!
//! Lets a browser text area be edited in a local editor. The browser
//! extension asks the status endpoint where the WebSocket listener is,
//! connects, and from then on both sides exchange the full text whenever it
//! changes.
//!
//! ## Pieces
//!
//! - [`server::BridgeServer`]: status responder + WebSocket listener
//! - [`session::SyncSession`]: one per connection, owns one editor buffer
//! - [`buffer::BufferProvider`]: the editor side (scratch files + external
//!   editor, or in-memory documents for embedding and tests)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dx_ghost::{BridgeServer, Config, ScratchFileProvider};
//!
//! #[tokio::main]
//! async fn main() -> dx_ghost::Result<()> {
//!     let config = Config::default();
//!     let provider = Arc::new(ScratchFileProvider::new(config.editor.clone()));
//!     let server = BridgeServer::bind(&config, provider).await?;
//!     println!("socket port: {}", server.socket_addr().port());
//!     server.run().await
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;

// Re-export main types for library consumers
pub use buffer::{BufferProvider, MemoryBufferProvider, NotifyOrdering, ScratchFileProvider};
pub use config::{CliOverrides, Config, EditorCommand};
pub use error::{BridgeError, Result};
pub use server::BridgeServer;
pub use session::{SessionOptions, SyncSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
