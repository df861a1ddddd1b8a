//! Chunk Relay Library
//!
//! Stateless relay for Resumable.js chunked uploads. Each inbound chunk is
//! decoded into a bounded buffer and forwarded to a remote storage endpoint
//! with its byte range (`Content-Range`) and upload identity
//! (`X-Unique-Upload-Id`), so large files never sit on the relay.
//!
//! # Features
//!
//! - **Stateless**: every request stands alone; retries and resumption are client-driven
//! - **Bounded memory**: at most one chunk per in-flight request, from a recycled buffer pool
//! - **Swappable backend**: anything implementing [`relay::ChunkSink`]
//!
//! # Example
//!
//! ```no_run
//! use chunk_relay::{config::Config, server::RelayServer, ChunkRelay};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let relay = Arc::new(ChunkRelay::from_config(&config)?);
//!     let server = RelayServer::bind(&config.server, relay).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod relay;
pub mod server;

#[cfg(feature = "tracing")]
pub mod tracing;

// Re-export commonly used types
pub use config::Config;
pub use relay::{ChunkReceipt, ChunkRelay, RelayError};
pub use server::RelayServer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
