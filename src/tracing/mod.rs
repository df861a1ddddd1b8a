//! OpenTelemetry integration (feature `tracing`)
//!
//! Installs an OTLP-exporting tracer provider tagged with the service name and a layered
//! subscriber that bridges `tracing` spans such as `relay.chunk` and
//! `relay.forward` into OpenTelemetry.
//!
//! # Example
//!
//! ```no_run
//! use chunk_relay::config::TracingConfig;
//! use chunk_relay::tracing::init_subscriber;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TracingConfig {
//!     enabled: true,
//!     service_name: "chunk-relay".to_string(),
//!     otlp: Default::default(),
//! };
//!
//! let _guard = init_subscriber(&config, "info")?;
//! // Spans are exported until the guard drops
//! # Ok(())
//! # }
//! ```

pub mod init;
pub mod subscriber;

pub use init::{init_tracing, TracingError, TracingGuard};
pub use subscriber::init_subscriber;
