//! HTTP server module
//!
//! Accepts chunk uploads and hands them to the relay.

pub mod http;

pub use http::RelayServer;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::relay::{ChunkRelay, HttpForwarder, RelaySettings};
    use std::sync::Arc;

    fn relay() -> Arc<ChunkRelay> {
        let forwarder = HttpForwarder::builder()
            .endpoint("http://127.0.0.1:9/upload")
            .build()
            .unwrap();
        Arc::new(ChunkRelay::new(RelaySettings::default(), Arc::new(forwarder)))
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config = ServerConfig {
            address: "127.0.0.1:0".into(),
            upload_path: "/api/uploads".into(),
        };
        let server = RelayServer::bind(&config, relay()).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        let config = ServerConfig {
            address: "invalid".into(),
            upload_path: "/api/uploads".into(),
        };
        let result = RelayServer::bind(&config, relay()).await;
        assert!(matches!(result, Err(ServerError::BindError(_))));
    }
}
