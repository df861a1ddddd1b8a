//! HTTP front end for the chunk relay
//!
//! A plain hyper HTTP/1.1 accept loop. Each connection runs in its own task and
//! every request is handed to the shared [`ChunkRelay`].
//!
//! # Routes
//!
//! * `POST {upload_path}` - relay one chunk (`200` with an empty body on success)
//! * `GET /health` - liveness probe
//! * any other method on the upload path - `405` with `Allow: POST`
//! * everything else - `404`
//!
//! # Example
//!
//! ```no_run
//! use chunk_relay::config::ConfigLoader;
//! use chunk_relay::relay::ChunkRelay;
//! use chunk_relay::server::RelayServer;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load("config.yaml")?;
//! let relay = Arc::new(ChunkRelay::from_config(&config)?);
//! let server = RelayServer::bind(&config.server, relay).await?;
//! println!("Listening on {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::ServerConfig;
use crate::relay::{ChunkRelay, ChunkUploadRequest};
use crate::server::ServerError;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, Instrument};

/// Per-connection shared state
struct AppState {
    relay: Arc<ChunkRelay>,
    upload_path: String,
}

/// HTTP server relaying chunk uploads
pub struct RelayServer {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl RelayServer {
    /// Bind the listener immediately. Port 0 lets the OS pick a port.
    pub async fn bind(config: &ServerConfig, relay: Arc<ChunkRelay>) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address {}: {}", config.address, e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!(address = %local_addr, upload_path = %config.upload_path, "Relay server bound");

        Ok(Self {
            state: Arc::new(AppState {
                relay,
                upload_path: config.upload_path.clone(),
            }),
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the process exits
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves.
    ///
    /// Stops accepting new connections; requests already in flight finish in
    /// their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Relay server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(route(req, &state).await) }
                });

                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    error!(peer = %peer_addr, error = %e, "Error serving connection");
                }
            });
        }
    }
}

async fn route(req: Request<Incoming>, state: &AppState) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if path == state.upload_path {
        if method != Method::POST {
            let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed".into());
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("POST"));
            return response;
        }

        let span = tracing::info_span!(
            "http.request",
            http.method = %method,
            http.target = %path,
            otel.kind = "server",
        );
        return upload(req, &state.relay).instrument(span).await;
    }

    match (method, path.as_str()) {
        (Method::GET, "/health") => text(StatusCode::OK, "ok".into()),
        _ => text(StatusCode::NOT_FOUND, "Not Found".into()),
    }
}

async fn upload(req: Request<Incoming>, relay: &ChunkRelay) -> Response<Full<Bytes>> {
    let headers = req.headers();
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let query = req.uri().query().map(str::to_string);

    let request = ChunkUploadRequest {
        query,
        content_type,
        content_length,
        body: req.into_body().into_data_stream(),
    };

    match relay.handle_chunk_upload(request).await {
        Ok(_) => text(StatusCode::OK, String::new()),
        Err(e) => text(e.status_code(), e.client_message()),
    }
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
