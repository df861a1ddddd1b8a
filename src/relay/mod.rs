//! Chunked upload relay
//!
//! Accepts one Resumable.js chunk per request and forwards it to the remote
//! storage endpoint with its reconstructed byte range. Each request is
//! self-contained: no state is kept between chunks of the same upload.
//!
//! ```text
//! query ──► ChunkDescriptor ──► ByteRange
//! body  ──► BoundedDecoder  ──► ChunkPayload ──► ChunkSink ──► ChunkReceipt
//! ```

pub mod buffer;
pub mod decoder;
pub mod descriptor;
pub mod forwarder;
pub mod range;

pub use buffer::BufferPool;
pub use decoder::{BoundedDecoder, ChunkPayload};
pub use descriptor::ChunkDescriptor;
pub use forwarder::{ChunkSink, ForwardError, HttpForwarder};
pub use range::ByteRange;

use crate::config::{Config, RetryConfig};
use crate::metrics;
use bytes::Bytes;
use futures::Stream;
use hyper::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Relay errors, one per externally visible failure class
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Malformed chunk request: {0}")]
    MalformedRequest(String),

    #[error("Chunk exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("Malformed chunk payload: {0}")]
    MalformedPayload(String),

    #[error("Upstream rejected chunk{}: {message}", status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    UpstreamRejected { status: Option<u16>, message: String },

    #[error("Upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),
}

impl RelayError {
    /// HTTP status reported to the client
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MalformedRequest(_) | RelayError::MalformedPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::UpstreamRejected { .. } => StatusCode::BAD_GATEWAY,
            RelayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Message returned to the client. Upstream response bodies stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::UpstreamRejected { .. } => {
                "Upstream storage did not accept the chunk".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::MalformedRequest(_) => "malformed_request",
            RelayError::PayloadTooLarge { .. } => "payload_too_large",
            RelayError::MalformedPayload(_) => "malformed_payload",
            RelayError::UpstreamRejected { .. } => "upstream_rejected",
            RelayError::UpstreamTimeout(_) => "upstream_timeout",
        }
    }

    fn from_forward(err: ForwardError, timeout: Duration) -> Self {
        match err {
            ForwardError::Rejected { status, body } => RelayError::UpstreamRejected {
                status: Some(status),
                message: body,
            },
            ForwardError::Timeout => RelayError::UpstreamTimeout(timeout),
            ForwardError::Transport(message) | ForwardError::Config(message) => {
                RelayError::UpstreamRejected {
                    status: None,
                    message,
                }
            }
        }
    }
}

/// One inbound chunk-upload request, independent of the HTTP server
pub struct ChunkUploadRequest<S> {
    /// Raw URL query string
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: S,
}

/// Successful relay outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub upload_identifier: String,
    pub range: ByteRange,
    pub total_size: u64,
    pub bytes_forwarded: u64,
    /// Upstream attempts made, including the successful one
    pub attempts: u32,
}

/// Relay settings
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub max_chunk_size: usize,
    pub file_field: String,
    pub max_idle_buffers: usize,
    pub upstream_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_chunk_size: 100_000_000,
            file_field: "file".into(),
            max_idle_buffers: 4,
            upstream_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chunk_size: config.relay.max_chunk_size,
            file_field: config.relay.file_field.clone(),
            max_idle_buffers: config.relay.buffer_pool.max_idle_buffers,
            upstream_timeout: config.upstream.timeout(),
            retry: config.upstream.retry.clone(),
        }
    }
}

/// Relay orchestrator
///
/// Runs parse → range → decode → forward for one request. The first failure
/// ends the request; nothing is forwarded after it.
pub struct ChunkRelay {
    settings: RelaySettings,
    pool: BufferPool,
    sink: Arc<dyn ChunkSink>,
}

impl ChunkRelay {
    pub fn new(settings: RelaySettings, sink: Arc<dyn ChunkSink>) -> Self {
        let pool = BufferPool::new(settings.max_idle_buffers, settings.max_chunk_size);
        Self {
            settings,
            pool,
            sink,
        }
    }

    /// Build a relay forwarding over HTTP as described by `config`
    pub fn from_config(config: &Config) -> Result<Self, ForwardError> {
        let forwarder = HttpForwarder::from_config(&config.upstream)?;
        Ok(Self::new(
            RelaySettings::from_config(config),
            Arc::new(forwarder),
        ))
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Handle one chunk-upload request end to end
    #[tracing::instrument(
        name = "relay.chunk",
        skip(self, request),
        fields(
            relay.request_id = %uuid::Uuid::new_v4(),
            upload.identifier = tracing::field::Empty,
            upload.chunk_number = tracing::field::Empty,
            upload.range = tracing::field::Empty
        )
    )]
    pub async fn handle_chunk_upload<S, O, E>(
        &self,
        request: ChunkUploadRequest<S>,
    ) -> Result<ChunkReceipt, RelayError>
    where
        S: Stream<Item = Result<O, E>> + Send,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let start_time = Instant::now();
        let result = self.relay(request).await;
        let duration = start_time.elapsed();

        match &result {
            Ok(receipt) => {
                metrics::record_chunk_success(receipt.bytes_forwarded, duration.as_secs_f64());
                tracing::info!(
                    range = %receipt.range,
                    total_size = receipt.total_size,
                    bytes = receipt.bytes_forwarded,
                    attempts = receipt.attempts,
                    duration_ms = duration.as_millis(),
                    "Chunk relayed"
                );
            }
            Err(e) => {
                metrics::record_chunk_failure(e.kind(), duration.as_secs_f64());
                if e.status_code().is_server_error() {
                    tracing::error!(error = %e, duration_ms = duration.as_millis(), "Chunk relay failed");
                } else {
                    tracing::warn!(error = %e, "Chunk rejected");
                }
            }
        }

        result
    }

    async fn relay<S, O, E>(&self, request: ChunkUploadRequest<S>) -> Result<ChunkReceipt, RelayError>
    where
        S: Stream<Item = Result<O, E>> + Send,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let descriptor = ChunkDescriptor::from_query(request.query.as_deref())?;
        let range = ByteRange::for_chunk(&descriptor)?;

        let span = tracing::Span::current();
        span.record("upload.identifier", descriptor.upload_identifier.as_str());
        span.record("upload.chunk_number", descriptor.chunk_number);
        span.record("upload.range", tracing::field::display(&range));

        if descriptor.is_final_hint() {
            tracing::debug!("Chunk is shorter than nominal size, likely the last one");
        }

        let decoder = BoundedDecoder::new(
            &self.pool,
            self.settings.max_chunk_size,
            &self.settings.file_field,
        );
        let payload = decoder
            .decode(
                request.content_type.as_deref(),
                request.content_length,
                descriptor.actual_chunk_size,
                request.body,
            )
            .await?;

        if payload.len() as u64 != descriptor.actual_chunk_size {
            tracing::warn!(
                declared = descriptor.actual_chunk_size,
                received = payload.len(),
                "Chunk size differs from resumableCurrentChunkSize"
            );
        }

        let result = self.forward(&descriptor, range, &payload).await;
        let bytes_forwarded = payload.len() as u64;
        self.pool.recycle(payload.data);

        result.map(|attempts| ChunkReceipt {
            upload_identifier: descriptor.upload_identifier,
            range,
            total_size: descriptor.total_size,
            bytes_forwarded,
            attempts,
        })
    }

    /// Forward with a per-attempt timeout, retrying transport failures only
    async fn forward(
        &self,
        descriptor: &ChunkDescriptor,
        range: ByteRange,
        payload: &ChunkPayload,
    ) -> Result<u32, RelayError> {
        let timeout = self.settings.upstream_timeout;
        let retry = &self.settings.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let submitted = tokio::time::timeout(
                timeout,
                self.sink.submit_chunk(
                    &descriptor.upload_identifier,
                    range,
                    descriptor.total_size,
                    payload,
                ),
            )
            .await;

            let err = match submitted {
                Ok(Ok(())) => return Ok(attempt),
                Ok(Err(e)) => e,
                Err(_elapsed) => return Err(RelayError::UpstreamTimeout(timeout)),
            };

            if !err.is_transient() || attempt > retry.max_retries {
                return Err(RelayError::from_forward(err, timeout));
            }

            let delay = retry.backoff(attempt);
            metrics::record_upstream_retry();
            tracing::warn!(
                error = %err,
                attempt = attempt,
                delay_ms = delay.as_millis(),
                "Transient upstream failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
