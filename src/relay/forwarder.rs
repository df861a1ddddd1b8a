//! Upstream forwarding
//!
//! [`ChunkSink`] is the seam between the relay and the storage backend.
//! [`HttpForwarder`] re-encodes each chunk as a multipart POST carrying the
//! byte range and upload identity as headers.
//!
//! # Example
//!
//! ```no_run
//! use chunk_relay::relay::forwarder::{ChunkSink, HttpForwarder};
//! use chunk_relay::relay::{ByteRange, ChunkPayload};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let forwarder = HttpForwarder::builder()
//!     .endpoint("https://storage.example.com/upload")
//!     .field("upload_preset", "chunks")
//!     .connect_timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! let payload = ChunkPayload {
//!     data: bytes::Bytes::from_static(b"hello"),
//!     content_type: None,
//!     file_name: Some("hello.txt".into()),
//! };
//! forwarder
//!     .submit_chunk("upload-1", ByteRange { start: 0, end: 4 }, 5, &payload)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use super::{ByteRange, ChunkPayload};
use crate::config::UpstreamConfig;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Longest slice of a rejection body kept for diagnostics
const MAX_DIAGNOSTIC_BODY: usize = 512;

/// Outcome of one failed forwarding attempt
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("upstream responded with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("invalid forwarder configuration: {0}")]
    Config(String),
}

impl ForwardError {
    /// Failures worth retrying: the chunk never reached the remote endpoint
    pub fn is_transient(&self) -> bool {
        matches!(self, ForwardError::Transport(_))
    }

    /// Classify a failed `send()`.
    ///
    /// Connect failures, including connect timeouts, come first: no request
    /// bytes were written, so they stay retryable.
    fn from_send(err: reqwest::Error) -> Self {
        if err.is_connect() {
            ForwardError::Transport(error_chain(&err))
        } else if err.is_timeout() {
            ForwardError::Timeout
        } else if err.is_builder() {
            ForwardError::Config(error_chain(&err))
        } else {
            ForwardError::Transport(error_chain(&err))
        }
    }
}

/// Render an error with its `source()` chain, outermost first
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Destination for relayed chunks
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Deliver one chunk. A single attempt; retries belong to the caller.
    async fn submit_chunk(
        &self,
        identifier: &str,
        range: ByteRange,
        total_size: u64,
        payload: &ChunkPayload,
    ) -> Result<(), ForwardError>;
}

/// Builder for [`HttpForwarder`]
#[derive(Debug, Default)]
pub struct HttpForwarderBuilder {
    endpoint: Option<String>,
    file_field: Option<String>,
    range_header: Option<String>,
    identity_header: Option<String>,
    fields: BTreeMap<String, String>,
    connect_timeout: Option<Duration>,
}

impl HttpForwarderBuilder {
    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    /// Part name for the file bytes (default `file`)
    pub fn file_field(mut self, name: &str) -> Self {
        self.file_field = Some(name.to_string());
        self
    }

    /// Header carrying `bytes {start}-{end}/{total}` (default `Content-Range`)
    pub fn range_header(mut self, name: &str) -> Self {
        self.range_header = Some(name.to_string());
        self
    }

    /// Header carrying the upload identifier (default `X-Unique-Upload-Id`)
    pub fn identity_header(mut self, name: &str) -> Self {
        self.identity_header = Some(name.to_string());
        self
    }

    /// Add a fixed text part to every outbound request
    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<HttpForwarder, ForwardError> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| ForwardError::Config("endpoint is required".into()))?;

        let mut client = reqwest::Client::builder();
        if let Some(timeout) = self.connect_timeout {
            client = client.connect_timeout(timeout);
        }
        let client = client
            .build()
            .map_err(|e| ForwardError::Config(e.to_string()))?;

        Ok(HttpForwarder {
            client,
            endpoint,
            file_field: self.file_field.unwrap_or_else(|| "file".into()),
            range_header: self.range_header.unwrap_or_else(|| "Content-Range".into()),
            identity_header: self
                .identity_header
                .unwrap_or_else(|| "X-Unique-Upload-Id".into()),
            fields: self.fields,
        })
    }
}

/// Forwards chunks to a remote endpoint as `multipart/form-data` POSTs
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    endpoint: String,
    file_field: String,
    range_header: String,
    identity_header: String,
    fields: BTreeMap<String, String>,
}

impl HttpForwarder {
    pub fn builder() -> HttpForwarderBuilder {
        HttpForwarderBuilder::default()
    }

    /// Build a forwarder from the `upstream` configuration section
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, ForwardError> {
        let mut builder = Self::builder()
            .endpoint(&config.endpoint)
            .file_field(&config.file_field)
            .range_header(&config.range_header)
            .identity_header(&config.identity_header)
            .connect_timeout(config.connect_timeout());
        for (name, value) in &config.fields {
            builder = builder.field(name, value);
        }
        builder.build()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn form(&self, payload: &ChunkPayload) -> Result<Form, ForwardError> {
        let mut part = Part::stream_with_length(
            reqwest::Body::from(payload.data.clone()),
            payload.data.len() as u64,
        )
        .file_name(
            payload
                .file_name
                .clone()
                .unwrap_or_else(|| "blob".to_string()),
        );

        if let Some(content_type) = &payload.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| ForwardError::Config(format!("invalid part content type: {}", e)))?;
        }

        let mut form = Form::new().part(self.file_field.clone(), part);
        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }
        Ok(form)
    }
}

#[async_trait]
impl ChunkSink for HttpForwarder {
    #[tracing::instrument(
        name = "relay.forward",
        skip(self, payload),
        fields(
            upstream.endpoint = %self.endpoint,
            upload.identifier = %identifier,
            upload.range = %range,
            upload.bytes = payload.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn submit_chunk(
        &self,
        identifier: &str,
        range: ByteRange,
        total_size: u64,
        payload: &ChunkPayload,
    ) -> Result<(), ForwardError> {
        let form = self.form(payload)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(self.range_header.as_str(), range.content_range(total_size))
            .header(self.identity_header.as_str(), identifier)
            .multipart(form)
            .send()
            .await
            .map_err(ForwardError::from_send)?;

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        if status.is_success() {
            tracing::debug!(status = status.as_u16(), "Upstream accepted chunk");
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_DIAGNOSTIC_BODY {
            let mut cut = MAX_DIAGNOSTIC_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        Err(ForwardError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
