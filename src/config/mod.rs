//! Configuration module for Chunk Relay
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and comprehensive validation.

use hyper::header::HeaderName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn is_valid_header_name(name: &str) -> bool {
    HeaderName::from_bytes(name.as_bytes()).is_ok()
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.upload_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "Upload path '{}' must start with '/'",
                self.server.upload_path
            )));
        }

        if self.relay.max_chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "relay.max_chunk_size must be greater than zero".into(),
            ));
        }

        if self.relay.file_field.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "relay.file_field cannot be empty".into(),
            ));
        }

        self.upstream.validate()?;

        // Validate tracing config if present
        if let Some(ref tracing) = self.tracing {
            if tracing.enabled {
                if !is_valid_http_url(&tracing.otlp.endpoint) {
                    return Err(ConfigError::ValidationError(
                        "Invalid OTLP endpoint: must start with http:// or https://".into(),
                    ));
                }

                if tracing.service_name.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "Service name cannot be empty when tracing is enabled".into(),
                    ));
                }

                match tracing.otlp.protocol.as_str() {
                    "grpc" | "http/protobuf" => {}
                    _ => {
                        return Err(ConfigError::ValidationError(format!(
                            "Invalid OTLP protocol '{}': must be 'grpc' or 'http/protobuf'",
                            tracing.otlp.protocol
                        )))
                    }
                }
            }
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    /// Path accepting chunk uploads (POST)
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
}

fn default_upload_path() -> String {
    "/api/uploads".to_string()
}

/// Inbound chunk handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Hard ceiling on the decoded size of a single chunk, in bytes
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    /// Multipart part carrying the chunk bytes in the inbound request
    #[serde(default = "default_file_field")]
    pub file_field: String,
    #[serde(default)]
    pub buffer_pool: BufferPoolConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            file_field: default_file_field(),
            buffer_pool: BufferPoolConfig::default(),
        }
    }
}

fn default_max_chunk_size() -> usize {
    100_000_000 // 100MB
}

fn default_file_field() -> String {
    "file".to_string()
}

/// Chunk buffer reuse configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Maximum number of idle buffers kept for reuse
    #[serde(default = "default_max_idle_buffers")]
    pub max_idle_buffers: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_buffers: default_max_idle_buffers(),
        }
    }
}

fn default_max_idle_buffers() -> usize {
    4
}

/// Remote storage endpoint configuration
///
/// Everything here is deployment policy. Clients only control chunk framing;
/// the destination and its form parameters never come from the request.
///
/// # Example
///
/// ```yaml
/// upstream:
///   endpoint: "https://api.cloudinary.com/v1_1/${CLOUD_NAME}/video/upload"
///   fields:
///     upload_preset: "${UPLOAD_PRESET}"
///     public_id: "video.mp4"
///   timeout_seconds: 60
///   retry:
///     max_retries: 2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub endpoint: String,
    /// Multipart part name for the file bytes in the outbound request
    #[serde(default = "default_file_field")]
    pub file_field: String,
    #[serde(default = "default_range_header")]
    pub range_header: String,
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    /// Fixed text parts appended to every outbound request
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl UpstreamConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.endpoint) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid upstream endpoint '{}': must start with http:// or https://",
                self.endpoint
            )));
        }

        if self.file_field.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "upstream.file_field cannot be empty".into(),
            ));
        }

        for header in [&self.range_header, &self.identity_header] {
            if !is_valid_header_name(header) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid header name '{}'",
                    header
                )));
            }
        }

        if self.timeout_seconds == 0 || self.connect_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "Upstream timeouts must be greater than zero".into(),
            ));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::ValidationError(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms, self.retry.max_backoff_ms
            )));
        }

        Ok(())
    }

    /// Bound on a single forwarding attempt
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

fn default_range_header() -> String {
    "Content-Range".to_string()
}

fn default_identity_header() -> String {
    "X-Unique-Upload-Id".to_string()
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

/// Backoff for transient transport failures
///
/// Remote rejections and timeouts are never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Disable retries entirely
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), doubling up to the cap
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(32);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2000
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

// ============================================================================
// Tracing Configuration
// ============================================================================

/// OpenTelemetry distributed tracing configuration.
///
/// Only takes effect when the crate is built with the `tracing` feature.
///
/// # Example
///
/// ```yaml
/// tracing:
///   enabled: true
///   service_name: "chunk-relay"
///   otlp:
///     endpoint: "http://localhost:4317"
///     protocol: "grpc"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Enable or disable tracing. Default: false
    #[serde(default)]
    pub enabled: bool,

    /// Service name for trace identification. Default: "chunk-relay"
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub otlp: OtlpConfig,
}

fn default_service_name() -> String {
    "chunk-relay".to_string()
}

/// OTLP exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpConfig {
    /// OTLP collector endpoint URL. Must start with http:// or https://
    pub endpoint: String,

    /// Protocol to use: "grpc" or "http/protobuf". Default: "grpc"
    #[serde(default = "default_otlp_protocol")]
    pub protocol: String,
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            protocol: default_otlp_protocol(),
        }
    }
}

fn default_otlp_protocol() -> String {
    "grpc".to_string()
}
