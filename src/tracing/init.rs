//! OpenTelemetry tracer provider lifecycle
//!
//! Spans are batched and exported over OTLP, using gRPC (tonic) or
//! HTTP/protobuf depending on `tracing.otlp.protocol`.

use crate::config::TracingConfig;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{self as sdktrace, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use thiserror::Error;

/// Errors that can occur during tracing initialization
#[derive(Error, Debug)]
pub enum TracingError {
    #[error("Invalid OTLP endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Failed to initialize tracer provider: {0}")]
    ProviderError(String),
}

/// Flushes and shuts down the global tracer provider when dropped
#[derive(Debug)]
pub struct TracingGuard {
    tracer: Option<Tracer>,
}

impl TracingGuard {
    pub fn is_active(&self) -> bool {
        self.tracer.is_some()
    }

    /// Tracer for the OpenTelemetry layer, `None` when tracing is disabled
    pub fn tracer(&self) -> Option<Tracer> {
        self.tracer.clone()
    }

    /// Export pending spans and shut the provider down now
    pub fn shutdown(mut self) {
        if self.tracer.take().is_some() {
            global::shutdown_tracer_provider();
        }
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if self.tracer.take().is_some() {
            global::shutdown_tracer_provider();
        }
    }
}

/// Install a global OTLP tracer provider tagged with the configured service name.
///
/// Returns an inactive guard when tracing is disabled.
pub fn init_tracing(config: &TracingConfig) -> Result<TracingGuard, TracingError> {
    if !config.enabled {
        return Ok(TracingGuard { tracer: None });
    }

    let endpoint = &config.otlp.endpoint;
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(TracingError::InvalidEndpoint(format!(
            "Endpoint must start with http:// or https://, got: {}",
            endpoint
        )));
    }

    let resource = Resource::new(vec![KeyValue::new(
        "service.name",
        config.service_name.clone(),
    )]);
    let pipeline = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(sdktrace::config().with_resource(resource));

    // install_batch registers the provider globally
    let tracer = match config.otlp.protocol.as_str() {
        "http/protobuf" => pipeline
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .http()
                    .with_endpoint(endpoint.clone()),
            )
            .install_batch(runtime::Tokio),
        _ => pipeline
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.clone()),
            )
            .install_batch(runtime::Tokio),
    }
    .map_err(|e| TracingError::ProviderError(e.to_string()))?;

    tracing::debug!(
        service = %config.service_name,
        endpoint = %endpoint,
        protocol = %config.otlp.protocol,
        "OTLP span exporter installed"
    );

    Ok(TracingGuard {
        tracer: Some(tracer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OtlpConfig;

    fn config(enabled: bool, endpoint: &str) -> TracingConfig {
        TracingConfig {
            enabled,
            service_name: "chunk-relay-test".into(),
            otlp: OtlpConfig {
                endpoint: endpoint.into(),
                protocol: "grpc".into(),
            },
        }
    }

    #[test]
    fn test_disabled_returns_inactive_guard() {
        let guard = init_tracing(&config(false, "")).unwrap();
        assert!(!guard.is_active());
        assert!(guard.tracer().is_none());
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let err = init_tracing(&config(true, "localhost:4317")).unwrap_err();
        assert!(matches!(err, TracingError::InvalidEndpoint(_)));
    }

    // The batch processor runs on the tokio runtime; a current-thread
    // runtime would block on flush.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_enabled_installs_exporter() {
        let guard = init_tracing(&config(true, "http://localhost:4317")).unwrap();
        assert!(guard.is_active());
        assert!(guard.tracer().is_some());
        guard.shutdown();
    }
}
