//! Layered subscriber setup
//!
//! ```text
//! Registry
//!   ├── OpenTelemetry layer (only when tracing is enabled)
//!   ├── EnvFilter (RUST_LOG, falling back to the CLI log level)
//!   └── Fmt layer (JSON to stdout)
//! ```

use crate::config::TracingConfig;
use crate::tracing::init::{init_tracing, TracingError, TracingGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber and return the tracer guard.
///
/// `default_level` applies when `RUST_LOG` is unset.
pub fn init_subscriber(
    config: &TracingConfig,
    default_level: &str,
) -> Result<TracingGuard, TracingError> {
    let guard = init_tracing(config)?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(true);

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    let installed = match guard.tracer() {
        Some(tracer) => tracing::subscriber::set_global_default(
            registry.with(tracing_opentelemetry::layer().with_tracer(tracer)),
        ),
        None => tracing::subscriber::set_global_default(registry),
    };
    installed.map_err(|e| {
        TracingError::ProviderError(format!("Failed to set global subscriber: {}", e))
    })?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_init_disabled() {
        let config = TracingConfig {
            enabled: false,
            service_name: "test".to_string(),
            otlp: Default::default(),
        };

        // A second global install in the same test binary fails; either outcome is fine
        let _ = init_subscriber(&config, "info");
    }
}
