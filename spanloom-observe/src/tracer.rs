//! Tracer provider setup and export configuration.
//!
//! This module provides:
//! - OpenTelemetry tracer provider construction for each export target
//! - The `TracingGuard` that owns the provider and flushes it on shutdown
//! - Credential gating: without an API key nothing leaves the process

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use serde::{Deserialize, Serialize};
use tonic::metadata::{MetadataMap, MetadataValue};

/// Instrumentation scope name used for every span the engine produces.
pub const INSTRUMENTATION_SCOPE: &str = "spanloom";

/// Export target for traces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportTarget {
    /// Print finished spans to stdout (development).
    Console,
    /// Export via OTLP/gRPC to a collector or vendor endpoint.
    Otlp { endpoint: String },
    /// Keep spans in-process and drop them (export disabled).
    Disabled,
}

/// Configuration for the tracer provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerConfig {
    /// Destination identifier, reported as the `service.name` resource.
    pub destination: String,
    /// Service version for spans.
    pub service_version: String,
    /// Export credential. OTLP export is only enabled when this is set.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Where finished spans go.
    pub target: ExportTarget,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            destination: "spanloom".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            api_key: None,
            target: ExportTarget::Console,
        }
    }
}

impl TracerConfig {
    /// Build a config for an OTLP endpoint.
    ///
    /// The target falls back to [`ExportTarget::Disabled`] when no credential
    /// is supplied.
    pub fn otlp(
        endpoint: impl Into<String>,
        destination: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let target = if api_key.is_some() {
            ExportTarget::Otlp {
                endpoint: endpoint.into(),
            }
        } else {
            ExportTarget::Disabled
        };
        Self {
            destination: destination.into(),
            api_key,
            target,
            ..Default::default()
        }
    }

    /// Whether spans will actually leave the process.
    pub fn export_enabled(&self) -> bool {
        !matches!(self.target, ExportTarget::Disabled)
    }
}

/// Error type for tracer initialization.
#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    /// The exporter could not be constructed.
    #[error("failed to build span exporter: {0}")]
    Exporter(String),

    /// The credential cannot be sent as gRPC metadata.
    #[error("invalid export credential: {0}")]
    InvalidCredential(String),
}

/// Guard that owns the tracer provider and shuts it down when dropped.
///
/// Shutting down flushes every span still buffered in the batch processor,
/// so the guard must outlive the final engine sweep.
pub struct TracingGuard {
    provider: Option<TracerProvider>,
}

impl TracingGuard {
    /// Wrap an already-built provider.
    pub fn new(provider: TracerProvider) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    /// Get a tracer bound to the spanloom instrumentation scope.
    ///
    /// Returns `None` once the guard has been shut down.
    pub fn tracer(&self) -> Option<Tracer> {
        self.provider
            .as_ref()
            .map(|provider| provider.tracer(INSTRUMENTATION_SCOPE))
    }

    /// Shutdown the provider and flush pending spans.
    pub fn shutdown(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            tracing::warn!("failed to shutdown tracer provider: {e}");
        }
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build the tracer provider described by `config`.
///
/// OTLP export uses a batch processor on the tokio runtime, so span export is
/// fire-and-forget: failures are logged by the SDK and never reach the caller.
/// Must be called from within a tokio runtime when the target is OTLP.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or the credential is not
/// valid header material.
pub fn build_provider(config: &TracerConfig) -> Result<TracingGuard, TracerError> {
    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.destination.clone()),
        KeyValue::new("service.version", config.service_version.clone()),
    ]);

    let builder = TracerProvider::builder().with_resource(resource);

    let provider = match &config.target {
        ExportTarget::Console => builder
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build(),
        ExportTarget::Otlp { endpoint } => {
            let metadata = auth_metadata(config.api_key.as_deref())?;
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.clone())
                .with_metadata(metadata)
                .build()
                .map_err(|e| TracerError::Exporter(e.to_string()))?;
            builder
                .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                .build()
        }
        ExportTarget::Disabled => builder.build(),
    };

    tracing::info!(
        destination = %config.destination,
        enabled = config.export_enabled(),
        "tracer provider ready"
    );

    Ok(TracingGuard::new(provider))
}

fn auth_metadata(api_key: Option<&str>) -> Result<MetadataMap, TracerError> {
    let mut metadata = MetadataMap::new();
    if let Some(key) = api_key {
        let value: MetadataValue<_> = format!("Bearer {key}")
            .parse()
            .map_err(|e: tonic::metadata::errors::InvalidMetadataValue| {
                TracerError::InvalidCredential(e.to_string())
            })?;
        metadata.insert("authorization", value);
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracer_config_has_sensible_defaults() {
        let config = TracerConfig::default();

        assert_eq!(config.destination, "spanloom");
        assert!(!config.service_version.is_empty());
        assert!(config.api_key.is_none());
        assert_eq!(config.target, ExportTarget::Console);
    }

    #[test]
    fn otlp_without_credential_is_disabled() {
        let config = TracerConfig::otlp("http://localhost:4317", "team-traces", None);
        assert_eq!(config.target, ExportTarget::Disabled);
        assert!(!config.export_enabled());
    }

    #[test]
    fn otlp_with_credential_is_enabled() {
        let config = TracerConfig::otlp(
            "http://localhost:4317",
            "team-traces",
            Some("secret".to_string()),
        );
        assert_eq!(
            config.target,
            ExportTarget::Otlp {
                endpoint: "http://localhost:4317".to_string()
            }
        );
        assert!(config.export_enabled());
    }

    #[test]
    fn api_key_is_not_serialized() {
        let config = TracerConfig::otlp("http://collector:4317", "d", Some("secret".to_string()));
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn auth_metadata_rejects_control_characters() {
        let result = auth_metadata(Some("bad\nkey"));
        assert!(matches!(result, Err(TracerError::InvalidCredential(_))));
    }

    #[test]
    fn auth_metadata_sets_bearer_header() {
        let metadata = auth_metadata(Some("abc")).unwrap();
        assert_eq!(
            metadata.get("authorization").unwrap().to_str().unwrap(),
            "Bearer abc"
        );
    }

    #[test]
    fn disabled_provider_still_hands_out_tracers() {
        let config = TracerConfig {
            target: ExportTarget::Disabled,
            ..Default::default()
        };
        let mut guard = build_provider(&config).expect("disabled provider should build");
        assert!(guard.tracer().is_some());
        guard.shutdown();
        assert!(guard.tracer().is_none());
    }
}
