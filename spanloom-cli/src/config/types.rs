use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spanloom_core::engine::{HANDOFF_TTL, SWEEP_INTERVAL, TOOL_EXECUTION_TTL, UNIT_TTL};
use spanloom_core::{CorrelationPolicy, DelegationSignal, HookReceiverConfig, TtlPolicy};
use spanloom_observe::{ExportTarget, TracerConfig};

/// Default OTLP/gRPC collector endpoint
pub const DEFAULT_ENDPOINT: &str = "http://localhost:4317";
/// Default destination, reported as `service.name`
pub const DEFAULT_DESTINATION: &str = "spanloom";

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSpanloomConfig {
    #[serde(default)]
    pub export: RawExportConfig,

    #[serde(default)]
    pub receiver: RawReceiverConfig,

    #[serde(default)]
    pub gc: RawGcConfig,

    #[serde(default)]
    pub correlation: RawCorrelationConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawExportConfig {
    pub endpoint: Option<String>,
    pub destination: Option<String>,
    pub api_key: Option<String>,
    pub console: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawReceiverConfig {
    pub socket_path: Option<PathBuf>,
    pub tcp_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawGcConfig {
    pub sweep_interval_secs: Option<u64>,
    pub tool_ttl_secs: Option<u64>,
    pub handoff_ttl_secs: Option<u64>,
    pub unit_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawCorrelationConfig {
    pub order: Option<Vec<DelegationSignal>>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpanloomConfig {
    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub receiver: ReceiverConfig,

    #[serde(default)]
    pub gc: GcConfig,

    #[serde(default)]
    pub correlation: CorrelationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// OTLP/gRPC endpoint
    pub endpoint: String,

    /// Destination identifier (`service.name`)
    pub destination: String,

    /// Export credential; never written back out
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,

    /// Print spans to stdout instead of exporting
    pub console: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            destination: DEFAULT_DESTINATION.to_string(),
            api_key: None,
            console: false,
        }
    }
}

impl ExportConfig {
    /// Tracer provider settings. Console output wins over OTLP; OTLP without
    /// a credential is disabled.
    pub fn tracer_config(&self) -> TracerConfig {
        if self.console {
            TracerConfig {
                destination: self.destination.clone(),
                target: ExportTarget::Console,
                ..TracerConfig::default()
            }
        } else {
            TracerConfig::otlp(&self.endpoint, &self.destination, self.api_key.clone())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub socket_path: PathBuf,
    pub tcp_port: u16,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        let defaults = HookReceiverConfig::default();
        Self {
            socket_path: defaults.socket_path,
            tcp_port: defaults.tcp_port,
        }
    }
}

impl From<&ReceiverConfig> for HookReceiverConfig {
    fn from(config: &ReceiverConfig) -> Self {
        HookReceiverConfig {
            socket_path: config.socket_path.clone(),
            tcp_port: config.tcp_port,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    pub sweep_interval_secs: u64,
    pub tool_ttl_secs: u64,
    pub handoff_ttl_secs: u64,
    pub unit_ttl_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: SWEEP_INTERVAL.as_secs(),
            tool_ttl_secs: TOOL_EXECUTION_TTL.as_secs(),
            handoff_ttl_secs: HANDOFF_TTL.as_secs(),
            unit_ttl_secs: UNIT_TTL.as_secs(),
        }
    }
}

impl GcConfig {
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            tool_execution: Duration::from_secs(self.tool_ttl_secs),
            handoff: Duration::from_secs(self.handoff_ttl_secs),
            unit: Duration::from_secs(self.unit_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Delegation signals, tried in order
    pub order: Vec<DelegationSignal>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            order: CorrelationPolicy::default().order,
        }
    }
}

impl CorrelationConfig {
    pub fn policy(&self) -> CorrelationPolicy {
        CorrelationPolicy {
            order: self.order.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = SpanloomConfig::default();
        assert_eq!(config.export.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.export.destination, "spanloom");
        assert!(config.export.api_key.is_none());
        assert!(!config.export.console);
        assert_eq!(config.receiver.tcp_port, 7745);
        assert_eq!(config.gc.ttl_policy(), TtlPolicy::default());
        assert_eq!(config.correlation.policy(), CorrelationPolicy::default());
    }

    #[test]
    fn test_toml_round_trip_skips_api_key() {
        let config = SpanloomConfig {
            export: ExportConfig {
                api_key: Some("secret".to_string()),
                destination: "team-traces".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let toml_str = toml::to_string(&config).unwrap();
        assert!(!toml_str.contains("secret"));

        let parsed: SpanloomConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.export.destination, "team-traces");
        assert!(parsed.export.api_key.is_none());
    }

    #[test]
    fn test_raw_config_partial_parsing() {
        let toml_str = r#"
[gc]
unit_ttl_secs = 600

[correlation]
order = ["title_pattern"]
"#;
        let raw: RawSpanloomConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(raw.gc.unit_ttl_secs, Some(600));
        assert!(raw.gc.tool_ttl_secs.is_none());
        assert!(raw.export.endpoint.is_none());
        assert_eq!(
            raw.correlation.order,
            Some(vec![DelegationSignal::TitlePattern])
        );
    }

    #[test]
    fn test_raw_config_empty_uses_none() {
        let raw: RawSpanloomConfig = toml::from_str("").unwrap();
        assert!(raw.export.api_key.is_none());
        assert!(raw.receiver.socket_path.is_none());
        assert!(raw.correlation.order.is_none());
    }

    #[test]
    fn test_tracer_config_requires_credential() {
        let export = ExportConfig::default();
        assert!(!export.tracer_config().export_enabled());

        let export = ExportConfig {
            api_key: Some("k".to_string()),
            ..Default::default()
        };
        assert_eq!(
            export.tracer_config().target,
            ExportTarget::Otlp {
                endpoint: DEFAULT_ENDPOINT.to_string()
            }
        );

        let export = ExportConfig {
            console: true,
            ..Default::default()
        };
        assert_eq!(export.tracer_config().target, ExportTarget::Console);
    }

    #[test]
    fn test_zero_sweep_interval_is_clamped() {
        let gc = GcConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(gc.ttl_policy().sweep_interval, Duration::from_secs(1));
    }
}
