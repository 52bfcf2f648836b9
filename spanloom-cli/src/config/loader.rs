use super::types::{
    CorrelationConfig, ExportConfig, GcConfig, RawCorrelationConfig, RawExportConfig, RawGcConfig,
    RawReceiverConfig, RawSpanloomConfig, ReceiverConfig, SpanloomConfig,
};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Environment variable overriding `export.api_key`
pub const API_KEY_ENV: &str = "SPANLOOM_API_KEY";
/// Environment variable overriding the project config directory
pub const PROJECT_CONFIG_DIR_ENV: &str = "SPANLOOM_PROJECT_CONFIG_DIR";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project + environment)
    pub fn load() -> Result<SpanloomConfig> {
        let mut raw = RawSpanloomConfig::default();

        // Layer 1: User config
        if let Some(user_path) = Self::user_config_path()
            && user_path.exists()
        {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        // Layer 3: Credential from the environment
        let raw = Self::apply_api_key(raw, std::env::var(API_KEY_ENV).ok());

        Ok(Self::finalize(raw))
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "spanloom").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with SPANLOOM_PROJECT_CONFIG_DIR (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        match std::env::var(PROJECT_CONFIG_DIR_ENV) {
            Ok(dir) => PathBuf::from(dir).join("config.toml"),
            Err(_) => PathBuf::from(".spanloom/config.toml"),
        }
    }

    fn read_raw(path: &Path) -> Result<RawSpanloomConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// A non-empty environment credential replaces the file one.
    fn apply_api_key(mut raw: RawSpanloomConfig, env_key: Option<String>) -> RawSpanloomConfig {
        if let Some(key) = env_key.filter(|k| !k.trim().is_empty()) {
            raw.export.api_key = Some(key);
        }
        raw
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawSpanloomConfig, overlay: RawSpanloomConfig) -> RawSpanloomConfig {
        RawSpanloomConfig {
            export: RawExportConfig {
                endpoint: overlay.export.endpoint.or(base.export.endpoint),
                destination: overlay.export.destination.or(base.export.destination),
                api_key: overlay.export.api_key.or(base.export.api_key),
                console: overlay.export.console.or(base.export.console),
            },
            receiver: RawReceiverConfig {
                socket_path: overlay.receiver.socket_path.or(base.receiver.socket_path),
                tcp_port: overlay.receiver.tcp_port.or(base.receiver.tcp_port),
            },
            gc: RawGcConfig {
                sweep_interval_secs: overlay.gc.sweep_interval_secs.or(base.gc.sweep_interval_secs),
                tool_ttl_secs: overlay.gc.tool_ttl_secs.or(base.gc.tool_ttl_secs),
                handoff_ttl_secs: overlay.gc.handoff_ttl_secs.or(base.gc.handoff_ttl_secs),
                unit_ttl_secs: overlay.gc.unit_ttl_secs.or(base.gc.unit_ttl_secs),
            },
            correlation: RawCorrelationConfig {
                order: overlay.correlation.order.or(base.correlation.order),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawSpanloomConfig) -> SpanloomConfig {
        let export = ExportConfig::default();
        let receiver = ReceiverConfig::default();
        let gc = GcConfig::default();
        let correlation = CorrelationConfig::default();

        SpanloomConfig {
            export: ExportConfig {
                endpoint: raw.export.endpoint.unwrap_or(export.endpoint),
                destination: raw.export.destination.unwrap_or(export.destination),
                api_key: raw.export.api_key,
                console: raw.export.console.unwrap_or(export.console),
            },
            receiver: ReceiverConfig {
                socket_path: raw.receiver.socket_path.unwrap_or(receiver.socket_path),
                tcp_port: raw.receiver.tcp_port.unwrap_or(receiver.tcp_port),
            },
            gc: GcConfig {
                sweep_interval_secs: raw.gc.sweep_interval_secs.unwrap_or(gc.sweep_interval_secs),
                tool_ttl_secs: raw.gc.tool_ttl_secs.unwrap_or(gc.tool_ttl_secs),
                handoff_ttl_secs: raw.gc.handoff_ttl_secs.unwrap_or(gc.handoff_ttl_secs),
                unit_ttl_secs: raw.gc.unit_ttl_secs.unwrap_or(gc.unit_ttl_secs),
            },
            correlation: CorrelationConfig {
                order: raw
                    .correlation
                    .order
                    .filter(|order| !order.is_empty())
                    .unwrap_or(correlation.order),
            },
        }
    }

    /// Load a single config file over the defaults (for testing)
    #[cfg(test)]
    pub fn load_from_path(path: &Path) -> Result<SpanloomConfig> {
        if path.exists() {
            Ok(Self::finalize(Self::read_raw(path)?))
        } else {
            Ok(SpanloomConfig::default())
        }
    }
}
