//! C8 — the config overlay (base agent config merged with monitor overrides) and C11 — locating
//! the config/catalog file and parsing it. Grounded in `config.py`'s `monitor_config` for the
//! merge/default semantics, including the "`log_file` is unconditionally overwritten" quirk the
//! source carries even though every other default is only injected when the key is absent.

use crate::compiler::CatalogDocument;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::ToSocketAddrs;
use tracing::warn;

fn default_collector() -> String {
    "null".to_owned()
}
fn default_interval() -> f64 {
    10.0
}
fn default_alert_master() -> String {
    "salt".to_owned()
}
fn default_alert_port() -> u16 {
    4507
}
fn default_log_file() -> String {
    "/var/log/probemon/monitor.log".to_owned()
}
fn default_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned())
}

/// The merged, typed configuration the daemon runs from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Retained for config-file compatibility only; collector discovery in this redesign is an
    /// in-process registry, not dynamic module loading (see REDESIGN FLAGS).
    #[serde(default)]
    pub collector_dirs: Vec<String>,
    #[serde(default = "default_collector")]
    pub collector: String,
    #[serde(default = "default_interval")]
    pub default_interval: f64,
    #[serde(default = "default_alert_master")]
    pub alert_master: String,
    #[serde(rename = "alert.port", default = "default_alert_port")]
    pub alert_port: u16,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_id")]
    pub id: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            collector_dirs: Vec::new(),
            collector: default_collector(),
            default_interval: default_interval(),
            alert_master: default_alert_master(),
            alert_port: default_alert_port(),
            log_file: default_log_file(),
            id: default_id(),
        }
    }
}

/// Resolves the monitor config/catalog file path: `$PROBEMON_CONFIG`, else the caller-supplied
/// path, else `./probemon.yaml`.
pub fn resolve_config_path(cli_path: Option<&str>) -> String {
    std::env::var("PROBEMON_CONFIG")
        .ok()
        .or_else(|| cli_path.map(str::to_owned))
        .unwrap_or_else(|| "probemon.yaml".to_owned())
}

fn merge_json(mut base: serde_json::Value, overlay: serde_json::Value) -> serde_json::Value {
    match (base.as_object_mut(), overlay.as_object()) {
        (Some(base_map), Some(overlay_map)) => {
            for (k, v) in overlay_map {
                base_map.insert(k.clone(), v.clone());
            }
            base
        }
        _ => overlay,
    }
}

/// Best-effort DNS resolution of `alert_master` when it isn't already an IP literal. Failure is
/// logged, not fatal — alerting is an optional ancillary feature.
fn resolve_alert_master(config: &mut MonitorConfig) {
    if config.alert_master.parse::<std::net::IpAddr>().is_ok() {
        return;
    }
    match format!("{}:0", config.alert_master).to_socket_addrs() {
        Ok(mut addrs) => {
            if let Some(addr) = addrs.next() {
                config.alert_master = addr.ip().to_string();
            }
        }
        Err(err) => {
            warn!(host = %config.alert_master, error = %err, "could not resolve alert_master, leaving as-is");
        }
    }
}

/// Merges a base agent config (owned by the embedding host) with the parsed monitor YAML
/// document, then extracts the typed [`MonitorConfig`]. `log_file` is always set to its default
/// regardless of what either input carries, matching the source's own unconditional-overwrite
/// behavior.
pub fn merge_monitor_config(
    base: serde_json::Value,
    monitor_yaml: serde_yaml::Value,
) -> Result<MonitorConfig, ConfigError> {
    let monitor_json: serde_json::Value = serde_json::to_value(monitor_yaml)
        .map_err(|e| ConfigError::Parse("monitor config".to_owned(), e.to_string()))?;
    let merged = merge_json(base, monitor_json);
    let mut config: MonitorConfig = serde_json::from_value(merged)
        .map_err(|e| ConfigError::Parse("monitor config".to_owned(), e.to_string()))?;
    config.log_file = default_log_file();
    resolve_alert_master(&mut config);
    Ok(config)
}

/// Reads and parses a YAML file at `path` into a generic value, for feeding into
/// [`merge_monitor_config`].
pub fn read_yaml_file(path: &str) -> Result<serde_yaml::Value, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_owned(), e.to_string()))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_owned(), e.to_string()))
}

/// Loads and validates the probe catalog from `path`. Rejects a missing or empty `monitor:`
/// sequence outright — the supervisor treats this as fatal.
pub fn load_catalog(path: &str) -> Result<CatalogDocument, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_owned(), e.to_string()))?;
    let doc: CatalogDocument =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_owned(), e.to_string()))?;
    if doc.monitor.is_empty() {
        return Err(ConfigError::EmptyCatalog);
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_config_path_prefers_env_var() {
        std::env::set_var("PROBEMON_CONFIG", "/tmp/from-env.yaml");
        assert_eq!(resolve_config_path(Some("/tmp/cli.yaml")), "/tmp/from-env.yaml");
        std::env::remove_var("PROBEMON_CONFIG");
        assert_eq!(resolve_config_path(Some("/tmp/cli.yaml")), "/tmp/cli.yaml");
        assert_eq!(resolve_config_path(None), "probemon.yaml");
    }

    #[test]
    fn defaults_are_injected_when_absent() {
        let base = serde_json::json!({});
        let monitor = serde_yaml::from_str("collector: log\n").unwrap();
        let config = merge_monitor_config(base, monitor).unwrap();
        assert_eq!(config.collector, "log");
        assert_eq!(config.alert_master, "salt");
        assert_eq!(config.alert_port, 4507);
        assert_eq!(config.log_file, "/var/log/probemon/monitor.log");
    }

    #[test]
    fn dotted_alert_port_key_is_deserialized() {
        let base = serde_json::json!({});
        let monitor = serde_yaml::from_str("alert.port: 1234\n").unwrap();
        let config = merge_monitor_config(base, monitor).unwrap();
        assert_eq!(config.alert_port, 1234);
    }

    #[test]
    fn log_file_is_always_overwritten() {
        let base = serde_json::json!({});
        let monitor = serde_yaml::from_str("log_file: /custom/path.log\n").unwrap();
        let config = merge_monitor_config(base, monitor).unwrap();
        assert_eq!(config.log_file, "/var/log/probemon/monitor.log");
    }

    #[test]
    fn base_config_values_survive_when_not_overridden() {
        let base = serde_json::json!({ "collector": "mongo" });
        let monitor = serde_yaml::from_str("default_interval: 5\n").unwrap();
        let config = merge_monitor_config(base, monitor).unwrap();
        assert_eq!(config.collector, "mongo");
        assert_eq!(config.default_interval, 5.0);
    }

    #[test]
    fn empty_catalog_is_rejected() {
        let dir = std::env::temp_dir().join("probemon_empty_catalog_test.yaml");
        std::fs::write(&dir, "monitor: []\n").unwrap();
        let err = load_catalog(dir.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCatalog));
        let _ = std::fs::remove_file(&dir);
    }
}
