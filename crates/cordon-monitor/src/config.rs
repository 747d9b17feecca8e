//! Environment-driven monitor configuration.
//!
//! Two knobs: where session logs live, and whether the optional metrics
//! endpoint is enabled (and on which port). The metrics transport itself is
//! a collaborator's concern; only the configuration surface lives here.

use std::path::PathBuf;

/// Overrides the session log directory.
pub const LOG_DIR_ENV: &str = "CORDON_MONITOR_LOG_DIR";
/// Truthy ("1", "true", "yes", "on") to enable the metrics endpoint.
pub const METRICS_ENABLED_ENV: &str = "CORDON_METRICS_ENABLED";
/// Port for the metrics endpoint when enabled.
pub const METRICS_PORT_ENV: &str = "CORDON_METRICS_PORT";

pub const DEFAULT_METRICS_PORT: u16 = 9109;

/// Alert records produced by collaborators live beside the session logs,
/// in one append-only file following the same JSON-per-line rules.
pub const ALERTS_FILE_NAME: &str = "alerts.jsonl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub log_dir: PathBuf,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let log_dir = std::env::var_os(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_log_dir);
        let metrics_enabled = std::env::var(METRICS_ENABLED_ENV)
            .map(|v| bool_from_env(&v))
            .unwrap_or(false);
        let metrics_port = std::env::var(METRICS_PORT_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_METRICS_PORT);
        Self {
            log_dir,
            metrics_enabled,
            metrics_port,
        }
    }
}

fn default_log_dir() -> PathBuf {
    std::env::temp_dir().join("cordon-monitor")
}

fn bool_from_env(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_strings() {
        for v in ["1", "true", "TRUE", "yes", "on", "On"] {
            assert!(bool_from_env(v), "{v}");
        }
        for v in ["0", "false", "no", "off", "", "2"] {
            assert!(!bool_from_env(v), "{v}");
        }
    }

    #[test]
    fn defaults_without_env() {
        // Uses the fixed default port; the endpoint stays disabled unless
        // explicitly switched on.
        assert_eq!(DEFAULT_METRICS_PORT, 9109);
        let dir = default_log_dir();
        assert!(dir.ends_with("cordon-monitor"));
    }
}
