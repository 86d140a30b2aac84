//! Telemetry configuration from environment variables.

use std::env;

/// Default log filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default Prometheus scrape port.
pub const DEFAULT_METRICS_PORT: u16 = 2112;

/// Configuration for logging and the metrics endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to log lines.
    pub service_name: String,

    /// Log filter directive (trace, debug, info, warn, error, or an
    /// `EnvFilter` expression).
    pub log_level: String,

    /// Emit JSON formatted logs.
    pub json_logs: bool,

    /// Port serving `/metrics`.
    pub metrics_port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "krill".to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `KRILL_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `KRILL_JSON_LOGS`: Enable JSON logs (default: false)
    /// - `KRILL_METRICS_PORT`: Prometheus metrics port (default: 2112)
    pub fn from_env() -> Self {
        Self::resolve(DEFAULT_LOG_LEVEL, DEFAULT_METRICS_PORT)
    }

    /// Environment values layered over the configuration file's values.
    pub fn resolve(file_log_level: &str, file_metrics_port: u16) -> Self {
        Self::from_lookup(|key| env::var(key).ok(), file_log_level, file_metrics_port)
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        file_log_level: &str,
        file_metrics_port: u16,
    ) -> Self {
        Self {
            service_name: "krill".to_string(),

            log_level: lookup("KRILL_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| file_log_level.to_string()),

            json_logs: lookup("KRILL_JSON_LOGS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),

            metrics_port: lookup("KRILL_METRICS_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(file_metrics_port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "krill");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.metrics_port, 2112);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_file_values_used_without_env() {
        let config = TelemetryConfig::from_lookup(lookup(&[]), "debug", 9000);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.metrics_port, 9000);
    }

    #[test]
    fn test_env_overrides_file() {
        let config = TelemetryConfig::from_lookup(
            lookup(&[
                ("KRILL_LOG_LEVEL", "warn"),
                ("RUST_LOG", "trace"),
                ("KRILL_JSON_LOGS", "TRUE"),
                ("KRILL_METRICS_PORT", "9100"),
            ]),
            "debug",
            9000,
        );
        assert_eq!(config.log_level, "warn");
        assert!(config.json_logs);
        assert_eq!(config.metrics_port, 9100);
    }

    #[test]
    fn test_rust_log_fallback_and_bad_port() {
        let config = TelemetryConfig::from_lookup(
            lookup(&[("RUST_LOG", "krill_core=trace"), ("KRILL_METRICS_PORT", "http")]),
            "info",
            2112,
        );
        assert_eq!(config.log_level, "krill_core=trace");
        assert_eq!(config.metrics_port, 2112);
    }
}
