use serde::{Deserialize, Serialize};

/// Logging/tracing configuration (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. "info,garm_runtime=debug".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON-formatted log lines instead of human-readable ones.
    #[serde(default)]
    pub json_format: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_format: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_observability_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(!config.json_format);
    }

    #[test]
    fn parse_observability_config() {
        let toml = r#"
            log_level = "debug"
            json_format = true
        "#;
        let config: ObservabilityConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert!(config.json_format);
    }
}
