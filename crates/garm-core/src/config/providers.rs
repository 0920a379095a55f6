use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One entry in `[[providers]]` — a named external provider binary (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDefinition {
    /// Provider name, referenced by `Pool::provider_name`.
    pub name: String,

    /// Path to the provider executable implementing the command set in §6.
    pub executable_path: String,

    /// Optional path to a provider-specific config file, passed through on
    /// the bootstrap payload.
    #[serde(default)]
    pub config_file: Option<String>,

    /// Environment variables passed to the provider process verbatim.
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_provider_definition() {
        let toml = r#"
            name = "mock"
            executable_path = "/usr/local/bin/garm-provider-mock"
        "#;
        let def: ProviderDefinition = toml::from_str(toml).unwrap();
        assert_eq!(def.name, "mock");
        assert!(def.config_file.is_none());
    }
}
