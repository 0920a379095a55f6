use serde::{Deserialize, Serialize};

/// Controller / HTTP surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// HTTP bind address for the Request Facade, webhook ingress and
    /// metadata service.
    #[serde(default = "default_bind")]
    pub bind_address: String,

    /// Secret used to sign/verify admin JWTs and instance bootstrap tokens.
    pub jwt_secret: String,

    /// Whether the Pool Manager is allowed to install/uninstall webhooks on
    /// the forge (§4.2 `InstallWebhook`/`UninstallWebhook`).
    #[serde(default = "default_true")]
    pub webhook_management_enabled: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind(),
            jwt_secret: String::new(),
            webhook_management_enabled: default_true(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:9997".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_controller_config() {
        let c = ControllerConfig::default();
        assert_eq!(c.bind_address, "0.0.0.0:9997");
        assert!(c.webhook_management_enabled);
    }
}
