//! garm - self-hosted CI runner fleet controller.
//!
//! Single binary that provides:
//! - The Request Facade (admin CRUD, webhook ingress, instance metadata)
//! - The Controller, owning one Pool Manager per forge entity

use std::sync::Arc;

use garm_core::config::GarmConfig;
use garm_core::error::{Error, Result};
use garm_runtime::migrations::{load_migrations_from_dir, MigrationRunner};
use garm_runtime::{AuthConfig, Controller, GatewayConfig, GatewayServer, PgStore};

/// The running garm process.
pub struct Garm {
    config: GarmConfig,
    /// Path to operator-supplied migrations directory.
    migrations_dir: std::path::PathBuf,
}

impl Garm {
    /// Create a new builder for configuring garm.
    pub fn builder() -> GarmBuilder {
        GarmBuilder::new()
    }

    /// Get the configuration.
    pub fn config(&self) -> &GarmConfig {
        &self.config
    }

    /// Run the controller and HTTP surface (blocks until shutdown).
    pub async fn run(self) -> Result<()> {
        tracing::info!("garm starting");

        let store = PgStore::connect(&self.config.database).await?;
        tracing::info!("connected to database");

        let runner = MigrationRunner::new(store.pool().clone());
        let user_migrations = if self.migrations_dir.exists() {
            load_migrations_from_dir(&self.migrations_dir)?
        } else {
            Vec::new()
        };
        runner.run(user_migrations).await?;
        tracing::info!("migrations complete");

        let store: Arc<dyn garm_core::store::StoreGateway> = Arc::new(store);
        let controller = Controller::new(store.clone(), self.config.clone());
        controller.boot().await?;
        tracing::info!("controller booted, pool managers running");

        let gateway_config = GatewayConfig {
            bind_address: self.config.controller.bind_address.clone(),
            auth: AuthConfig::with_secret(self.config.controller.jwt_secret.clone()),
            instance_jwt_secret: self.config.controller.jwt_secret.clone(),
            ..GatewayConfig::default()
        };
        let gateway = GatewayServer::new(gateway_config, store, controller);

        let addr = gateway.addr();
        tracing::info!("gateway listening on {}", addr);

        tokio::select! {
            result = gateway.run() => {
                if let Err(e) = result {
                    tracing::error!("gateway server error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received shutdown signal");
            }
        }

        tracing::info!("garm stopped");
        Ok(())
    }
}

/// Builder for configuring the garm runtime.
pub struct GarmBuilder {
    config: Option<GarmConfig>,
    migrations_dir: std::path::PathBuf,
}

impl GarmBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            migrations_dir: std::path::PathBuf::from("migrations"),
        }
    }

    /// Set the directory to load operator-supplied migrations from.
    pub fn migrations_dir(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.migrations_dir = path.into();
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: GarmConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the garm runtime.
    pub fn build(self) -> Result<Garm> {
        let config = self.config.ok_or_else(|| Error::BadRequest("configuration is required".to_string()))?;
        Ok(Garm { config, migrations_dir: self.migrations_dir })
    }
}

impl Default for GarmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garm_builder_requires_config() {
        let builder = GarmBuilder::new();
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_garm_builder_with_config() {
        let mut config = GarmConfig::parse_toml(
            r#"
            [controller]
            jwt_secret = "s3cret"

            [database]
            url = "postgres://localhost/garm"
        "#,
        )
        .unwrap();
        config.controller.bind_address = "127.0.0.1:9997".to_string();
        let result = GarmBuilder::new().config(config).build();
        assert!(result.is_ok());
    }
}
