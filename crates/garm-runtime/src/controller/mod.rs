//! Entity -> manager registry (§4.1 "Controller"). Owns exactly one
//! [`PoolManager`] per forge entity and is the only place that creates or
//! tears one down, guarded by a single mutex per §5's "controller mutex".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use garm_core::config::GarmConfig;
use garm_core::domain::{ForgeEndpoint, ForgeEntity, ForgeKind};
use garm_core::forge::ForgeClient;
use garm_core::provider::ProviderAdapter;
use garm_core::store::StoreGateway;
use garm_core::webhook::WorkflowJobPayload;
use garm_core::{Error, Result};

use crate::forge::{GiteaForgeClient, GithubForgeClient};
use crate::pool_manager::{PoolManager, PoolManagerConfig};
use crate::provider::ProcessProvider;

/// Bounded time given to each manager's startup during `boot()` (§4.1).
/// A manager that can't stand up within this window is logged and skipped
/// rather than blocking every other entity.
const BOOT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Controller {
    store: Arc<dyn StoreGateway>,
    config: GarmConfig,
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    managers: Mutex<HashMap<Uuid, Arc<PoolManager>>>,
}

impl Controller {
    pub fn new(store: Arc<dyn StoreGateway>, config: GarmConfig) -> Arc<Self> {
        let providers = config
            .providers
            .iter()
            .map(|def| {
                let adapter: Arc<dyn ProviderAdapter> = Arc::new(ProcessProvider::new(def.clone()));
                (def.name.clone(), adapter)
            })
            .collect();

        Arc::new(Self {
            store,
            config,
            providers,
            managers: Mutex::new(HashMap::new()),
        })
    }

    /// Starts a manager for every entity already in the store, each bounded
    /// by [`BOOT_TIMEOUT`]; a single slow/broken entity never blocks the
    /// rest from coming up.
    pub async fn boot(self: &Arc<Self>) -> Result<()> {
        let entities = self.store.list_entities().await?;
        let handles: Vec<_> = entities
            .into_iter()
            .map(|entity| {
                let controller = self.clone();
                let entity_id = entity.id;
                tokio::spawn(async move {
                    match tokio::time::timeout(BOOT_TIMEOUT, controller.create_pool_manager(entity_id)).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => tracing::warn!(entity_id = %entity_id, error = %e, "failed to start pool manager at boot"),
                        Err(_) => tracing::warn!(entity_id = %entity_id, "pool manager startup timed out at boot"),
                    }
                })
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    pub async fn create_pool_manager(self: &Arc<Self>, entity_id: Uuid) -> Result<Arc<PoolManager>> {
        let mut managers = self.managers.lock().await;
        if let Some(existing) = managers.get(&entity_id) {
            return Ok(existing.clone());
        }

        let entity = self.store.get_entity(entity_id).await?;
        let endpoint = self.store.get_endpoint(&entity.endpoint_name).await?;
        let forge = self.build_forge_client(&entity, &endpoint).await?;

        let manager_config = PoolManagerConfig {
            defaults: self.config.defaults.clone(),
            jwt_secret: self.config.controller.jwt_secret.clone(),
            instance_token_ttl_secs: self.config.defaults.runner_bootstrap_timeout_secs as i64,
            provisioning_concurrency: 10,
        };

        let manager = PoolManager::new(entity, endpoint, self.store.clone(), forge, self.providers.clone(), manager_config);
        manager.start()?;
        managers.insert(entity_id, manager.clone());
        Ok(manager)
    }

    pub async fn get_pool_manager(&self, entity_id: Uuid) -> Result<Arc<PoolManager>> {
        self.managers
            .lock()
            .await
            .get(&entity_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no pool manager running for entity {entity_id}")))
    }

    pub async fn delete_pool_manager(&self, entity_id: Uuid) -> Result<()> {
        let manager = self.managers.lock().await.remove(&entity_id);
        if let Some(manager) = manager {
            manager.stop().await;
        }
        Ok(())
    }

    /// Routes a validated webhook payload to the owning entity's manager
    /// (§4.5). Silently drops payloads for entities with no running
    /// manager rather than erroring the webhook ingress endpoint.
    pub async fn dispatch(&self, payload: &WorkflowJobPayload) -> Result<()> {
        let (_, _, _, endpoint_name) = payload.dispatch_key();
        let entity_kind = payload.entity_kind();
        let entities = self.store.list_entities().await?;
        let target = entities
            .into_iter()
            .find(|e| e.endpoint_name == endpoint_name && e.entity == entity_kind);

        let Some(entity) = target else {
            tracing::debug!(endpoint = %endpoint_name, "webhook payload for unknown entity, dropped");
            return Ok(());
        };

        match self.get_pool_manager(entity.id).await {
            Ok(manager) => manager.handle_workflow_job(payload).await,
            Err(_) => {
                tracing::debug!(entity_id = %entity.id, "webhook payload for entity with no running manager, dropped");
                Ok(())
            }
        }
    }

    async fn build_forge_client(&self, entity: &ForgeEntity, endpoint: &ForgeEndpoint) -> Result<Arc<dyn ForgeClient>> {
        let credentials = self
            .store
            .list_credentials()
            .await?
            .into_iter()
            .find(|c| c.name == entity.credentials_name)
            .ok_or_else(|| Error::NotFound(format!("credentials '{}' not found", entity.credentials_name)))?;

        let client: Arc<dyn ForgeClient> = match endpoint.kind {
            ForgeKind::Github => Arc::new(GithubForgeClient::new(endpoint.base_url.clone(), credentials.secret)),
            ForgeKind::Gitea => Arc::new(GiteaForgeClient::new(endpoint.base_url.clone(), credentials.secret)?),
        };
        Ok(client)
    }
}
