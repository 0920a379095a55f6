//! Per-entity control loop (§4.2). One [`PoolManager`] owns every pool and
//! scale set under one forge entity and drives `observed -> desired`
//! continuously through a fixed set of concurrent worker tasks, all honoring
//! a single shared [`CancellationToken`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use garm_core::auth::InstanceTokenClaims;
use garm_core::config::DefaultsConfig;
use garm_core::domain::{
    EntityStatus, EventLevel, ForgeEndpoint, ForgeEntity, Instance, InstanceEvent, InstanceParent,
    Pool, ProviderStatus, RunnerStatus, ScaleSet, WorkflowJobStatus,
};
use garm_core::forge::{ForgeClient, RunnerApplication, WebhookInfo};
use garm_core::provider::{CreateInstanceParams, ProviderAdapter};
use garm_core::store::StoreGateway;
use garm_core::webhook::WorkflowJobPayload;
use garm_core::{Error, Result};

use super::balancer::Balancer;
use super::queue::ProvisioningQueue;

/// Knobs threaded from [`garm_core::config::GarmConfig`] into every manager.
#[derive(Debug, Clone)]
pub struct PoolManagerConfig {
    pub defaults: DefaultsConfig,
    /// Signs the short-lived bootstrap tokens embedded in provider user-data
    /// (§4.6, §6).
    pub jwt_secret: String,
    pub instance_token_ttl_secs: i64,
    /// Concurrent provider calls allowed per manager (§4.2 worker task 7).
    pub provisioning_concurrency: usize,
}

/// A minimal shared view over `Pool`/`ScaleSet` fields the sweeper and
/// reaper only need by id, used so those two tasks don't duplicate logic
/// per parent kind.
struct SizingUnit {
    parent: InstanceParent,
    provider_name: String,
    bootstrap_timeout_secs: u64,
}

impl From<&Pool> for SizingUnit {
    fn from(p: &Pool) -> Self {
        Self {
            parent: InstanceParent::Pool(p.id),
            provider_name: p.provider_name.clone(),
            bootstrap_timeout_secs: p.runner_bootstrap_timeout_secs,
        }
    }
}

impl From<&ScaleSet> for SizingUnit {
    fn from(s: &ScaleSet) -> Self {
        Self {
            parent: InstanceParent::ScaleSet(s.id),
            provider_name: s.provider_name.clone(),
            bootstrap_timeout_secs: s.runner_bootstrap_timeout_secs,
        }
    }
}

pub struct PoolManager {
    entity_id: Uuid,
    entity: RwLock<ForgeEntity>,
    endpoint: ForgeEndpoint,
    store: Arc<dyn StoreGateway>,
    forge: Arc<dyn ForgeClient>,
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    config: PoolManagerConfig,

    cancellation: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    status: RwLock<EntityStatus>,

    balancer: Mutex<Balancer>,
    queue: ProvisioningQueue,
    consolidate_notify: Notify,

    unauthorized_backoff_until: RwLock<Option<DateTime<Utc>>>,
    tool_cache: RwLock<Option<(Vec<RunnerApplication>, DateTime<Utc>)>>,
}

impl PoolManager {
    pub fn new(
        entity: ForgeEntity,
        endpoint: ForgeEndpoint,
        store: Arc<dyn StoreGateway>,
        forge: Arc<dyn ForgeClient>,
        providers: HashMap<String, Arc<dyn ProviderAdapter>>,
        config: PoolManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            entity_id: entity.id,
            entity: RwLock::new(entity),
            endpoint,
            store,
            forge,
            providers,
            config: config.clone(),
            cancellation: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            status: RwLock::new(EntityStatus::default()),
            balancer: Mutex::new(Balancer::new()),
            queue: ProvisioningQueue::new(config.provisioning_concurrency),
            consolidate_notify: Notify::new(),
            unauthorized_backoff_until: RwLock::new(None),
            tool_cache: RwLock::new(None),
        })
    }

    pub fn id(&self) -> String {
        self.entity_id.to_string()
    }

    pub async fn status(&self) -> EntityStatus {
        self.status.read().await.clone()
    }

    async fn set_status(&self, is_running: bool, failure_reason: Option<String>) {
        let mut status = self.status.write().await;
        status.is_running = is_running;
        status.failure_reason = failure_reason;
    }

    /// Spawns every worker task. Failures here are the caller's
    /// responsibility to surface (Controller `CreatePoolManager`, §4.1).
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let tasks = vec![
            self.spawn_supervised(Self::run_consolidator),
            self.spawn_supervised(Self::run_sweeper),
            self.spawn_supervised(Self::run_reaper),
            self.spawn_supervised(Self::run_tool_refresher),
            self.spawn_supervised(Self::run_scale_set_sessions),
        ];

        let manager = self.clone();
        tokio::spawn(async move {
            manager.tasks.lock().await.extend(tasks);
            manager.set_status(true, None).await;
        });

        Ok(())
    }

    /// Every task body is re-spawned on panic until cancellation fires
    /// (§4.2 "restart-on-panic").
    fn spawn_supervised<F, Fut>(self: &Arc<Self>, task: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                if manager.cancellation.is_cancelled() {
                    return;
                }
                let handle = tokio::spawn(task(manager.clone()));
                if handle.await.is_ok() {
                    return;
                }
                tracing::warn!(entity_id = %manager.entity_id, "pool manager worker task panicked, restarting");
            }
        })
    }

    pub async fn stop(&self) {
        self.cancellation.cancel();
        let grace = Duration::from_secs(self.config.defaults.shutdown_grace_secs);
        let mut handles = self.tasks.lock().await;
        let _ = tokio::time::timeout(grace, futures_util::future::join_all(handles.drain(..))).await;
        self.set_status(false, None).await;
        self.running.store(false, Ordering::SeqCst);
    }

    pub async fn wait(&self) {
        let mut handles = self.tasks.lock().await;
        let _ = futures_util::future::join_all(handles.drain(..)).await;
    }

    fn provider_for(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no provider registered named '{name}'")))
    }

    async fn append_event(&self, instance_name: &str, kind: &str, level: EventLevel, message: impl Into<String>) {
        let event = InstanceEvent {
            id: Uuid::new_v4(),
            instance_name: instance_name.to_string(),
            kind: kind.to_string(),
            level,
            message: message.into(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.append_instance_event(event).await {
            tracing::warn!(instance = instance_name, error = %e, "failed to append instance event");
        }
    }

    fn mint_instance_token(&self, instance_name: &str) -> Result<String> {
        let claims = InstanceTokenClaims::new(instance_name, self.config.instance_token_ttl_secs);
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()))
            .map_err(|e| Error::Internal(format!("failed to mint instance token: {e}")))
    }

    // -- Public contract (§4.2) --

    pub async fn registration_token(&self) -> Result<garm_core::forge::RegistrationToken> {
        let entity = self.entity.read().await;
        self.forge.issue_registration_token(&entity.entity).await
    }

    pub async fn install_webhook(&self, callback_url: &str) -> Result<WebhookInfo> {
        let secret = {
            let mut entity = self.entity.write().await;
            match entity.webhook_secret.clone() {
                Some(secret) => secret,
                None => {
                    let generated = Uuid::new_v4().simple().to_string();
                    entity.webhook_secret = Some(generated.clone());
                    entity.updated_at = Utc::now();
                    self.store.update_entity(entity.clone()).await?;
                    generated
                }
            }
        };
        let entity = self.entity.read().await;
        self.forge.install_webhook(&entity.entity, callback_url, &secret).await
    }

    pub async fn get_webhook_info(&self) -> Result<Option<WebhookInfo>> {
        let entity = self.entity.read().await;
        self.forge.get_webhook_info(&entity.entity).await
    }

    pub async fn uninstall_webhook(&self) -> Result<()> {
        let entity = self.entity.read().await;
        self.forge.uninstall_webhook(&entity.entity).await
    }

    pub fn root_ca_bundle(&self) -> Option<Vec<u8>> {
        self.endpoint.ca_cert_bundle.clone()
    }

    /// Swaps the webhook secret in the in-memory snapshot and persists it;
    /// in-flight signature validations keep whatever secret they already
    /// captured (§9 "Webhook secret rotation").
    pub async fn rotate_webhook_secret(&self, new_secret: String) -> Result<()> {
        let mut entity = self.entity.write().await;
        entity.webhook_secret = Some(new_secret);
        entity.updated_at = Utc::now();
        self.store.update_entity(entity.clone()).await?;
        Ok(())
    }

    pub async fn force_delete_runner(self: &Arc<Self>, instance_name: &str) -> Result<()> {
        let mut instance = self.store.get_instance(instance_name).await?;
        instance.runner_status = RunnerStatus::Terminating;
        instance.updated_at = Utc::now();
        let instance = self.store.update_instance(instance).await?;
        self.append_event(instance_name, "force_delete", EventLevel::Warning, "force-deleted by operator").await;
        self.enqueue_teardown(instance);
        Ok(())
    }

    /// Synchronous validation + enqueue (§4.2 worker task 5). Always
    /// returns `Ok` for well-formed payloads, even while the manager is in
    /// unauthorized-backoff; only the routing action is suppressed then.
    pub async fn handle_workflow_job(self: &Arc<Self>, payload: &WorkflowJobPayload) -> Result<()> {
        let status = WorkflowJobStatus::from_action(&payload.action)
            .ok_or_else(|| Error::BadRequest(format!("unrecognized workflow_job action: {}", payload.action)))?;

        let job = garm_core::domain::Job {
            id: payload.workflow_job.id,
            run_id: payload.workflow_job.run_id,
            entity_id: self.entity_id,
            status,
            labels: payload.workflow_job.labels.clone(),
            runner_name: payload.workflow_job.runner_name.clone(),
            conclusion: payload.workflow_job.conclusion.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.upsert_job(job).await?;

        if self.in_unauthorized_backoff().await {
            return Ok(());
        }

        match status {
            WorkflowJobStatus::Queued => {
                self.route_queued_job(&payload.workflow_job.labels).await;
            }
            WorkflowJobStatus::InProgress => {
                self.assign_job_to_runner(payload.workflow_job.runner_name.as_deref(), payload.workflow_job.id).await;
            }
            WorkflowJobStatus::Completed => {
                self.complete_job_on_runner(payload.workflow_job.runner_name.as_deref()).await;
            }
        }
        Ok(())
    }

    async fn assign_job_to_runner(&self, runner_name: Option<&str>, job_id: i64) {
        let Some(name) = runner_name else { return };
        let Ok(mut instance) = self.store.get_instance(name).await else { return };
        instance.job_id = Some(job_id);
        instance.updated_at = Utc::now();
        let _ = self.store.update_instance(instance).await;
    }

    async fn complete_job_on_runner(self: &Arc<Self>, runner_name: Option<&str>) {
        let Some(name) = runner_name else { return };
        let Ok(mut instance) = self.store.get_instance(name).await else { return };
        instance.job_id = None;
        instance.updated_at = Utc::now();
        if instance.ephemeral && instance.runner_status == RunnerStatus::Active {
            instance.runner_status = RunnerStatus::Terminating;
            if let Ok(updated) = self.store.update_instance(instance).await {
                self.enqueue_teardown(updated);
            }
        } else {
            let _ = self.store.update_instance(instance).await;
        }
    }

    /// Picks which matching pool should absorb a queued job via the
    /// entity's balancer policy, then nudges the Consolidator. A label set
    /// matching no enabled pool, or matching several under `none` policy,
    /// leaves the job unrouted (§4.2 "Pool balancer policy").
    async fn route_queued_job(&self, labels: &std::collections::BTreeSet<String>) {
        if labels.is_empty() {
            return;
        }
        let Ok(pools) = self.store.list_pools(Some(self.entity_id)).await else { return };
        let mut busy_or_idle = HashMap::new();
        for pool in &pools {
            if let Ok(instances) = self.store.list_instances_for_pool(pool.id).await {
                busy_or_idle.insert(pool.id, instances.iter().filter(|i| i.is_busy_or_idle()).count() as u32);
            }
        }
        let policy = self.entity.read().await.pool_balancer_policy;
        let chosen = self.balancer.lock().await.select(policy, &pools, labels, &busy_or_idle).map(|p| p.id);
        if chosen.is_some() {
            self.consolidate_notify.notify_one();
        }
    }

    async fn in_unauthorized_backoff(&self) -> bool {
        match *self.unauthorized_backoff_until.read().await {
            Some(until) => Utc::now() < until,
            None => false,
        }
    }

    fn enqueue_teardown(self: &Arc<Self>, instance: Instance) {
        eprintln!("DEBUG enqueue_teardown");
        let manager = self.clone();
        let task_manager = manager.clone();
        manager.queue.spawn(async move {
            task_manager.teardown_instance(instance).await;
        });
    }

    async fn teardown_instance(&self, mut instance: Instance) {
        if let Some(provider_id) = instance.provider_id.clone() {
            if let Ok(provider) = self.provider_for(&instance.provider_name) {
                if let Err(e) = provider.delete_instance(&provider_id).await {
                    tracing::warn!(instance = %instance.name, error = %e, "provider delete_instance failed during teardown");
                    return;
                }
            }
        }
        instance.runner_status = RunnerStatus::Terminated;
        instance.provider_status = ProviderStatus::Deleted;
        instance.updated_at = Utc::now();
        if let Err(e) = self.store.update_instance(instance.clone()).await {
            tracing::warn!(instance = %instance.name, error = %e, "failed to record terminated instance");
        }
        self.append_event(&instance.name, "teardown", EventLevel::Info, "instance torn down").await;
    }

    // -- Worker task 1: Consolidator --

    async fn run_consolidator(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.defaults.consolidator_period_secs.max(1));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return,
                _ = interval.tick() => {}
                _ = self.consolidate_notify.notified() => {}
            }
            if let Err(e) = self.consolidate_once().await {
                tracing::warn!(entity_id = %self.entity_id, error = %e, "consolidator tick failed");
                self.set_status(true, Some(e.to_string())).await;
            } else {
                self.set_status(true, None).await;
            }
        }
    }

    async fn consolidate_once(self: &Arc<Self>) -> Result<()> {
        eprintln!("DEBUG consolidate_once called");
        let pools = self.store.list_pools(Some(self.entity_id)).await?;
        for pool in pools.into_iter().filter(|p| p.enabled) {
            let instances = self.store.list_instances_for_pool(pool.id).await?;
            let busy_or_idle = instances.iter().filter(|i| i.is_busy_or_idle()).count() as u32;
            let idle = instances.iter().filter(|i| i.is_idle()).count() as u32;

            let deficit = pool.min_idle_runners.saturating_sub(idle);
            let room = pool.max_runners.saturating_sub(busy_or_idle);
            let to_create = deficit.min(room);

            for _ in 0..to_create {
                self.create_pending_instance(&pool).await?;
            }
            if to_create > 0 {
                self.drain_pool(&pool, to_create).await?;
            }

            if idle > pool.min_idle_runners {
                self.retire_surplus_idle(&pool, &instances, idle - pool.min_idle_runners).await;
            }
        }
        Ok(())
    }

    async fn create_pending_instance(&self, pool: &Pool) -> Result<()> {
        let now = Utc::now();
        let instance = Instance {
            name: format!("garm-{}", Uuid::new_v4().simple()),
            parent: InstanceParent::Pool(pool.id),
            provider_id: None,
            provider_name: pool.provider_name.clone(),
            os_type: pool.os_type,
            os_arch: pool.os_arch,
            runner_status: RunnerStatus::Pending,
            provider_status: ProviderStatus::Pending,
            ephemeral: true,
            token_fetched: false,
            jit_config: HashMap::new(),
            agent_id: None,
            job_id: None,
            status_message: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_instance(instance).await?;
        Ok(())
    }

    /// Claims the rows just created (plus any left over from a prior tick)
    /// and hands each to the provisioning queue (§4.2 worker task 7).
    async fn drain_pool(self: &Arc<Self>, pool: &Pool, limit: u32) -> Result<()> {
        eprintln!("DEBUG drain_pool called limit={}", limit);
        let provider = self.provider_for(&pool.provider_name)?;
        let claimed = self.store.claim_instances_for_provisioning(pool.id, limit).await?;
        for instance in claimed {
            let manager = self.clone();
            let task_manager = manager.clone();
            let provider = provider.clone();
            let pool = pool.clone();
            manager.queue.spawn(async move {
                task_manager.provision_instance(instance, pool, provider).await;
            });
        }
        Ok(())
    }

    async fn provision_instance(&self, mut instance: Instance, pool: Pool, provider: Arc<dyn ProviderAdapter>) {
        eprintln!("DEBUG provision_instance called for {}", instance.name);
        let token = match self.mint_instance_token(&instance.name) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(instance = %instance.name, error = %e, "failed to mint instance token");
                return;
            }
        };
        let params = CreateInstanceParams {
            name: instance.name.clone(),
            pool_id: pool.id.to_string(),
            image: pool.image.clone(),
            flavor: pool.flavor.clone(),
            os_type: pool.os_type,
            os_arch: pool.os_arch,
            user_data: format!("GARM_INSTANCE_TOKEN={token}\n"),
            extra_spec: pool.extra_spec.clone(),
        };

        match provider.create_instance(params).await {
            Ok(provider_instance) => {
                instance.provider_id = Some(provider_instance.provider_id);
                instance.provider_status = ProviderStatus::Running;
                instance.updated_at = Utc::now();
                if let Err(e) = self.store.update_instance(instance.clone()).await {
                    tracing::warn!(instance = %instance.name, error = %e, "failed to record provisioned instance");
                    return;
                }
                self.append_event(&instance.name, "provision", EventLevel::Info, "instance created by provider").await;
            }
            Err(e) => {
                instance.runner_status = RunnerStatus::Failed;
                instance.status_message = Some(e.to_string());
                instance.updated_at = Utc::now();
                match self.store.update_instance(instance.clone()).await {
                    Ok(updated) => {
                        self.append_event(&updated.name, "provision", EventLevel::Error, format!("provider create failed: {e}")).await;
                    }
                    Err(store_err) => {
                        tracing::warn!(instance = %instance.name, error = %store_err, "failed to record failed instance");
                    }
                }
            }
        }
    }

    async fn retire_surplus_idle(&self, _pool: &Pool, instances: &[Instance], excess: u32) {
        let grace = Duration::from_secs(self.config.defaults.idle_grace_period_secs);
        let now = Utc::now();
        let mut surplus: Vec<&Instance> = instances.iter().filter(|i| i.is_idle()).collect();
        surplus.sort_by_key(|i| i.updated_at);

        for instance in surplus.into_iter().take(excess as usize) {
            let idle_for = now.signed_duration_since(instance.updated_at).to_std().unwrap_or_default();
            if idle_for < grace {
                continue;
            }
            let mut updated = instance.clone();
            updated.runner_status = RunnerStatus::Terminating;
            updated.updated_at = Utc::now();
            if let Ok(updated) = self.store.update_instance(updated).await {
                self.append_event(&updated.name, "retire", EventLevel::Info, "surplus idle runner retired").await;
            }
        }
    }

    // -- Worker task 2: Scale-down sweeper --

    async fn run_sweeper(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.defaults.sweeper_period_secs.max(1));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.sweep_once().await {
                tracing::warn!(entity_id = %self.entity_id, error = %e, "sweeper tick failed");
            }
        }
    }

    async fn sweep_once(self: &Arc<Self>) -> Result<()> {
        let pools = self.store.list_pools(Some(self.entity_id)).await?;
        for pool in &pools {
            let instances = self.store.list_instances_for_pool(pool.id).await?;
            self.sweep_unit(SizingUnit::from(pool), instances).await;
        }
        let scale_sets = self.store.list_scale_sets(Some(self.entity_id)).await?;
        for scale_set in &scale_sets {
            let instances = self.store.list_instances_for_scale_set(scale_set.id).await?;
            self.sweep_unit(SizingUnit::from(scale_set), instances).await;
        }
        Ok(())
    }

    async fn sweep_unit(self: &Arc<Self>, unit: SizingUnit, instances: Vec<Instance>) {
        let timeout = Duration::from_secs(unit.bootstrap_timeout_secs.max(1));
        let now = Utc::now();
        for instance in instances {
            if !matches!(instance.runner_status, RunnerStatus::Pending | RunnerStatus::Installing) {
                continue;
            }
            let age = now.signed_duration_since(instance.created_at).to_std().unwrap_or_default();
            if age < timeout {
                continue;
            }
            let mut updated = instance.clone();
            updated.runner_status = RunnerStatus::Failed;
            updated.status_message = Some(format!("bootstrap-timeout via provider '{}'", unit.provider_name));
            updated.updated_at = Utc::now();
            match self.store.update_instance(updated).await {
                Ok(updated) => {
                    self.append_event(&updated.name, "sweep", EventLevel::Warning, "bootstrap-timeout").await;
                    self.enqueue_teardown(updated);
                }
                Err(e) => tracing::warn!(
                    instance = %instance.name,
                    parent = ?unit.parent,
                    provider = %unit.provider_name,
                    error = %e,
                    "failed to mark bootstrap-timeout instance failed"
                ),
            }
        }
    }

    // -- Worker task 3: Reaper --

    async fn run_reaper(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.defaults.reaper_period_secs.max(1));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.reap_once().await {
                tracing::warn!(entity_id = %self.entity_id, error = %e, "reaper tick failed");
            }
        }
    }

    async fn reap_once(self: &Arc<Self>) -> Result<()> {
        let pools = self.store.list_pools(Some(self.entity_id)).await?;
        for pool in &pools {
            let provider = self.provider_for(&pool.provider_name)?;
            let instances = self.store.list_instances_for_pool(pool.id).await?;
            self.reap_against_provider(&provider, pool.id.to_string(), instances).await?;
        }

        let scale_sets = self.store.list_scale_sets(Some(self.entity_id)).await?;
        for scale_set in &scale_sets {
            let provider = self.provider_for(&scale_set.provider_name)?;
            let instances = self.store.list_instances_for_scale_set(scale_set.id).await?;
            self.reap_against_provider(&provider, scale_set.id.to_string(), instances).await?;
        }

        let entity = self.entity.read().await.clone();
        if let Ok(forge_runners) = self.forge.list_runners(&entity.entity).await {
            let mut backed_names = std::collections::HashSet::new();
            for pool in &pools {
                for instance in self.store.list_instances_for_pool(pool.id).await? {
                    backed_names.insert(instance.name);
                }
            }
            for scale_set in &scale_sets {
                for instance in self.store.list_instances_for_scale_set(scale_set.id).await? {
                    backed_names.insert(instance.name);
                }
            }
            for runner in forge_runners {
                if !backed_names.contains(&runner.name) {
                    let _ = self.forge.deregister_runner(&entity.entity, runner.id).await;
                }
            }
        }
        Ok(())
    }

    async fn reap_against_provider(
        &self,
        provider: &Arc<dyn ProviderAdapter>,
        pool_id: String,
        instances: Vec<Instance>,
    ) -> Result<()> {
        let provider_instances = provider.list_instances(&pool_id).await?;
        let provider_ids: std::collections::HashSet<String> =
            provider_instances.iter().map(|p| p.provider_id.clone()).collect();

        for instance in &instances {
            if !instance.is_busy_or_idle() {
                continue;
            }
            let Some(provider_id) = &instance.provider_id else { continue };
            if !provider_ids.contains(provider_id) {
                let mut updated = instance.clone();
                updated.runner_status = RunnerStatus::Terminated;
                updated.updated_at = Utc::now();
                if let Ok(updated) = self.store.update_instance(updated).await {
                    self.append_event(&updated.name, "reap", EventLevel::Warning, "ghost instance reconciled").await;
                }
            }
        }

        let store_ids: std::collections::HashSet<String> =
            instances.iter().filter_map(|i| i.provider_id.clone()).collect();
        for orphan in provider_instances {
            if !store_ids.contains(&orphan.provider_id) {
                let _ = provider.delete_instance(&orphan.provider_id).await;
            }
        }
        Ok(())
    }

    // -- Worker task 4: Tool refresher --

    async fn run_tool_refresher(self: Arc<Self>) {
        loop {
            let period = if self.in_unauthorized_backoff().await {
                Duration::from_secs(self.config.defaults.tool_refresh_backoff_secs.max(1))
            } else {
                Duration::from_secs(self.config.defaults.tool_refresh_period_secs.max(1))
            };
            tokio::select! {
                _ = self.cancellation.cancelled() => return,
                _ = tokio::time::sleep(period) => {}
            }
            self.refresh_tools_once().await;
        }
    }

    async fn refresh_tools_once(&self) {
        let entity = self.entity.read().await.clone();
        match self.forge.list_runner_applications(&entity.entity).await {
            Ok(apps) => {
                *self.tool_cache.write().await = Some((apps, Utc::now()));
                *self.unauthorized_backoff_until.write().await = None;
            }
            Err(e) if e.is_persistent_unavailable() => {
                let until = Utc::now() + chrono::Duration::seconds(self.config.defaults.unauthorized_backoff_secs as i64);
                *self.unauthorized_backoff_until.write().await = Some(until);
                tracing::warn!(entity_id = %self.entity_id, "entering unauthorized-backoff after 401 on tool refresh");
            }
            Err(e) => {
                tracing::warn!(entity_id = %self.entity_id, error = %e, "tool refresh failed");
            }
        }
    }

    pub async fn cached_tools(&self) -> Option<Vec<RunnerApplication>> {
        self.tool_cache.read().await.as_ref().map(|(apps, _)| apps.clone())
    }

    // -- Worker task 6: Scale-set session --

    async fn run_scale_set_sessions(self: Arc<Self>) {
        let mut active: HashMap<Uuid, JoinHandle<()>> = HashMap::new();
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.defaults.reaper_period_secs.max(1)));
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => {
                    for (_, handle) in active.drain() {
                        handle.abort();
                    }
                    return;
                }
                _ = interval.tick() => {}
            }
            let Ok(scale_sets) = self.store.list_scale_sets(Some(self.entity_id)).await else { continue };
            active.retain(|id, handle| {
                let still_present = scale_sets.iter().any(|s| &s.id == id);
                if !still_present {
                    handle.abort();
                }
                still_present
            });
            for scale_set in scale_sets.into_iter().filter(|s| s.enabled) {
                active.entry(scale_set.id).or_insert_with(|| {
                    let manager = self.clone();
                    tokio::spawn(async move { manager.run_one_scale_set_session(scale_set).await })
                });
            }
        }
    }

    async fn run_one_scale_set_session(self: Arc<Self>, scale_set: ScaleSet) {
        let mut backoff = Duration::from_secs(1);
        loop {
            if self.cancellation.is_cancelled() {
                return;
            }
            let entity = self.entity.read().await.clone();
            let forge_scale_set_id = match scale_set.forge_scale_set_id {
                Some(id) => id,
                None => return,
            };
            match self.forge.poll_scale_set_messages(&entity.entity, forge_scale_set_id).await {
                Ok(messages) => {
                    backoff = Duration::from_secs(1);
                    for message in messages {
                        self.acquire_scale_set_runners(&scale_set, message.acquire_count).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(scale_set = %scale_set.id, error = %e, "scale-set long-poll failed, backing off");
                    tokio::select! {
                        _ = self.cancellation.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(Duration::from_secs(60));
                }
            }
        }
    }

    async fn acquire_scale_set_runners(&self, scale_set: &ScaleSet, count: u32) {
        let room = scale_set.max_runners.saturating_sub(scale_set.instance_count);
        let to_create = count.min(room);
        let Ok(provider) = self.provider_for(&scale_set.provider_name) else { return };

        for _ in 0..to_create {
            let now = Utc::now();
            let instance = Instance {
                name: format!("garm-{}", Uuid::new_v4().simple()),
                parent: InstanceParent::ScaleSet(scale_set.id),
                provider_id: None,
                provider_name: scale_set.provider_name.clone(),
                os_type: scale_set.os_type,
                os_arch: scale_set.os_arch,
                runner_status: RunnerStatus::Pending,
                provider_status: ProviderStatus::Pending,
                ephemeral: scale_set.ephemeral,
                token_fetched: false,
                jit_config: HashMap::new(),
                agent_id: None,
                job_id: None,
                status_message: None,
                created_at: now,
                updated_at: now,
            };
            if self.store.create_instance(instance).await.is_err() {
                continue;
            }
        }
        if to_create > 0 {
            if let Ok(claimed) = self.store.claim_instances_for_provisioning(scale_set.id, to_create).await {
                for instance in claimed {
                    let pool_like = Pool {
                        id: scale_set.id,
                        entity_id: scale_set.entity_id,
                        provider_name: scale_set.provider_name.clone(),
                        image: scale_set.image.clone(),
                        flavor: scale_set.flavor.clone(),
                        os_type: scale_set.os_type,
                        os_arch: scale_set.os_arch,
                        tags: scale_set.tags.clone(),
                        min_idle_runners: scale_set.min_idle_runners,
                        max_runners: scale_set.max_runners,
                        runner_bootstrap_timeout_secs: scale_set.runner_bootstrap_timeout_secs,
                        template_id: None,
                        extra_spec: serde_json::json!({}),
                        enabled: scale_set.enabled,
                        created_at: scale_set.created_at,
                        updated_at: scale_set.updated_at,
                    };
                    let provider = provider.clone();
                    let manager = self.provision_instance(instance, pool_like, provider);
                    manager.await;
                }
            }
        }
    }
}
