//! End-to-end pool manager scenarios driven against the `testing` doubles
//! (no real Postgres, no real forge/provider process) (§8).
//!
//! These run on the real clock rather than `tokio::time::pause`: the
//! manager's bootstrap-timeout and unauthorized-backoff windows are
//! measured with `chrono::Utc::now()`, which a paused tokio timer does not
//! advance, so ticks are driven with short real periods and a real
//! `tokio::time::sleep` instead.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use garm_core::config::DefaultsConfig;
use garm_core::domain::{
    resolve_credentials_by_name, CredentialSecret, EntityKind, EntityStatus, ForgeCredentials,
    ForgeEndpoint, ForgeEntity, ForgeKind, OsArch, OsType, Pool, PoolBalancerPolicy, RunnerStatus,
};
use garm_core::provider::ProviderInstance;
use garm_core::store::StoreGateway;
use garm_core::testing::{MemoryStore, MockForgeClient, MockProviderAdapter, ScriptedForgeResponse, ScriptedProviderResponse};
use garm_core::webhook::{WebhookOwner, WorkflowJob, WorkflowJobPayload};
use garm_core::Error;
use garm_runtime::pool_manager::{PoolManager, PoolManagerConfig};

fn test_endpoint(name: &str, kind: ForgeKind) -> ForgeEndpoint {
    let now = Utc::now();
    ForgeEndpoint {
        name: name.to_string(),
        base_url: "https://api.github.com".to_string(),
        ca_cert_bundle: None,
        kind,
        description: String::new(),
        created_at: now,
        updated_at: now,
    }
}

fn test_credentials(name: &str, endpoint_name: &str) -> ForgeCredentials {
    let now = Utc::now();
    ForgeCredentials {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: String::new(),
        endpoint_name: endpoint_name.to_string(),
        secret: CredentialSecret::PersonalAccessToken { token: "token".to_string() },
        created_at: now,
        updated_at: now,
    }
}

fn test_entity(endpoint_name: &str, credentials_name: &str, kind: EntityKind) -> ForgeEntity {
    let now = Utc::now();
    ForgeEntity {
        id: Uuid::new_v4(),
        entity: kind,
        endpoint_name: endpoint_name.to_string(),
        credentials_name: credentials_name.to_string(),
        webhook_secret: None,
        pool_balancer_policy: PoolBalancerPolicy::RoundRobin,
        status: EntityStatus::default(),
        created_at: now,
        updated_at: now,
    }
}

fn test_pool(entity_id: Uuid, tags: &[&str], min_idle: u32, max: u32, bootstrap_timeout_secs: u64) -> Pool {
    let now = Utc::now();
    Pool {
        id: Uuid::new_v4(),
        entity_id,
        provider_name: "mock".to_string(),
        image: "ubuntu-22.04".to_string(),
        flavor: "small".to_string(),
        os_type: OsType::Linux,
        os_arch: OsArch::Amd64,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        min_idle_runners: min_idle,
        max_runners: max,
        runner_bootstrap_timeout_secs: bootstrap_timeout_secs,
        template_id: None,
        extra_spec: serde_json::json!({}),
        enabled: true,
        created_at: now,
        updated_at: now,
    }
}

/// `DefaultsConfig` fields are whole seconds, so 1s is the fastest any
/// worker task can tick; these tests budget real sleeps accordingly and
/// push every other period far out so only the task under test fires.
fn quiet_defaults() -> DefaultsConfig {
    let mut defaults = DefaultsConfig::default();
    defaults.consolidator_period_secs = 10_000;
    defaults.sweeper_period_secs = 10_000;
    defaults.reaper_period_secs = 10_000;
    defaults.tool_refresh_period_secs = 10_000;
    defaults
}

fn manager_config(defaults: DefaultsConfig) -> PoolManagerConfig {
    PoolManagerConfig {
        defaults,
        jwt_secret: "integration-test-secret".to_string(),
        instance_token_ttl_secs: 3600,
        provisioning_concurrency: 10,
    }
}

fn scripted_instance(id: &str) -> ScriptedProviderResponse {
    ScriptedProviderResponse::Instance(ProviderInstance {
        provider_id: id.to_string(),
        name: id.to_string(),
        status: "running".to_string(),
        address: None,
    })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn happy_path_provisioning_reaches_min_idle() {
    let store: Arc<dyn StoreGateway> = Arc::new(MemoryStore::new());
    let endpoint = test_endpoint("gh-default", ForgeKind::Github);
    store.create_endpoint(endpoint.clone()).await.unwrap();
    let credentials = test_credentials("c1", "gh-default");
    store.create_credentials(credentials).await.unwrap();
    let entity = test_entity(
        "gh-default",
        "c1",
        EntityKind::Repository { owner: "acme".to_string(), name: "widget".to_string() },
    );
    let entity = store.create_entity(entity).await.unwrap();
    // max_runners == min_idle_runners: nothing in this codebase ever moves
    // a freshly-provisioned instance out of `pending`, so the consolidator
    // never sees one as idle and would otherwise keep topping the pool up
    // tick after tick past `min_idle_runners`, all the way to `max_runners`.
    let pool = store.create_pool(test_pool(entity.id, &["self-hosted", "linux"], 2, 2, 600)).await.unwrap();

    let provider = MockProviderAdapter::new("mock");
    provider.push_create_instance(scripted_instance("i-1"));
    provider.push_create_instance(scripted_instance("i-2"));
    let mut providers: HashMap<String, Arc<dyn garm_core::provider::ProviderAdapter>> = HashMap::new();
    providers.insert("mock".to_string(), Arc::new(provider));

    let mut defaults = quiet_defaults();
    defaults.consolidator_period_secs = 1;
    let forge = Arc::new(MockForgeClient::new(true));
    let manager = PoolManager::new(entity, endpoint, store.clone(), forge, providers, manager_config(defaults));
    manager.start().unwrap();

    settle().await;

    let instances = store.list_instances_for_pool(pool.id).await.unwrap();
    assert_eq!(instances.len(), 2, "consolidator's first tick should provision up to min_idle_runners");
    assert!(instances.iter().all(|i| i.runner_status == RunnerStatus::Pending));
    assert!(instances.iter().all(|i| i.provider_id.is_some()));
    assert!(manager.status().await.is_running);

    manager.stop().await;
}

#[tokio::test]
async fn queued_workflow_job_is_routed_to_matching_pool() {
    let store: Arc<dyn StoreGateway> = Arc::new(MemoryStore::new());
    let endpoint = test_endpoint("gh-default", ForgeKind::Github);
    store.create_endpoint(endpoint.clone()).await.unwrap();
    let credentials = test_credentials("c1", "gh-default");
    store.create_credentials(credentials).await.unwrap();
    let entity = test_entity(
        "gh-default",
        "c1",
        EntityKind::Repository { owner: "acme".to_string(), name: "widget".to_string() },
    );
    let entity = store.create_entity(entity).await.unwrap();
    store.create_pool(test_pool(entity.id, &["self-hosted", "linux"], 0, 4, 600)).await.unwrap();

    let providers: HashMap<String, Arc<dyn garm_core::provider::ProviderAdapter>> = HashMap::new();
    let forge = Arc::new(MockForgeClient::new(true));
    let manager = PoolManager::new(entity.clone(), endpoint, store.clone(), forge, providers, manager_config(quiet_defaults()));
    manager.start().unwrap();

    let payload = WorkflowJobPayload {
        action: "queued".to_string(),
        workflow_job: WorkflowJob {
            id: 42,
            run_id: 1,
            status: "queued".to_string(),
            labels: BTreeSet::from(["self-hosted".to_string(), "linux".to_string(), "x64".to_string()]),
            runner_name: None,
            conclusion: None,
        },
        owner: WebhookOwner { login: "acme".to_string(), repo: Some("widget".to_string()), enterprise: None },
        endpoint_name: "gh-default".to_string(),
    };
    manager.handle_workflow_job(&payload).await.unwrap();
    settle().await;

    let job = store.get_job(42).await.unwrap().expect("queued job should be recorded");
    assert_eq!(job.entity_id, entity.id);
    assert_eq!(job.labels, payload.workflow_job.labels);

    manager.stop().await;
}

#[tokio::test]
async fn bootstrap_timeout_fails_and_tears_down_the_instance() {
    let store: Arc<dyn StoreGateway> = Arc::new(MemoryStore::new());
    let endpoint = test_endpoint("gh-default", ForgeKind::Github);
    store.create_endpoint(endpoint.clone()).await.unwrap();
    let credentials = test_credentials("c1", "gh-default");
    store.create_credentials(credentials).await.unwrap();
    let entity = test_entity(
        "gh-default",
        "c1",
        EntityKind::Repository { owner: "acme".to_string(), name: "widget".to_string() },
    );
    let entity = store.create_entity(entity).await.unwrap();
    // min_idle_runners == max_runners so exactly one instance is ever
    // provisioned and the consolidator's later ticks are no-ops; the
    // bootstrap timeout (1s, the smallest a `u64` seconds field allows) is
    // what the sweeper is exercised against.
    let pool = store.create_pool(test_pool(entity.id, &["self-hosted"], 1, 1, 1)).await.unwrap();

    let provider = MockProviderAdapter::new("mock");
    provider.push_create_instance(scripted_instance("i-stuck"));
    provider.push_delete_instance(ScriptedProviderResponse::Ok);
    let mut providers: HashMap<String, Arc<dyn garm_core::provider::ProviderAdapter>> = HashMap::new();
    providers.insert("mock".to_string(), Arc::new(provider));

    let mut defaults = quiet_defaults();
    defaults.consolidator_period_secs = 1;
    defaults.sweeper_period_secs = 1;
    let forge = Arc::new(MockForgeClient::new(true));
    let manager = PoolManager::new(entity, endpoint, store.clone(), forge, providers, manager_config(defaults));
    manager.start().unwrap();

    // First consolidator tick (immediate) provisions the instance; it
    // never advances past `pending`. Once its age passes the 1s bootstrap
    // timeout, a sweeper tick should fail it and hand it to the
    // provisioning queue for teardown.
    tokio::time::sleep(Duration::from_millis(3500)).await;

    let instances = store.list_instances_for_pool(pool.id).await.unwrap();
    assert_eq!(instances.len(), 1);
    let instance = &instances[0];
    assert_eq!(instance.runner_status, RunnerStatus::Terminated, "stuck instance should be failed and torn down");
    assert!(instance.status_message.as_deref().unwrap_or_default().contains("bootstrap-timeout"));

    manager.stop().await;
}

#[tokio::test]
async fn unauthorized_backoff_suppresses_job_routing() {
    let store: Arc<dyn StoreGateway> = Arc::new(MemoryStore::new());
    let endpoint = test_endpoint("gh-default", ForgeKind::Github);
    store.create_endpoint(endpoint.clone()).await.unwrap();
    let credentials = test_credentials("c1", "gh-default");
    store.create_credentials(credentials).await.unwrap();
    let entity = test_entity(
        "gh-default",
        "c1",
        EntityKind::Organization { name: "acme".to_string() },
    );
    let entity = store.create_entity(entity).await.unwrap();
    store.create_pool(test_pool(entity.id, &["self-hosted"], 0, 2, 600)).await.unwrap();

    let providers: HashMap<String, Arc<dyn garm_core::provider::ProviderAdapter>> = HashMap::new();
    let forge = MockForgeClient::new(true);
    // The tool refresher is what flips the manager into unauthorized-backoff
    // in this codebase's current wiring: a persistent-unavailable error from
    // `list_runner_applications` on a tick.
    forge.push_list_runner_applications(ScriptedForgeResponse::Err(Error::unavailable_persistent(
        "401 from forge on tool refresh",
    )));
    let mut defaults = quiet_defaults();
    defaults.tool_refresh_period_secs = 1;
    let manager = PoolManager::new(entity.clone(), endpoint, store.clone(), Arc::new(forge), providers, manager_config(defaults));
    manager.start().unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let payload = WorkflowJobPayload {
        action: "queued".to_string(),
        workflow_job: WorkflowJob {
            id: 7,
            run_id: 1,
            status: "queued".to_string(),
            labels: BTreeSet::from(["self-hosted".to_string()]),
            runner_name: None,
            conclusion: None,
        },
        owner: WebhookOwner { login: "acme".to_string(), repo: None, enterprise: None },
        endpoint_name: "gh-default".to_string(),
    };
    // Accepted (no error) even while backing off; only routing is suppressed.
    assert!(manager.handle_workflow_job(&payload).await.is_ok());

    let job = store.get_job(7).await.unwrap().expect("job is persisted regardless of backoff");
    assert_eq!(job.status, garm_core::domain::WorkflowJobStatus::Queued);

    manager.stop().await;
}

#[tokio::test]
async fn delete_pool_rejected_while_instances_exist() {
    let store: Arc<dyn StoreGateway> = Arc::new(MemoryStore::new());
    let endpoint = test_endpoint("gh-default", ForgeKind::Github);
    store.create_endpoint(endpoint.clone()).await.unwrap();
    let credentials = test_credentials("c1", "gh-default");
    store.create_credentials(credentials).await.unwrap();
    let entity = test_entity(
        "gh-default",
        "c1",
        EntityKind::Repository { owner: "acme".to_string(), name: "widget".to_string() },
    );
    let entity = store.create_entity(entity).await.unwrap();
    let pool = store.create_pool(test_pool(entity.id, &["self-hosted"], 1, 1, 600)).await.unwrap();

    let provider = MockProviderAdapter::new("mock");
    provider.push_create_instance(scripted_instance("i-1"));
    let mut providers: HashMap<String, Arc<dyn garm_core::provider::ProviderAdapter>> = HashMap::new();
    providers.insert("mock".to_string(), Arc::new(provider));
    let mut defaults = quiet_defaults();
    defaults.consolidator_period_secs = 1;
    let forge = Arc::new(MockForgeClient::new(true));
    let manager = PoolManager::new(entity, endpoint, store.clone(), forge, providers, manager_config(defaults));
    manager.start().unwrap();

    settle().await;
    assert_eq!(store.list_instances_for_pool(pool.id).await.unwrap().len(), 1);

    let err = store.delete_pool(pool.id).await.unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)), "pool with a live instance must reject delete");

    // Terminate the instance by hand, the way the teardown path would once
    // the provider confirms it's gone, then retry.
    let mut instance = store.list_instances_for_pool(pool.id).await.unwrap().remove(0);
    instance.runner_status = RunnerStatus::Terminated;
    instance.updated_at = Utc::now();
    store.update_instance(instance).await.unwrap();

    store.delete_pool(pool.id).await.unwrap();
    assert!(store.get_pool(pool.id).await.is_err());

    manager.stop().await;
}

#[test]
fn dual_owned_credentials_name_requires_a_forge_hint() {
    let github = test_endpoint("gh", ForgeKind::Github);
    let gitea = test_endpoint("gitea", ForgeKind::Gitea);
    let creds = vec![test_credentials("foo", "gh"), test_credentials("foo", "gitea")];
    let endpoints = vec![github, gitea];

    let err = resolve_credentials_by_name(&creds, &endpoints, "foo", None).unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));

    let resolved = resolve_credentials_by_name(&creds, &endpoints, "foo", Some(ForgeKind::Github)).unwrap();
    assert_eq!(resolved.endpoint_name, "gh");
}
