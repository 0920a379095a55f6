//! Postgres-backed [`StoreGateway`] (§3.1, §4.3).
//!
//! Every mutating method publishes a [`ChangeEvent`] on the in-process
//! broadcast bus after its write commits. Optimistic concurrency on
//! [`Instance`] updates is enforced with a `SELECT ... FOR UPDATE` read of
//! the current `updated_at` inside a transaction rather than a bare
//! `WHERE updated_at = $n`, so a stale caller gets [`Error::Conflict`]
//! rather than a silently-dropped write.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use garm_core::config::DatabaseConfig;
use garm_core::domain::{
    sha256_hex, CredentialSecret, EntityKind, EntityStatus, EventLevel, FileObject, ForgeCredentials,
    ForgeEndpoint, ForgeEntity, ForgeKind, Instance, InstanceEvent, InstanceParent, Job, OsArch,
    OsType, Pool, PoolBalancerPolicy, ProviderStatus, RunnerStatus, ScaleSet, Template,
    WorkflowJobStatus,
};
use garm_core::store::{ChangeBus, ChangeEvent, ChangeKind, EntityTable, StoreGateway};
use garm_core::{Error, Result};

fn os_type_from_str(s: &str) -> Result<OsType> {
    match s {
        "linux" => Ok(OsType::Linux),
        "windows" => Ok(OsType::Windows),
        "macos" => Ok(OsType::MacOs),
        other => Err(Error::Internal(format!("unknown os_type {other}"))),
    }
}

fn os_arch_from_str(s: &str) -> Result<OsArch> {
    match s {
        "amd64" => Ok(OsArch::Amd64),
        "arm64" => Ok(OsArch::Arm64),
        other => Err(Error::Internal(format!("unknown os_arch {other}"))),
    }
}

fn balancer_policy_from_str(s: &str) -> Result<PoolBalancerPolicy> {
    match s {
        "round_robin" => Ok(PoolBalancerPolicy::RoundRobin),
        "pack" => Ok(PoolBalancerPolicy::Pack),
        "none" => Ok(PoolBalancerPolicy::None),
        other => Err(Error::Internal(format!("unknown pool_balancer_policy {other}"))),
    }
}

fn balancer_policy_as_str(p: PoolBalancerPolicy) -> &'static str {
    match p {
        PoolBalancerPolicy::RoundRobin => "round_robin",
        PoolBalancerPolicy::Pack => "pack",
        PoolBalancerPolicy::None => "none",
    }
}

fn provider_status_from_str(s: &str) -> Result<ProviderStatus> {
    match s {
        "pending" => Ok(ProviderStatus::Pending),
        "running" => Ok(ProviderStatus::Running),
        "stopped" => Ok(ProviderStatus::Stopped),
        "error" => Ok(ProviderStatus::Error),
        "deleted" => Ok(ProviderStatus::Deleted),
        other => Err(Error::Internal(format!("unknown provider_status {other}"))),
    }
}

fn event_level_from_str(s: &str) -> Result<EventLevel> {
    match s {
        "info" => Ok(EventLevel::Info),
        "warning" => Ok(EventLevel::Warning),
        "error" => Ok(EventLevel::Error),
        other => Err(Error::Internal(format!("unknown event level {other}"))),
    }
}

fn tags_to_json(tags: &BTreeSet<String>) -> serde_json::Value {
    serde_json::Value::Array(tags.iter().map(|t| serde_json::Value::String(t.clone())).collect())
}

fn tags_from_json(v: serde_json::Value) -> Result<BTreeSet<String>> {
    let values: Vec<String> = serde_json::from_value(v)?;
    Ok(values.into_iter().collect())
}

fn string_map_to_json(m: &HashMap<String, String>) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(m)?)
}

fn string_map_from_json(v: serde_json::Value) -> Result<HashMap<String, String>> {
    Ok(serde_json::from_value(v)?)
}

/// Postgres-backed [`StoreGateway`].
pub struct PgStore {
    pool: PgPool,
    changes: tokio::sync::broadcast::Sender<ChangeEvent>,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let statement_timeout_ms = config.statement_timeout_secs.saturating_mul(1000);
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query(&format!("SET statement_timeout = {statement_timeout_ms}"))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await
            .map_err(|e| Error::unavailable(format!("failed to connect to database: {e}")))?;

        let (changes, _rx) = tokio::sync::broadcast::channel(1024);
        Ok(Self { pool, changes })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn publish(&self, table: EntityTable, kind: ChangeKind, key: impl Into<String>) {
        let _ = self.changes.send(ChangeEvent { table, kind, key: key.into() });
    }

    async fn resolve_credentials_id(&self, endpoint_name: &str, credentials_name: &str) -> Result<Uuid> {
        let row = sqlx::query("SELECT id FROM garm_credentials WHERE endpoint_name = $1 AND name = $2")
            .bind(endpoint_name)
            .bind(credentials_name)
            .fetch_optional(&self.pool)
            .await?;
        let row = row.ok_or_else(|| {
            Error::BadRequest(format!("unknown credentials '{credentials_name}' for endpoint '{endpoint_name}'"))
        })?;
        Ok(row.get("id"))
    }

    async fn credentials_name_for_id(&self, id: Uuid) -> Result<String> {
        let row = sqlx::query("SELECT name FROM garm_credentials WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let row = row.ok_or_else(|| Error::Internal(format!("dangling credentials_id {id}")))?;
        Ok(row.get("name"))
    }

    async fn file_object_tags(&self, id: i64) -> Result<BTreeMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM garm_file_object_tags WHERE file_object_id = $1")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| (row.get("key"), row.get("value"))).collect())
    }

    async fn count_rows(&self, sql: &str, id: Uuid) -> Result<i64> {
        let row = sqlx::query(sql).bind(id).fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn require_no_dependents(&self, sql: &str, id: Uuid, message: impl Fn(i64) -> String) -> Result<()> {
        let count = self.count_rows(sql, id).await?;
        if count > 0 {
            return Err(Error::BadRequest(message(count)));
        }
        Ok(())
    }
}

impl ChangeBus for PgStore {
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

fn endpoint_from_row(row: &sqlx::postgres::PgRow) -> Result<ForgeEndpoint> {
    let kind: String = row.get("kind");
    Ok(ForgeEndpoint {
        name: row.get("name"),
        base_url: row.get("base_url"),
        ca_cert_bundle: row.get("ca_cert_bundle"),
        kind: ForgeKind::from_str(&kind).ok_or_else(|| Error::Internal(format!("unknown forge kind {kind}")))?,
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn credentials_from_row(row: &sqlx::postgres::PgRow) -> Result<ForgeCredentials> {
    let secret: serde_json::Value = row.get("secret");
    Ok(ForgeCredentials {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        endpoint_name: row.get("endpoint_name"),
        secret: serde_json::from_value::<CredentialSecret>(secret)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn pool_from_row(row: &sqlx::postgres::PgRow) -> Result<Pool> {
    let os_type: String = row.get("os_type");
    let os_arch: String = row.get("os_arch");
    let tags: serde_json::Value = row.get("tags");
    let min_idle: i32 = row.get("min_idle_runners");
    let max_runners: i32 = row.get("max_runners");
    let timeout_secs: i64 = row.get("runner_bootstrap_timeout_secs");
    Ok(Pool {
        id: row.get("id"),
        entity_id: row.get("entity_id"),
        provider_name: row.get("provider_name"),
        image: row.get("image"),
        flavor: row.get("flavor"),
        os_type: os_type_from_str(&os_type)?,
        os_arch: os_arch_from_str(&os_arch)?,
        tags: tags_from_json(tags)?,
        min_idle_runners: min_idle as u32,
        max_runners: max_runners as u32,
        runner_bootstrap_timeout_secs: timeout_secs as u64,
        template_id: row.get("template_id"),
        extra_spec: row.get("extra_spec"),
        enabled: row.get("enabled"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn scale_set_from_row(row: &sqlx::postgres::PgRow) -> Result<ScaleSet> {
    let os_type: String = row.get("os_type");
    let os_arch: String = row.get("os_arch");
    let tags: serde_json::Value = row.get("tags");
    let min_idle: i32 = row.get("min_idle_runners");
    let max_runners: i32 = row.get("max_runners");
    let timeout_secs: i64 = row.get("runner_bootstrap_timeout_secs");
    let instance_count: i32 = row.get("instance_count");
    Ok(ScaleSet {
        id: row.get("id"),
        entity_id: row.get("entity_id"),
        forge_scale_set_id: row.get("forge_scale_set_id"),
        runner_group_id: row.get("runner_group_id"),
        name: row.get("name"),
        provider_name: row.get("provider_name"),
        image: row.get("image"),
        flavor: row.get("flavor"),
        os_type: os_type_from_str(&os_type)?,
        os_arch: os_arch_from_str(&os_arch)?,
        tags: tags_from_json(tags)?,
        min_idle_runners: min_idle as u32,
        max_runners: max_runners as u32,
        runner_bootstrap_timeout_secs: timeout_secs as u64,
        ephemeral: row.get("ephemeral"),
        disable_update: row.get("disable_update"),
        enabled: row.get("enabled"),
        instance_count: instance_count as u32,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn instance_from_row(row: &sqlx::postgres::PgRow) -> Result<Instance> {
    let parent_kind: String = row.get("parent_kind");
    let parent_id: Uuid = row.get("parent_id");
    let parent = match parent_kind.as_str() {
        "pool" => InstanceParent::Pool(parent_id),
        "scale_set" => InstanceParent::ScaleSet(parent_id),
        other => return Err(Error::Internal(format!("unknown instance parent_kind {other}"))),
    };
    let os_type: String = row.get("os_type");
    let os_arch: String = row.get("os_arch");
    let runner_status: String = row.get("runner_status");
    let provider_status: String = row.get("provider_status");
    let jit_config: serde_json::Value = row.get("jit_config");
    Ok(Instance {
        name: row.get("name"),
        parent,
        provider_id: row.get("provider_id"),
        provider_name: row.get("provider_name"),
        os_type: os_type_from_str(&os_type)?,
        os_arch: os_arch_from_str(&os_arch)?,
        runner_status: RunnerStatus::from_str(&runner_status)
            .ok_or_else(|| Error::Internal(format!("unknown runner_status {runner_status}")))?,
        provider_status: provider_status_from_str(&provider_status)?,
        ephemeral: row.get("ephemeral"),
        token_fetched: row.get("token_fetched"),
        jit_config: string_map_from_json(jit_config)?,
        agent_id: row.get("agent_id"),
        job_id: row.get("job_id"),
        status_message: row.get("status_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn instance_event_from_row(row: &sqlx::postgres::PgRow) -> Result<InstanceEvent> {
    let level: String = row.get("level");
    Ok(InstanceEvent {
        id: row.get("id"),
        instance_name: row.get("instance_name"),
        kind: row.get("kind"),
        level: event_level_from_str(&level)?,
        message: row.get("message"),
        created_at: row.get("created_at"),
    })
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<Job> {
    let status: String = row.get("status");
    let labels: serde_json::Value = row.get("labels");
    Ok(Job {
        id: row.get("id"),
        run_id: row.get("run_id"),
        entity_id: row.get("entity_id"),
        status: WorkflowJobStatus::from_action(&status)
            .ok_or_else(|| Error::Internal(format!("unknown job status {status}")))?,
        labels: tags_from_json(labels)?,
        runner_name: row.get("runner_name"),
        conclusion: row.get("conclusion"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn template_from_row(row: &sqlx::postgres::PgRow) -> Result<Template> {
    let os_type: String = row.get("os_type");
    let forge_kind: String = row.get("forge_kind");
    Ok(Template {
        id: row.get("id"),
        name: row.get("name"),
        owner: row.get("owner"),
        os_type: os_type_from_str(&os_type)?,
        forge_kind: ForgeKind::from_str(&forge_kind)
            .ok_or_else(|| Error::Internal(format!("unknown forge_kind {forge_kind}")))?,
        data: row.get("data"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn file_object_from_row(row: &sqlx::postgres::PgRow, tags: BTreeMap<String, String>) -> Result<FileObject> {
    let size_bytes: i64 = row.get("size_bytes");
    Ok(FileObject {
        id: row.get("id"),
        sha256: row.get("sha256"),
        size_bytes: size_bytes as u64,
        tags,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl StoreGateway for PgStore {
    fn create_endpoint(
        &self,
        endpoint: ForgeEndpoint,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeEndpoint>> + Send + '_>> {
        Box::pin(async move {
            endpoint.validate()?;
            let row = sqlx::query(
                "INSERT INTO garm_endpoints (name, base_url, ca_cert_bundle, kind, description)
                 VALUES ($1, $2, $3, $4, $5) RETURNING *",
            )
            .bind(&endpoint.name)
            .bind(&endpoint.base_url)
            .bind(&endpoint.ca_cert_bundle)
            .bind(endpoint.kind.as_str())
            .bind(&endpoint.description)
            .fetch_one(&self.pool)
            .await?;
            let created = endpoint_from_row(&row)?;
            self.publish(EntityTable::Endpoint, ChangeKind::Created, created.name.clone());
            Ok(created)
        })
    }

    fn get_endpoint(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<ForgeEndpoint>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM garm_endpoints WHERE name = $1")
                .bind(&name)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("endpoint '{name}' not found")))?;
            endpoint_from_row(&row)
        })
    }

    fn list_endpoints(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeEndpoint>>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT * FROM garm_endpoints ORDER BY name").fetch_all(&self.pool).await?;
            rows.iter().map(endpoint_from_row).collect()
        })
    }

    fn update_endpoint(
        &self,
        endpoint: ForgeEndpoint,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeEndpoint>> + Send + '_>> {
        Box::pin(async move {
            endpoint.validate()?;
            let row = sqlx::query(
                "UPDATE garm_endpoints SET base_url = $2, ca_cert_bundle = $3, kind = $4,
                 description = $5, updated_at = NOW() WHERE name = $1 RETURNING *",
            )
            .bind(&endpoint.name)
            .bind(&endpoint.base_url)
            .bind(&endpoint.ca_cert_bundle)
            .bind(endpoint.kind.as_str())
            .bind(&endpoint.description)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("endpoint '{}' not found", endpoint.name)))?;
            let updated = endpoint_from_row(&row)?;
            self.publish(EntityTable::Endpoint, ChangeKind::Updated, updated.name.clone());
            Ok(updated)
        })
    }

    fn delete_endpoint(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM garm_endpoints WHERE name = $1")
                .bind(&name)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("endpoint '{name}' not found")));
            }
            self.publish(EntityTable::Endpoint, ChangeKind::Deleted, name);
            Ok(())
        })
    }

    fn create_credentials(
        &self,
        credentials: ForgeCredentials,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeCredentials>> + Send + '_>> {
        Box::pin(async move {
            credentials.validate()?;
            let secret = serde_json::to_value(&credentials.secret)?;
            let row = sqlx::query(
                "INSERT INTO garm_credentials (id, name, description, endpoint_name, secret)
                 VALUES ($1, $2, $3, $4, $5) RETURNING *",
            )
            .bind(credentials.id)
            .bind(&credentials.name)
            .bind(&credentials.description)
            .bind(&credentials.endpoint_name)
            .bind(&secret)
            .fetch_one(&self.pool)
            .await?;
            let created = credentials_from_row(&row)?;
            self.publish(EntityTable::Credentials, ChangeKind::Created, created.id.to_string());
            Ok(created)
        })
    }

    fn get_credentials(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<ForgeCredentials>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM garm_credentials WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("credentials '{id}' not found")))?;
            credentials_from_row(&row)
        })
    }

    fn list_credentials(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeCredentials>>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT * FROM garm_credentials ORDER BY name").fetch_all(&self.pool).await?;
            rows.iter().map(credentials_from_row).collect()
        })
    }

    fn update_credentials(
        &self,
        credentials: ForgeCredentials,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeCredentials>> + Send + '_>> {
        Box::pin(async move {
            credentials.validate()?;
            let secret = serde_json::to_value(&credentials.secret)?;
            let row = sqlx::query(
                "UPDATE garm_credentials SET description = $2, secret = $3, updated_at = NOW()
                 WHERE id = $1 RETURNING *",
            )
            .bind(credentials.id)
            .bind(&credentials.description)
            .bind(&secret)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("credentials '{}' not found", credentials.id)))?;
            let updated = credentials_from_row(&row)?;
            self.publish(EntityTable::Credentials, ChangeKind::Updated, updated.id.to_string());
            Ok(updated)
        })
    }

    fn delete_credentials(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.require_no_dependents(
                "SELECT COUNT(*) FROM garm_entities WHERE credentials_id = $1",
                id,
                |n| format!("credentials '{id}' cannot be deleted while referenced by {n} entity record(s)"),
            )
            .await?;
            let result = sqlx::query("DELETE FROM garm_credentials WHERE id = $1").bind(id).execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("credentials '{id}' not found")));
            }
            self.publish(EntityTable::Credentials, ChangeKind::Deleted, id.to_string());
            Ok(())
        })
    }

    fn create_entity(&self, entity: ForgeEntity) -> Pin<Box<dyn Future<Output = Result<ForgeEntity>> + Send + '_>> {
        Box::pin(async move {
            entity.validate()?;
            let credentials_id = self.resolve_credentials_id(&entity.endpoint_name, &entity.credentials_name).await?;
            let (kind, owner, repo) = match &entity.entity {
                EntityKind::Repository { owner, name } => ("repository", owner.clone(), Some(name.clone())),
                EntityKind::Organization { name } => ("organization", name.clone(), None),
                EntityKind::Enterprise { name } => ("enterprise", name.clone(), None),
            };
            let row = sqlx::query(
                "INSERT INTO garm_entities (id, kind, owner, repo, endpoint_name, credentials_id,
                 webhook_secret, pool_balancer_policy, is_running, failure_reason)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING *",
            )
            .bind(entity.id)
            .bind(kind)
            .bind(&owner)
            .bind(&repo)
            .bind(&entity.endpoint_name)
            .bind(credentials_id)
            .bind(&entity.webhook_secret)
            .bind(balancer_policy_as_str(entity.pool_balancer_policy))
            .bind(entity.status.is_running)
            .bind(&entity.status.failure_reason)
            .fetch_one(&self.pool)
            .await?;
            let created = self.entity_from_row_with_name(&row, &entity.credentials_name)?;
            self.publish(EntityTable::ForgeEntity, ChangeKind::Created, created.id.to_string());
            Ok(created)
        })
    }

    fn get_entity(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<ForgeEntity>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM garm_entities WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("entity '{id}' not found")))?;
            let credentials_id: Uuid = row.get("credentials_id");
            let credentials_name = self.credentials_name_for_id(credentials_id).await?;
            self.entity_from_row_with_name(&row, &credentials_name)
        })
    }

    fn list_entities(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeEntity>>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT * FROM garm_entities ORDER BY created_at").fetch_all(&self.pool).await?;
            let mut out = Vec::with_capacity(rows.len());
            for row in &rows {
                let credentials_id: Uuid = row.get("credentials_id");
                let credentials_name = self.credentials_name_for_id(credentials_id).await?;
                out.push(self.entity_from_row_with_name(row, &credentials_name)?);
            }
            Ok(out)
        })
    }

    fn update_entity(&self, entity: ForgeEntity) -> Pin<Box<dyn Future<Output = Result<ForgeEntity>> + Send + '_>> {
        Box::pin(async move {
            entity.validate()?;
            let credentials_id = self.resolve_credentials_id(&entity.endpoint_name, &entity.credentials_name).await?;
            let row = sqlx::query(
                "UPDATE garm_entities SET credentials_id = $2, webhook_secret = $3,
                 pool_balancer_policy = $4, is_running = $5, failure_reason = $6, updated_at = NOW()
                 WHERE id = $1 RETURNING *",
            )
            .bind(entity.id)
            .bind(credentials_id)
            .bind(&entity.webhook_secret)
            .bind(balancer_policy_as_str(entity.pool_balancer_policy))
            .bind(entity.status.is_running)
            .bind(&entity.status.failure_reason)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("entity '{}' not found", entity.id)))?;
            let updated = self.entity_from_row_with_name(&row, &entity.credentials_name)?;
            self.publish(EntityTable::ForgeEntity, ChangeKind::Updated, updated.id.to_string());
            Ok(updated)
        })
    }

    fn delete_entity(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.require_no_dependents(
                "SELECT COUNT(*) FROM garm_pools WHERE entity_id = $1",
                id,
                |n| format!("entity '{id}' cannot be deleted while it owns {n} pool(s)"),
            )
            .await?;
            self.require_no_dependents(
                "SELECT COUNT(*) FROM garm_scale_sets WHERE entity_id = $1",
                id,
                |n| format!("entity '{id}' cannot be deleted while it owns {n} scale set(s)"),
            )
            .await?;
            let result = sqlx::query("DELETE FROM garm_entities WHERE id = $1").bind(id).execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("entity '{id}' not found")));
            }
            self.publish(EntityTable::ForgeEntity, ChangeKind::Deleted, id.to_string());
            Ok(())
        })
    }

    fn create_pool(&self, pool: Pool) -> Pin<Box<dyn Future<Output = Result<Pool>> + Send + '_>> {
        Box::pin(async move {
            pool.validate()?;
            let row = sqlx::query(
                "INSERT INTO garm_pools (id, entity_id, provider_name, image, flavor, os_type, os_arch,
                 tags, min_idle_runners, max_runners, runner_bootstrap_timeout_secs, template_id,
                 extra_spec, enabled)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14) RETURNING *",
            )
            .bind(pool.id)
            .bind(pool.entity_id)
            .bind(&pool.provider_name)
            .bind(&pool.image)
            .bind(&pool.flavor)
            .bind(pool.os_type.as_str())
            .bind(pool.os_arch.as_str())
            .bind(tags_to_json(&pool.tags))
            .bind(pool.min_idle_runners as i32)
            .bind(pool.max_runners as i32)
            .bind(pool.runner_bootstrap_timeout_secs as i64)
            .bind(pool.template_id)
            .bind(&pool.extra_spec)
            .bind(pool.enabled)
            .fetch_one(&self.pool)
            .await?;
            let created = pool_from_row(&row)?;
            self.publish(EntityTable::Pool, ChangeKind::Created, created.id.to_string());
            Ok(created)
        })
    }

    fn get_pool(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<Pool>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM garm_pools WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("pool '{id}' not found")))?;
            pool_from_row(&row)
        })
    }

    fn list_pools(&self, entity_id: Option<Uuid>) -> Pin<Box<dyn Future<Output = Result<Vec<Pool>>> + Send + '_>> {
        Box::pin(async move {
            let rows = match entity_id {
                Some(id) => {
                    sqlx::query("SELECT * FROM garm_pools WHERE entity_id = $1 ORDER BY created_at")
                        .bind(id)
                        .fetch_all(&self.pool)
                        .await?
                }
                None => sqlx::query("SELECT * FROM garm_pools ORDER BY created_at").fetch_all(&self.pool).await?,
            };
            rows.iter().map(pool_from_row).collect()
        })
    }

    fn update_pool(&self, pool: Pool) -> Pin<Box<dyn Future<Output = Result<Pool>> + Send + '_>> {
        Box::pin(async move {
            pool.validate()?;
            let row = sqlx::query(
                "UPDATE garm_pools SET provider_name = $2, image = $3, flavor = $4, os_type = $5,
                 os_arch = $6, tags = $7, min_idle_runners = $8, max_runners = $9,
                 runner_bootstrap_timeout_secs = $10, template_id = $11, extra_spec = $12,
                 enabled = $13, updated_at = NOW() WHERE id = $1 RETURNING *",
            )
            .bind(pool.id)
            .bind(&pool.provider_name)
            .bind(&pool.image)
            .bind(&pool.flavor)
            .bind(pool.os_type.as_str())
            .bind(pool.os_arch.as_str())
            .bind(tags_to_json(&pool.tags))
            .bind(pool.min_idle_runners as i32)
            .bind(pool.max_runners as i32)
            .bind(pool.runner_bootstrap_timeout_secs as i64)
            .bind(pool.template_id)
            .bind(&pool.extra_spec)
            .bind(pool.enabled)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pool '{}' not found", pool.id)))?;
            let updated = pool_from_row(&row)?;
            self.publish(EntityTable::Pool, ChangeKind::Updated, updated.id.to_string());
            Ok(updated)
        })
    }

    fn delete_pool(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.require_no_dependents(
                "SELECT COUNT(*) FROM garm_instances WHERE parent_kind = 'pool' AND parent_id = $1",
                id,
                |n| format!("pool '{id}' cannot be deleted while it has {n} live instance(s)"),
            )
            .await?;
            let result = sqlx::query("DELETE FROM garm_pools WHERE id = $1").bind(id).execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("pool '{id}' not found")));
            }
            self.publish(EntityTable::Pool, ChangeKind::Deleted, id.to_string());
            Ok(())
        })
    }

    fn create_scale_set(
        &self,
        scale_set: ScaleSet,
    ) -> Pin<Box<dyn Future<Output = Result<ScaleSet>> + Send + '_>> {
        Box::pin(async move {
            scale_set.validate()?;
            let row = sqlx::query(
                "INSERT INTO garm_scale_sets (id, entity_id, forge_scale_set_id, runner_group_id,
                 name, provider_name, image, flavor, os_type, os_arch, tags, min_idle_runners,
                 max_runners, runner_bootstrap_timeout_secs, ephemeral, disable_update, enabled,
                 instance_count)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18) RETURNING *",
            )
            .bind(scale_set.id)
            .bind(scale_set.entity_id)
            .bind(scale_set.forge_scale_set_id)
            .bind(scale_set.runner_group_id)
            .bind(&scale_set.name)
            .bind(&scale_set.provider_name)
            .bind(&scale_set.image)
            .bind(&scale_set.flavor)
            .bind(scale_set.os_type.as_str())
            .bind(scale_set.os_arch.as_str())
            .bind(tags_to_json(&scale_set.tags))
            .bind(scale_set.min_idle_runners as i32)
            .bind(scale_set.max_runners as i32)
            .bind(scale_set.runner_bootstrap_timeout_secs as i64)
            .bind(scale_set.ephemeral)
            .bind(scale_set.disable_update)
            .bind(scale_set.enabled)
            .bind(scale_set.instance_count as i32)
            .fetch_one(&self.pool)
            .await?;
            let created = scale_set_from_row(&row)?;
            self.publish(EntityTable::ScaleSet, ChangeKind::Created, created.id.to_string());
            Ok(created)
        })
    }

    fn get_scale_set(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<ScaleSet>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM garm_scale_sets WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("scale set '{id}' not found")))?;
            scale_set_from_row(&row)
        })
    }

    fn list_scale_sets(
        &self,
        entity_id: Option<Uuid>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ScaleSet>>> + Send + '_>> {
        Box::pin(async move {
            let rows = match entity_id {
                Some(id) => {
                    sqlx::query("SELECT * FROM garm_scale_sets WHERE entity_id = $1 ORDER BY created_at")
                        .bind(id)
                        .fetch_all(&self.pool)
                        .await?
                }
                None => sqlx::query("SELECT * FROM garm_scale_sets ORDER BY created_at").fetch_all(&self.pool).await?,
            };
            rows.iter().map(scale_set_from_row).collect()
        })
    }

    fn update_scale_set(
        &self,
        scale_set: ScaleSet,
    ) -> Pin<Box<dyn Future<Output = Result<ScaleSet>> + Send + '_>> {
        Box::pin(async move {
            scale_set.validate()?;
            let row = sqlx::query(
                "UPDATE garm_scale_sets SET forge_scale_set_id = $2, runner_group_id = $3, name = $4,
                 provider_name = $5, image = $6, flavor = $7, os_type = $8, os_arch = $9, tags = $10,
                 min_idle_runners = $11, max_runners = $12, runner_bootstrap_timeout_secs = $13,
                 ephemeral = $14, disable_update = $15, enabled = $16, instance_count = $17,
                 updated_at = NOW() WHERE id = $1 RETURNING *",
            )
            .bind(scale_set.id)
            .bind(scale_set.forge_scale_set_id)
            .bind(scale_set.runner_group_id)
            .bind(&scale_set.name)
            .bind(&scale_set.provider_name)
            .bind(&scale_set.image)
            .bind(&scale_set.flavor)
            .bind(scale_set.os_type.as_str())
            .bind(scale_set.os_arch.as_str())
            .bind(tags_to_json(&scale_set.tags))
            .bind(scale_set.min_idle_runners as i32)
            .bind(scale_set.max_runners as i32)
            .bind(scale_set.runner_bootstrap_timeout_secs as i64)
            .bind(scale_set.ephemeral)
            .bind(scale_set.disable_update)
            .bind(scale_set.enabled)
            .bind(scale_set.instance_count as i32)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("scale set '{}' not found", scale_set.id)))?;
            let updated = scale_set_from_row(&row)?;
            self.publish(EntityTable::ScaleSet, ChangeKind::Updated, updated.id.to_string());
            Ok(updated)
        })
    }

    fn delete_scale_set(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.require_no_dependents(
                "SELECT COUNT(*) FROM garm_instances WHERE parent_kind = 'scale_set' AND parent_id = $1",
                id,
                |n| format!("scale set '{id}' cannot be deleted while it has {n} live instance(s)"),
            )
            .await?;
            let result = sqlx::query("DELETE FROM garm_scale_sets WHERE id = $1").bind(id).execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("scale set '{id}' not found")));
            }
            self.publish(EntityTable::ScaleSet, ChangeKind::Deleted, id.to_string());
            Ok(())
        })
    }

    fn create_instance(&self, instance: Instance) -> Pin<Box<dyn Future<Output = Result<Instance>> + Send + '_>> {
        Box::pin(async move {
            let (parent_kind, parent_id) = match instance.parent {
                InstanceParent::Pool(id) => ("pool", id),
                InstanceParent::ScaleSet(id) => ("scale_set", id),
            };
            let row = sqlx::query(
                "INSERT INTO garm_instances (name, parent_kind, parent_id, provider_id, provider_name,
                 os_type, os_arch, runner_status, provider_status, ephemeral, token_fetched,
                 jit_config, agent_id, job_id, status_message)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15) RETURNING *",
            )
            .bind(&instance.name)
            .bind(parent_kind)
            .bind(parent_id)
            .bind(&instance.provider_id)
            .bind(&instance.provider_name)
            .bind(instance.os_type.as_str())
            .bind(instance.os_arch.as_str())
            .bind(instance.runner_status.as_str())
            .bind(instance.provider_status.as_str())
            .bind(instance.ephemeral)
            .bind(instance.token_fetched)
            .bind(string_map_to_json(&instance.jit_config)?)
            .bind(instance.agent_id)
            .bind(instance.job_id)
            .bind(&instance.status_message)
            .fetch_one(&self.pool)
            .await?;
            let created = instance_from_row(&row)?;
            self.publish(EntityTable::Instance, ChangeKind::Created, created.name.clone());
            Ok(created)
        })
    }

    fn get_instance(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<Instance>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM garm_instances WHERE name = $1")
                .bind(&name)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("instance '{name}' not found")))?;
            instance_from_row(&row)
        })
    }

    fn list_instances_for_pool(
        &self,
        pool_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Instance>>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT * FROM garm_instances WHERE parent_kind = 'pool' AND parent_id = $1 ORDER BY created_at",
            )
            .bind(pool_id)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(instance_from_row).collect()
        })
    }

    fn list_instances_for_scale_set(
        &self,
        scale_set_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Instance>>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT * FROM garm_instances WHERE parent_kind = 'scale_set' AND parent_id = $1 ORDER BY created_at",
            )
            .bind(scale_set_id)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(instance_from_row).collect()
        })
    }

    fn update_instance(&self, instance: Instance) -> Pin<Box<dyn Future<Output = Result<Instance>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            let current: Option<DateTime<Utc>> =
                sqlx::query_scalar("SELECT updated_at FROM garm_instances WHERE name = $1 FOR UPDATE")
                    .bind(&instance.name)
                    .fetch_optional(&mut *tx)
                    .await?;
            let current = current.ok_or_else(|| Error::NotFound(format!("instance '{}' not found", instance.name)))?;
            if current != instance.updated_at {
                return Err(Error::Conflict(format!(
                    "instance '{}' was modified concurrently",
                    instance.name
                )));
            }

            let row = sqlx::query(
                "UPDATE garm_instances SET provider_id = $2, provider_name = $3, runner_status = $4,
                 provider_status = $5, token_fetched = $6, jit_config = $7, agent_id = $8, job_id = $9,
                 status_message = $10, updated_at = NOW() WHERE name = $1 RETURNING *",
            )
            .bind(&instance.name)
            .bind(&instance.provider_id)
            .bind(&instance.provider_name)
            .bind(instance.runner_status.as_str())
            .bind(instance.provider_status.as_str())
            .bind(instance.token_fetched)
            .bind(string_map_to_json(&instance.jit_config)?)
            .bind(instance.agent_id)
            .bind(instance.job_id)
            .bind(&instance.status_message)
            .fetch_one(&mut *tx)
            .await?;
            let updated = instance_from_row(&row)?;
            tx.commit().await?;
            self.publish(EntityTable::Instance, ChangeKind::Updated, updated.name.clone());
            Ok(updated)
        })
    }

    fn delete_instance(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM garm_instances WHERE name = $1").bind(&name).execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("instance '{name}' not found")));
            }
            self.publish(EntityTable::Instance, ChangeKind::Deleted, name);
            Ok(())
        })
    }

    fn append_instance_event(
        &self,
        event: InstanceEvent,
    ) -> Pin<Box<dyn Future<Output = Result<InstanceEvent>> + Send + '_>> {
        Box::pin(async move {
            let level = match event.level {
                EventLevel::Info => "info",
                EventLevel::Warning => "warning",
                EventLevel::Error => "error",
            };
            let row = sqlx::query(
                "INSERT INTO garm_instance_events (id, instance_name, kind, level, message)
                 VALUES ($1, $2, $3, $4, $5) RETURNING *",
            )
            .bind(event.id)
            .bind(&event.instance_name)
            .bind(&event.kind)
            .bind(level)
            .bind(&event.message)
            .fetch_one(&self.pool)
            .await?;
            instance_event_from_row(&row)
        })
    }

    fn claim_instances_for_provisioning(
        &self,
        pool_id: Uuid,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Instance>>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "WITH claimable AS (
                     SELECT name FROM garm_instances
                     WHERE parent_id = $1 AND runner_status = 'pending'
                     ORDER BY created_at ASC
                     LIMIT $2
                     FOR UPDATE SKIP LOCKED
                 )
                 UPDATE garm_instances SET runner_status = 'installing', updated_at = NOW()
                 WHERE name IN (SELECT name FROM claimable)
                 RETURNING *",
            )
            .bind(pool_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            let claimed: Vec<Instance> = rows.iter().map(instance_from_row).collect::<Result<_>>()?;
            for instance in &claimed {
                self.publish(EntityTable::Instance, ChangeKind::Updated, instance.name.clone());
            }
            Ok(claimed)
        })
    }

    fn upsert_job(&self, job: Job) -> Pin<Box<dyn Future<Output = Result<Job>> + Send + '_>> {
        Box::pin(async move {
            let status = match job.status {
                WorkflowJobStatus::Queued => "queued",
                WorkflowJobStatus::InProgress => "in_progress",
                WorkflowJobStatus::Completed => "completed",
            };
            let row = sqlx::query(
                "INSERT INTO garm_jobs (id, run_id, entity_id, status, labels, runner_name, conclusion)
                 VALUES ($1,$2,$3,$4,$5,$6,$7)
                 ON CONFLICT (id) DO UPDATE SET
                   status = EXCLUDED.status, labels = EXCLUDED.labels,
                   runner_name = EXCLUDED.runner_name, conclusion = EXCLUDED.conclusion,
                   updated_at = NOW()
                 RETURNING *",
            )
            .bind(job.id)
            .bind(job.run_id)
            .bind(job.entity_id)
            .bind(status)
            .bind(tags_to_json(&job.labels))
            .bind(&job.runner_name)
            .bind(&job.conclusion)
            .fetch_one(&self.pool)
            .await?;
            let saved = job_from_row(&row)?;
            self.publish(EntityTable::Job, ChangeKind::Updated, saved.id.to_string());
            Ok(saved)
        })
    }

    fn get_job(&self, id: i64) -> Pin<Box<dyn Future<Output = Result<Option<Job>>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM garm_jobs WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
            row.as_ref().map(job_from_row).transpose()
        })
    }

    fn create_template(&self, template: Template) -> Pin<Box<dyn Future<Output = Result<Template>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(
                "INSERT INTO garm_templates (id, name, owner, os_type, forge_kind, data)
                 VALUES ($1,$2,$3,$4,$5,$6) RETURNING *",
            )
            .bind(template.id)
            .bind(&template.name)
            .bind(&template.owner)
            .bind(template.os_type.as_str())
            .bind(template.forge_kind.as_str())
            .bind(&template.data)
            .fetch_one(&self.pool)
            .await?;
            template_from_row(&row)
        })
    }

    fn get_template(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<Template>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM garm_templates WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("template '{id}' not found")))?;
            template_from_row(&row)
        })
    }

    fn list_templates(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Template>>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT * FROM garm_templates ORDER BY owner, name").fetch_all(&self.pool).await?;
            rows.iter().map(template_from_row).collect()
        })
    }

    fn update_template(&self, template: Template) -> Pin<Box<dyn Future<Output = Result<Template>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(
                "UPDATE garm_templates SET name = $2, owner = $3, data = $4, updated_at = NOW()
                 WHERE id = $1 RETURNING *",
            )
            .bind(template.id)
            .bind(&template.name)
            .bind(&template.owner)
            .bind(&template.data)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("template '{}' not found", template.id)))?;
            template_from_row(&row)
        })
    }

    fn delete_template(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM garm_templates WHERE id = $1").bind(id).execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("template '{id}' not found")));
            }
            Ok(())
        })
    }

    fn create_file_object(
        &self,
        data: Vec<u8>,
        tags: BTreeMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = Result<FileObject>> + Send + '_>> {
        Box::pin(async move {
            garm_core::domain::validate_file_object_mutation(&tags)?;
            let sha256 = sha256_hex(&data);
            let size_bytes = data.len() as i64;
            let mut tx = self.pool.begin().await?;
            let row = sqlx::query(
                "INSERT INTO garm_file_objects (sha256, size_bytes, data) VALUES ($1,$2,$3) RETURNING *",
            )
            .bind(&sha256)
            .bind(size_bytes)
            .bind(&data)
            .fetch_one(&mut *tx)
            .await?;
            let id: i64 = row.get("id");
            for (key, value) in &tags {
                sqlx::query("INSERT INTO garm_file_object_tags (file_object_id, key, value) VALUES ($1,$2,$3)")
                    .bind(id)
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            self.publish(EntityTable::FileObject, ChangeKind::Created, id.to_string());
            Ok(FileObject {
                id,
                sha256,
                size_bytes: size_bytes as u64,
                tags,
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
        })
    }

    fn get_file_object(&self, id: i64) -> Pin<Box<dyn Future<Output = Result<FileObject>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM garm_file_objects WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("file object '{id}' not found")))?;
            let tags = self.file_object_tags(id).await?;
            file_object_from_row(&row, tags)
        })
    }

    fn read_file_object_data(&self, id: i64) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT data FROM garm_file_objects WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("file object '{id}' not found")))?;
            Ok(row.get("data"))
        })
    }

    fn search_file_objects(
        &self,
        tags: BTreeMap<String, String>,
        limit: u32,
        offset: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<FileObject>>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT * FROM garm_file_objects ORDER BY id LIMIT $1 OFFSET $2",
            )
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;
            let mut results = Vec::new();
            for row in &rows {
                let id: i64 = row.get("id");
                let object_tags = self.file_object_tags(id).await?;
                if tags.iter().all(|(k, v)| object_tags.get(k) == Some(v)) {
                    results.push(file_object_from_row(row, object_tags)?);
                }
            }
            Ok(results)
        })
    }

    fn delete_file_object(&self, id: i64) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let tags = self.file_object_tags(id).await?;
            garm_core::domain::validate_file_object_mutation(&tags)?;
            let result = sqlx::query("DELETE FROM garm_file_objects WHERE id = $1").bind(id).execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("file object '{id}' not found")));
            }
            self.publish(EntityTable::FileObject, ChangeKind::Deleted, id.to_string());
            Ok(())
        })
    }
}

impl PgStore {
    fn entity_from_row_with_name(&self, row: &sqlx::postgres::PgRow, credentials_name: &str) -> Result<ForgeEntity> {
        let kind: String = row.get("kind");
        let owner: String = row.get("owner");
        let repo: Option<String> = row.get("repo");
        let entity_kind = match kind.as_str() {
            "repository" => EntityKind::Repository {
                owner,
                name: repo.ok_or_else(|| Error::Internal("repository entity missing repo column".into()))?,
            },
            "organization" => EntityKind::Organization { name: owner },
            "enterprise" => EntityKind::Enterprise { name: owner },
            other => return Err(Error::Internal(format!("unknown entity kind {other}"))),
        };
        let policy: String = row.get("pool_balancer_policy");
        Ok(ForgeEntity {
            id: row.get("id"),
            entity: entity_kind,
            endpoint_name: row.get("endpoint_name"),
            credentials_name: credentials_name.to_string(),
            webhook_secret: row.get("webhook_secret"),
            pool_balancer_policy: balancer_policy_from_str(&policy)?,
            status: EntityStatus {
                is_running: row.get("is_running"),
                failure_reason: row.get("failure_reason"),
            },
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_json() {
        let tags: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let json = tags_to_json(&tags);
        let back = tags_from_json(json).unwrap();
        assert_eq!(tags, back);
    }

    #[test]
    fn os_type_parses_known_values() {
        assert_eq!(os_type_from_str("linux").unwrap(), OsType::Linux);
        assert!(os_type_from_str("plan9").is_err());
    }

    #[test]
    fn balancer_policy_round_trips() {
        for p in [PoolBalancerPolicy::RoundRobin, PoolBalancerPolicy::Pack, PoolBalancerPolicy::None] {
            assert_eq!(balancer_policy_from_str(balancer_policy_as_str(p)).unwrap(), p);
        }
    }
}
