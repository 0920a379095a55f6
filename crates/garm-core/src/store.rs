use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    FileObject, ForgeCredentials, ForgeEndpoint, ForgeEntity, Instance, InstanceEvent, Job, Pool,
    ScaleSet, Template,
};
use crate::Result;

/// Identifies which collection a [`ChangeEvent`] belongs to, for clients
/// that subscribe to a subset of the store (§4.7, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityTable {
    Endpoint,
    Credentials,
    ForgeEntity,
    Pool,
    ScaleSet,
    Instance,
    Job,
    FileObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A row-level change notification broadcast by the store gateway after a
/// committed write (§4.7). Subscribers (the Controller's per-entity
/// managers, the gateway's websocket fanout) use this to invalidate caches
/// or push live updates without re-polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: EntityTable,
    pub kind: ChangeKind,
    /// The row's primary/natural key, stringified (a `Uuid` or an instance
    /// name depending on `table`).
    pub key: String,
}

/// Broadcast channel over which a [`StoreGateway`] publishes [`ChangeEvent`]
/// values to subscribers. Mirrors the publish/subscribe pattern of a
/// `tokio::sync::broadcast` channel: a late subscriber sees only events
/// published after it subscribed, and a slow subscriber may be dropped by
/// the underlying channel implementation rather than block publishers.
pub trait ChangeBus: Send + Sync {
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChangeEvent>;
}

/// The single persistence seam between domain logic and whatever database
/// backs it (§3.1, §9 "Store Gateway"). All writes that must be atomic
/// with respect to concurrent pool managers are expressed as a single
/// method here (e.g. [`StoreGateway::claim_instance_for_provisioning`])
/// rather than as separate read-then-write calls, so a Postgres
/// implementation can use `SELECT ... FOR UPDATE SKIP LOCKED` or an
/// optimistic `WHERE updated_at = $n` guard internally.
///
/// Every mutating method publishes a [`ChangeEvent`] on success.
pub trait StoreGateway: ChangeBus + Send + Sync {
    // -- Endpoints --
    fn create_endpoint(
        &self,
        endpoint: ForgeEndpoint,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeEndpoint>> + Send + '_>>;
    fn get_endpoint(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeEndpoint>> + Send + '_>>;
    fn list_endpoints(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeEndpoint>>> + Send + '_>>;
    fn update_endpoint(
        &self,
        endpoint: ForgeEndpoint,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeEndpoint>> + Send + '_>>;
    fn delete_endpoint(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    // -- Credentials --
    fn create_credentials(
        &self,
        credentials: ForgeCredentials,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeCredentials>> + Send + '_>>;
    fn get_credentials(
        &self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeCredentials>> + Send + '_>>;
    fn list_credentials(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeCredentials>>> + Send + '_>>;
    fn update_credentials(
        &self,
        credentials: ForgeCredentials,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeCredentials>> + Send + '_>>;
    fn delete_credentials(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    // -- Forge entities --
    fn create_entity(
        &self,
        entity: ForgeEntity,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeEntity>> + Send + '_>>;
    fn get_entity(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<ForgeEntity>> + Send + '_>>;
    fn list_entities(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeEntity>>> + Send + '_>>;
    fn update_entity(
        &self,
        entity: ForgeEntity,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeEntity>> + Send + '_>>;
    fn delete_entity(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    // -- Pools --
    fn create_pool(&self, pool: Pool) -> Pin<Box<dyn Future<Output = Result<Pool>> + Send + '_>>;
    fn get_pool(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<Pool>> + Send + '_>>;
    fn list_pools(
        &self,
        entity_id: Option<Uuid>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Pool>>> + Send + '_>>;
    fn update_pool(&self, pool: Pool) -> Pin<Box<dyn Future<Output = Result<Pool>> + Send + '_>>;
    fn delete_pool(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    // -- Scale sets --
    fn create_scale_set(
        &self,
        scale_set: ScaleSet,
    ) -> Pin<Box<dyn Future<Output = Result<ScaleSet>> + Send + '_>>;
    fn get_scale_set(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<ScaleSet>> + Send + '_>>;
    fn list_scale_sets(
        &self,
        entity_id: Option<Uuid>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ScaleSet>>> + Send + '_>>;
    fn update_scale_set(
        &self,
        scale_set: ScaleSet,
    ) -> Pin<Box<dyn Future<Output = Result<ScaleSet>> + Send + '_>>;
    fn delete_scale_set(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    // -- Instances --
    fn create_instance(
        &self,
        instance: Instance,
    ) -> Pin<Box<dyn Future<Output = Result<Instance>> + Send + '_>>;
    fn get_instance(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Instance>> + Send + '_>>;
    fn list_instances_for_pool(
        &self,
        pool_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Instance>>> + Send + '_>>;
    fn list_instances_for_scale_set(
        &self,
        scale_set_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Instance>>> + Send + '_>>;
    fn update_instance(
        &self,
        instance: Instance,
    ) -> Pin<Box<dyn Future<Output = Result<Instance>> + Send + '_>>;
    fn delete_instance(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
    fn append_instance_event(
        &self,
        event: InstanceEvent,
    ) -> Pin<Box<dyn Future<Output = Result<InstanceEvent>> + Send + '_>>;

    /// Atomically selects up to `limit` instances that are `pending` and not
    /// already claimed by another provisioning worker, marking them claimed
    /// in the same transaction (`SELECT ... FOR UPDATE SKIP LOCKED`). Used
    /// by the provisioning queue worker (§4.2 worker task 7) so that two
    /// pool managers racing on the same pool never both provision the same
    /// instance row.
    fn claim_instances_for_provisioning(
        &self,
        pool_id: Uuid,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Instance>>> + Send + '_>>;

    // -- Jobs --
    fn upsert_job(&self, job: Job) -> Pin<Box<dyn Future<Output = Result<Job>> + Send + '_>>;
    fn get_job(&self, id: i64) -> Pin<Box<dyn Future<Output = Result<Option<Job>>> + Send + '_>>;

    // -- Templates --
    fn create_template(
        &self,
        template: Template,
    ) -> Pin<Box<dyn Future<Output = Result<Template>> + Send + '_>>;
    fn get_template(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<Template>> + Send + '_>>;
    fn list_templates(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Template>>> + Send + '_>>;
    /// Updates the existing template in place, keeping its `id` and
    /// resetting name/data (template restore rewrites a system template
    /// without minting a new row).
    fn update_template(
        &self,
        template: Template,
    ) -> Pin<Box<dyn Future<Output = Result<Template>> + Send + '_>>;
    fn delete_template(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    // -- File objects --
    /// Persists a new blob plus its tag set, computing `sha256`/`size_bytes`
    /// from `data`. Rejects the reserved `category=garm-agent` tag (§3).
    fn create_file_object(
        &self,
        data: Vec<u8>,
        tags: BTreeMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = Result<FileObject>> + Send + '_>>;
    fn get_file_object(&self, id: i64) -> Pin<Box<dyn Future<Output = Result<FileObject>> + Send + '_>>;
    /// Reads back the raw bytes for a file object, kept separate from
    /// [`StoreGateway::get_file_object`] so metadata listings never pull
    /// full blob contents across the wire.
    fn read_file_object_data(&self, id: i64) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + '_>>;
    /// Lists file objects whose tag set is a superset of `tags`, paginated.
    fn search_file_objects(
        &self,
        tags: BTreeMap<String, String>,
        limit: u32,
        offset: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<FileObject>>> + Send + '_>>;
    fn delete_file_object(&self, id: i64) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
