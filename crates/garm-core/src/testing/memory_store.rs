use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::{
    sha256_hex, validate_file_object_mutation, FileObject, ForgeCredentials, ForgeEndpoint,
    ForgeEntity, Instance, InstanceEvent, Job, Pool, ScaleSet, Template,
};
use crate::error::Error;
use crate::store::{ChangeBus, ChangeEvent, ChangeKind, EntityTable, StoreGateway};
use crate::Result;

#[derive(Default)]
struct Tables {
    endpoints: HashMap<String, ForgeEndpoint>,
    credentials: HashMap<Uuid, ForgeCredentials>,
    entities: HashMap<Uuid, ForgeEntity>,
    pools: HashMap<Uuid, Pool>,
    scale_sets: HashMap<Uuid, ScaleSet>,
    instances: HashMap<String, Instance>,
    instance_events: Vec<InstanceEvent>,
    jobs: HashMap<i64, Job>,
    templates: HashMap<Uuid, Template>,
    file_objects: HashMap<i64, (FileObject, Vec<u8>)>,
    next_file_object_id: i64,
}

/// An in-memory [`StoreGateway`] for unit tests that exercise pool manager
/// or controller logic without a Postgres instance (§4.11). Not
/// transactional and not safe for concurrent callers racing on the same
/// key — [`MemoryStore::claim_instances_for_provisioning`] simply filters
/// rather than using `FOR UPDATE SKIP LOCKED` the way the real Postgres
/// implementation must.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            tables: Mutex::new(Tables::default()),
            changes: tx,
        }
    }

    fn publish(&self, table: EntityTable, kind: ChangeKind, key: String) {
        let _ = self.changes.send(ChangeEvent { table, kind, key });
    }
}

impl ChangeBus for MemoryStore {
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

impl StoreGateway for MemoryStore {
    fn create_endpoint(
        &self,
        endpoint: ForgeEndpoint,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeEndpoint>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if tables.endpoints.contains_key(&endpoint.name) {
                return Err(Error::Conflict(format!("endpoint {} already exists", endpoint.name)));
            }
            tables.endpoints.insert(endpoint.name.clone(), endpoint.clone());
            drop(tables);
            self.publish(EntityTable::Endpoint, ChangeKind::Created, endpoint.name.clone());
            Ok(endpoint)
        })
    }

    fn get_endpoint(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<ForgeEndpoint>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            self.tables
                .lock()
                .unwrap()
                .endpoints
                .get(&name)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("endpoint {name} not found")))
        })
    }

    fn list_endpoints(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeEndpoint>>> + Send + '_>> {
        Box::pin(async move { Ok(self.tables.lock().unwrap().endpoints.values().cloned().collect()) })
    }

    fn update_endpoint(
        &self,
        endpoint: ForgeEndpoint,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeEndpoint>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if !tables.endpoints.contains_key(&endpoint.name) {
                return Err(Error::NotFound(format!("endpoint {} not found", endpoint.name)));
            }
            tables.endpoints.insert(endpoint.name.clone(), endpoint.clone());
            drop(tables);
            self.publish(EntityTable::Endpoint, ChangeKind::Updated, endpoint.name.clone());
            Ok(endpoint)
        })
    }

    fn delete_endpoint(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if tables.endpoints.remove(&name).is_none() {
                return Err(Error::NotFound(format!("endpoint {name} not found")));
            }
            drop(tables);
            self.publish(EntityTable::Endpoint, ChangeKind::Deleted, name);
            Ok(())
        })
    }

    fn create_credentials(
        &self,
        credentials: ForgeCredentials,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeCredentials>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if tables.credentials.contains_key(&credentials.id) {
                return Err(Error::Conflict(format!("{} already exists", credentials.id)));
            }
            tables.credentials.insert(credentials.id, credentials.clone());
            drop(tables);
            self.publish(EntityTable::Credentials, ChangeKind::Created, credentials.id.to_string());
            Ok(credentials)
        })
    }

    fn get_credentials(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<ForgeCredentials>> + Send + '_>> {
        Box::pin(async move {
            self.tables
                .lock()
                .unwrap()
                .credentials
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("{id} not found")))
        })
    }

    fn update_credentials(
        &self,
        credentials: ForgeCredentials,
    ) -> Pin<Box<dyn Future<Output = Result<ForgeCredentials>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if !tables.credentials.contains_key(&credentials.id) {
                return Err(Error::NotFound(format!("{} not found", credentials.id)));
            }
            tables.credentials.insert(credentials.id, credentials.clone());
            drop(tables);
            self.publish(EntityTable::Credentials, ChangeKind::Updated, credentials.id.to_string());
            Ok(credentials)
        })
    }

    fn delete_credentials(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            let Some(credentials) = tables.credentials.get(&id).cloned() else {
                return Err(Error::NotFound(format!("{id} not found")));
            };
            let dependents = tables
                .entities
                .values()
                .filter(|e| e.endpoint_name == credentials.endpoint_name && e.credentials_name == credentials.name)
                .count();
            if dependents > 0 {
                return Err(Error::BadRequest(format!(
                    "credentials '{id}' cannot be deleted while referenced by {dependents} entity record(s)"
                )));
            }
            tables.credentials.remove(&id);
            drop(tables);
            self.publish(EntityTable::Credentials, ChangeKind::Deleted, id.to_string());
            Ok(())
        })
    }

    fn list_credentials(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeCredentials>>> + Send + '_>> {
        Box::pin(async move { Ok(self.tables.lock().unwrap().credentials.values().cloned().collect()) })
    }

    fn create_entity(&self, entity: ForgeEntity) -> Pin<Box<dyn Future<Output = Result<ForgeEntity>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if tables.entities.contains_key(&entity.id) {
                return Err(Error::Conflict(format!("{} already exists", entity.id)));
            }
            tables.entities.insert(entity.id, entity.clone());
            drop(tables);
            self.publish(EntityTable::ForgeEntity, ChangeKind::Created, entity.id.to_string());
            Ok(entity)
        })
    }

    fn get_entity(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<ForgeEntity>> + Send + '_>> {
        Box::pin(async move {
            self.tables
                .lock()
                .unwrap()
                .entities
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("{id} not found")))
        })
    }

    fn update_entity(&self, entity: ForgeEntity) -> Pin<Box<dyn Future<Output = Result<ForgeEntity>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if !tables.entities.contains_key(&entity.id) {
                return Err(Error::NotFound(format!("{} not found", entity.id)));
            }
            tables.entities.insert(entity.id, entity.clone());
            drop(tables);
            self.publish(EntityTable::ForgeEntity, ChangeKind::Updated, entity.id.to_string());
            Ok(entity)
        })
    }

    fn delete_entity(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            let pools = tables.pools.values().filter(|p| p.entity_id == id).count();
            if pools > 0 {
                return Err(Error::BadRequest(format!("entity '{id}' cannot be deleted while it owns {pools} pool(s)")));
            }
            let scale_sets = tables.scale_sets.values().filter(|s| s.entity_id == id).count();
            if scale_sets > 0 {
                return Err(Error::BadRequest(format!(
                    "entity '{id}' cannot be deleted while it owns {scale_sets} scale set(s)"
                )));
            }
            if tables.entities.remove(&id).is_none() {
                return Err(Error::NotFound(format!("{id} not found")));
            }
            drop(tables);
            self.publish(EntityTable::ForgeEntity, ChangeKind::Deleted, id.to_string());
            Ok(())
        })
    }

    fn list_entities(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeEntity>>> + Send + '_>> {
        Box::pin(async move { Ok(self.tables.lock().unwrap().entities.values().cloned().collect()) })
    }

    fn create_pool(&self, pool: Pool) -> Pin<Box<dyn Future<Output = Result<Pool>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if tables.pools.contains_key(&pool.id) {
                return Err(Error::Conflict(format!("{} already exists", pool.id)));
            }
            tables.pools.insert(pool.id, pool.clone());
            drop(tables);
            self.publish(EntityTable::Pool, ChangeKind::Created, pool.id.to_string());
            Ok(pool)
        })
    }

    fn get_pool(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<Pool>> + Send + '_>> {
        Box::pin(async move {
            self.tables
                .lock()
                .unwrap()
                .pools
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("{id} not found")))
        })
    }

    fn update_pool(&self, pool: Pool) -> Pin<Box<dyn Future<Output = Result<Pool>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if !tables.pools.contains_key(&pool.id) {
                return Err(Error::NotFound(format!("{} not found", pool.id)));
            }
            tables.pools.insert(pool.id, pool.clone());
            drop(tables);
            self.publish(EntityTable::Pool, ChangeKind::Updated, pool.id.to_string());
            Ok(pool)
        })
    }

    fn delete_pool(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        use crate::domain::InstanceParent;
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            let instances =
                tables.instances.values().filter(|i| matches!(i.parent, InstanceParent::Pool(pid) if pid == id)).count();
            if instances > 0 {
                return Err(Error::BadRequest(format!(
                    "pool '{id}' cannot be deleted while it has {instances} live instance(s)"
                )));
            }
            if tables.pools.remove(&id).is_none() {
                return Err(Error::NotFound(format!("{id} not found")));
            }
            drop(tables);
            self.publish(EntityTable::Pool, ChangeKind::Deleted, id.to_string());
            Ok(())
        })
    }

    fn list_pools(
        &self,
        entity_id: Option<Uuid>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Pool>>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .pools
                .values()
                .filter(|p| entity_id.is_none_or(|id| p.entity_id == id))
                .cloned()
                .collect())
        })
    }

    fn create_scale_set(
        &self,
        scale_set: ScaleSet,
    ) -> Pin<Box<dyn Future<Output = Result<ScaleSet>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if tables.scale_sets.contains_key(&scale_set.id) {
                return Err(Error::Conflict(format!("{} already exists", scale_set.id)));
            }
            tables.scale_sets.insert(scale_set.id, scale_set.clone());
            drop(tables);
            self.publish(EntityTable::ScaleSet, ChangeKind::Created, scale_set.id.to_string());
            Ok(scale_set)
        })
    }

    fn get_scale_set(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<ScaleSet>> + Send + '_>> {
        Box::pin(async move {
            self.tables
                .lock()
                .unwrap()
                .scale_sets
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("{id} not found")))
        })
    }

    fn update_scale_set(
        &self,
        scale_set: ScaleSet,
    ) -> Pin<Box<dyn Future<Output = Result<ScaleSet>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if !tables.scale_sets.contains_key(&scale_set.id) {
                return Err(Error::NotFound(format!("{} not found", scale_set.id)));
            }
            tables.scale_sets.insert(scale_set.id, scale_set.clone());
            drop(tables);
            self.publish(EntityTable::ScaleSet, ChangeKind::Updated, scale_set.id.to_string());
            Ok(scale_set)
        })
    }

    fn delete_scale_set(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        use crate::domain::InstanceParent;
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            let instances = tables
                .instances
                .values()
                .filter(|i| matches!(i.parent, InstanceParent::ScaleSet(sid) if sid == id))
                .count();
            if instances > 0 {
                return Err(Error::BadRequest(format!(
                    "scale set '{id}' cannot be deleted while it has {instances} live instance(s)"
                )));
            }
            if tables.scale_sets.remove(&id).is_none() {
                return Err(Error::NotFound(format!("{id} not found")));
            }
            drop(tables);
            self.publish(EntityTable::ScaleSet, ChangeKind::Deleted, id.to_string());
            Ok(())
        })
    }

    fn list_scale_sets(
        &self,
        entity_id: Option<Uuid>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ScaleSet>>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .scale_sets
                .values()
                .filter(|s| entity_id.is_none_or(|id| s.entity_id == id))
                .cloned()
                .collect())
        })
    }

    fn create_instance(
        &self,
        instance: Instance,
    ) -> Pin<Box<dyn Future<Output = Result<Instance>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if tables.instances.contains_key(&instance.name) {
                return Err(Error::Conflict(format!("instance {} already exists", instance.name)));
            }
            tables.instances.insert(instance.name.clone(), instance.clone());
            drop(tables);
            self.publish(EntityTable::Instance, ChangeKind::Created, instance.name.clone());
            Ok(instance)
        })
    }

    fn get_instance(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<Instance>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            self.tables
                .lock()
                .unwrap()
                .instances
                .get(&name)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("instance {name} not found")))
        })
    }

    fn list_instances_for_pool(
        &self,
        pool_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Instance>>> + Send + '_>> {
        use crate::domain::InstanceParent;
        Box::pin(async move {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .instances
                .values()
                .filter(|i| matches!(i.parent, InstanceParent::Pool(id) if id == pool_id))
                .cloned()
                .collect())
        })
    }

    fn list_instances_for_scale_set(
        &self,
        scale_set_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Instance>>> + Send + '_>> {
        use crate::domain::InstanceParent;
        Box::pin(async move {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .instances
                .values()
                .filter(|i| matches!(i.parent, InstanceParent::ScaleSet(id) if id == scale_set_id))
                .cloned()
                .collect())
        })
    }

    fn update_instance(
        &self,
        instance: Instance,
    ) -> Pin<Box<dyn Future<Output = Result<Instance>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            let existing = tables
                .instances
                .get(&instance.name)
                .ok_or_else(|| Error::NotFound(format!("instance {} not found", instance.name)))?;
            if existing.updated_at != instance.updated_at {
                return Err(Error::Conflict(format!(
                    "instance {} was modified concurrently",
                    instance.name
                )));
            }
            let mut next = instance.clone();
            next.updated_at = chrono::Utc::now();
            tables.instances.insert(next.name.clone(), next.clone());
            drop(tables);
            self.publish(EntityTable::Instance, ChangeKind::Updated, next.name.clone());
            Ok(next)
        })
    }

    fn delete_instance(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if tables.instances.remove(&name).is_none() {
                return Err(Error::NotFound(format!("instance {name} not found")));
            }
            drop(tables);
            self.publish(EntityTable::Instance, ChangeKind::Deleted, name);
            Ok(())
        })
    }

    fn append_instance_event(
        &self,
        event: InstanceEvent,
    ) -> Pin<Box<dyn Future<Output = Result<InstanceEvent>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            tables.instance_events.push(event.clone());
            Ok(event)
        })
    }

    fn claim_instances_for_provisioning(
        &self,
        pool_id: Uuid,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Instance>>> + Send + '_>> {
        use crate::domain::{InstanceParent, RunnerStatus};
        Box::pin(async move {
            let tables = self.tables.lock().unwrap();
            Ok(tables
                .instances
                .values()
                .filter(|i| {
                    matches!(i.parent, InstanceParent::Pool(id) if id == pool_id)
                        && i.runner_status == RunnerStatus::Pending
                })
                .take(limit as usize)
                .cloned()
                .collect())
        })
    }

    fn upsert_job(&self, job: Job) -> Pin<Box<dyn Future<Output = Result<Job>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            tables.jobs.insert(job.id, job.clone());
            drop(tables);
            self.publish(EntityTable::Job, ChangeKind::Updated, job.id.to_string());
            Ok(job)
        })
    }

    fn get_job(&self, id: i64) -> Pin<Box<dyn Future<Output = Result<Option<Job>>> + Send + '_>> {
        Box::pin(async move { Ok(self.tables.lock().unwrap().jobs.get(&id).cloned()) })
    }

    fn create_template(
        &self,
        template: Template,
    ) -> Pin<Box<dyn Future<Output = Result<Template>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if tables.templates.contains_key(&template.id) {
                return Err(Error::Conflict(format!("template {} already exists", template.id)));
            }
            tables.templates.insert(template.id, template.clone());
            Ok(template)
        })
    }

    fn get_template(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<Template>> + Send + '_>> {
        Box::pin(async move {
            self.tables
                .lock()
                .unwrap()
                .templates
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("template {id} not found")))
        })
    }

    fn list_templates(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Template>>> + Send + '_>> {
        Box::pin(async move { Ok(self.tables.lock().unwrap().templates.values().cloned().collect()) })
    }

    fn update_template(&self, template: Template) -> Pin<Box<dyn Future<Output = Result<Template>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if !tables.templates.contains_key(&template.id) {
                return Err(Error::NotFound(format!("template {} not found", template.id)));
            }
            tables.templates.insert(template.id, template.clone());
            Ok(template)
        })
    }

    fn delete_template(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            if tables.templates.remove(&id).is_none() {
                return Err(Error::NotFound(format!("template {id} not found")));
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
            validate_file_object_mutation(&tags)?;
            let mut tables = self.tables.lock().unwrap();
            tables.next_file_object_id += 1;
            let id = tables.next_file_object_id;
            let now = chrono::Utc::now();
            let object = FileObject {
                id,
                sha256: sha256_hex(&data),
                size_bytes: data.len() as u64,
                tags,
                created_at: now,
                updated_at: now,
            };
            tables.file_objects.insert(id, (object.clone(), data));
            drop(tables);
            self.publish(EntityTable::FileObject, ChangeKind::Created, id.to_string());
            Ok(object)
        })
    }

    fn get_file_object(&self, id: i64) -> Pin<Box<dyn Future<Output = Result<FileObject>> + Send + '_>> {
        Box::pin(async move {
            self.tables
                .lock()
                .unwrap()
                .file_objects
                .get(&id)
                .map(|(object, _)| object.clone())
                .ok_or_else(|| Error::NotFound(format!("file object {id} not found")))
        })
    }

    fn read_file_object_data(&self, id: i64) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + '_>> {
        Box::pin(async move {
            self.tables
                .lock()
                .unwrap()
                .file_objects
                .get(&id)
                .map(|(_, data)| data.clone())
                .ok_or_else(|| Error::NotFound(format!("file object {id} not found")))
        })
    }

    fn search_file_objects(
        &self,
        tags: BTreeMap<String, String>,
        limit: u32,
        offset: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<FileObject>>> + Send + '_>> {
        Box::pin(async move {
            let tables = self.tables.lock().unwrap();
            let mut matches: Vec<FileObject> = tables
                .file_objects
                .values()
                .map(|(object, _)| object.clone())
                .filter(|object| tags.iter().all(|(k, v)| object.tags.get(k) == Some(v)))
                .collect();
            matches.sort_by_key(|object| object.id);
            Ok(matches.into_iter().skip(offset as usize).take(limit as usize).collect())
        })
    }

    fn delete_file_object(&self, id: i64) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().unwrap();
            let Some((object, _)) = tables.file_objects.get(&id) else {
                return Err(Error::NotFound(format!("file object {id} not found")));
            };
            validate_file_object_mutation(&object.tags)?;
            tables.file_objects.remove(&id);
            drop(tables);
            self.publish(EntityTable::FileObject, ChangeKind::Deleted, id.to_string());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKind, EntityStatus, ForgeEntity, InstanceParent, PoolBalancerPolicy};

    fn entity() -> ForgeEntity {
        let now = chrono::Utc::now();
        ForgeEntity {
            id: Uuid::new_v4(),
            entity: EntityKind::Organization { name: "acme".into() },
            endpoint_name: "gh-default".into(),
            credentials_name: "acme-creds".into(),
            webhook_secret: None,
            pool_balancer_policy: PoolBalancerPolicy::RoundRobin,
            status: EntityStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemoryStore::new();
        let e = entity();
        let created = store.create_entity(e.clone()).await.unwrap();
        let fetched = store.get_entity(created.id).await.unwrap();
        assert_eq!(fetched.id, e.id);
    }

    #[tokio::test]
    async fn duplicate_create_is_conflict() {
        let store = MemoryStore::new();
        let e = entity();
        store.create_entity(e.clone()).await.unwrap();
        let result = store.create_entity(e).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn subscriber_observes_published_change() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store.create_entity(entity()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.table, EntityTable::ForgeEntity);
        assert_eq!(event.kind, ChangeKind::Created);
    }

    #[tokio::test]
    async fn concurrent_update_conflict_is_detected() {
        let store = MemoryStore::new();
        let now = chrono::Utc::now();
        let instance = Instance {
            name: "garm-abc".into(),
            parent: InstanceParent::Pool(Uuid::new_v4()),
            provider_id: None,
            provider_name: "mock".into(),
            os_type: crate::domain::OsType::Linux,
            os_arch: crate::domain::OsArch::Amd64,
            runner_status: crate::domain::RunnerStatus::Pending,
            provider_status: crate::domain::ProviderStatus::Pending,
            ephemeral: true,
            token_fetched: false,
            jit_config: Default::default(),
            agent_id: None,
            job_id: None,
            status_message: None,
            created_at: now,
            updated_at: now,
        };
        store.create_instance(instance.clone()).await.unwrap();
        store.update_instance(instance.clone()).await.unwrap();
        // stale updated_at from before the first update
        let result = store.update_instance(instance).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }
}
