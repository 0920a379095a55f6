//! Request Facade CRUD surface (§4.4). Every handler here runs behind
//! [`super::auth::auth_middleware`], so by the time a handler runs the
//! caller is already a validated admin.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use garm_core::domain::{EntityStatus, ForgeCredentials, ForgeEndpoint, ForgeEntity, Pool, ScaleSet, Template};
use garm_core::store::StoreGateway;

use super::error::ApiError;
use crate::controller::Controller;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StoreGateway>,
    pub controller: Arc<Controller>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/endpoints", get(list_endpoints).post(create_endpoint))
        .route(
            "/api/v1/endpoints/{name}",
            get(get_endpoint).put(update_endpoint).delete(delete_endpoint),
        )
        .route("/api/v1/credentials", get(list_credentials).post(create_credentials))
        .route(
            "/api/v1/credentials/{id}",
            get(get_credentials).put(update_credentials).delete(delete_credentials),
        )
        .route("/api/v1/entities", get(list_entities).post(create_entity))
        .route("/api/v1/entities/{id}", get(get_entity).delete(delete_entity))
        .route("/api/v1/pools", get(list_pools).post(create_pool))
        .route("/api/v1/pools/{id}", get(get_pool).put(update_pool).delete(delete_pool))
        .route("/api/v1/scalesets", get(list_scale_sets).post(create_scale_set))
        .route(
            "/api/v1/scalesets/{id}",
            get(get_scale_set).put(update_scale_set).delete(delete_scale_set),
        )
        .route("/api/v1/instances/{name}", get(get_instance).delete(force_delete_instance))
        .route("/api/v1/templates", get(list_templates))
        .route("/api/v1/templates/{id}", get(get_template))
        .with_state(state)
}

// -- Endpoints --

async fn list_endpoints(State(state): State<AppState>) -> Result<Json<Vec<ForgeEndpoint>>, ApiError> {
    Ok(Json(state.store.list_endpoints().await?))
}

async fn get_endpoint(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<ForgeEndpoint>, ApiError> {
    Ok(Json(state.store.get_endpoint(&name).await?))
}

async fn create_endpoint(State(state): State<AppState>, Json(endpoint): Json<ForgeEndpoint>) -> Result<Json<ForgeEndpoint>, ApiError> {
    Ok(Json(state.store.create_endpoint(endpoint).await?))
}

async fn update_endpoint(
    State(state): State<AppState>,
    Path(_name): Path<String>,
    Json(endpoint): Json<ForgeEndpoint>,
) -> Result<Json<ForgeEndpoint>, ApiError> {
    Ok(Json(state.store.update_endpoint(endpoint).await?))
}

async fn delete_endpoint(State(state): State<AppState>, Path(name): Path<String>) -> Result<(), ApiError> {
    state.store.delete_endpoint(&name).await?;
    Ok(())
}

// -- Credentials --

async fn list_credentials(State(state): State<AppState>) -> Result<Json<Vec<ForgeCredentials>>, ApiError> {
    Ok(Json(state.store.list_credentials().await?))
}

async fn get_credentials(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ForgeCredentials>, ApiError> {
    Ok(Json(state.store.get_credentials(id).await?))
}

async fn create_credentials(
    State(state): State<AppState>,
    Json(credentials): Json<ForgeCredentials>,
) -> Result<Json<ForgeCredentials>, ApiError> {
    credentials.validate()?;
    Ok(Json(state.store.create_credentials(credentials).await?))
}

async fn update_credentials(
    State(state): State<AppState>,
    Path(_id): Path<Uuid>,
    Json(credentials): Json<ForgeCredentials>,
) -> Result<Json<ForgeCredentials>, ApiError> {
    Ok(Json(state.store.update_credentials(credentials).await?))
}

async fn delete_credentials(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    state.store.delete_credentials(id).await?;
    Ok(())
}

// -- Forge entities --

#[derive(Serialize)]
struct EntityResponse {
    #[serde(flatten)]
    entity: ForgeEntity,
    manager_status: Option<EntityStatus>,
}

async fn attach_status(state: &AppState, entity: ForgeEntity) -> EntityResponse {
    let manager_status = state.controller.get_pool_manager(entity.id).await.ok();
    let manager_status = match manager_status {
        Some(manager) => Some(manager.status().await),
        None => None,
    };
    EntityResponse { entity, manager_status }
}

async fn list_entities(State(state): State<AppState>) -> Result<Json<Vec<EntityResponse>>, ApiError> {
    let entities = state.store.list_entities().await?;
    let mut responses = Vec::with_capacity(entities.len());
    for entity in entities {
        responses.push(attach_status(&state, entity).await);
    }
    Ok(Json(responses))
}

async fn get_entity(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<EntityResponse>, ApiError> {
    let entity = state.store.get_entity(id).await?;
    Ok(Json(attach_status(&state, entity).await))
}

async fn create_entity(State(state): State<AppState>, Json(mut entity): Json<ForgeEntity>) -> Result<Json<EntityResponse>, ApiError> {
    entity.id = Uuid::new_v4();
    entity.created_at = Utc::now();
    entity.updated_at = entity.created_at;
    entity.validate()?;
    let created = state.store.create_entity(entity).await?;
    let controller = state.controller.clone();
    let entity_id = created.id;
    if let Err(e) = controller.create_pool_manager(entity_id).await {
        if let Err(cleanup_err) = state.store.delete_entity(entity_id).await {
            tracing::error!(entity_id = %entity_id, error = %cleanup_err, "failed to roll back entity after manager start failure");
        }
        return Err(e.into());
    }
    Ok(Json(attach_status(&state, created).await))
}

async fn delete_entity(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    state.controller.delete_pool_manager(id).await?;
    state.store.delete_entity(id).await?;
    Ok(())
}

// -- Pools --

async fn list_pools(State(state): State<AppState>) -> Result<Json<Vec<Pool>>, ApiError> {
    Ok(Json(state.store.list_pools(None).await?))
}

async fn get_pool(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Pool>, ApiError> {
    Ok(Json(state.store.get_pool(id).await?))
}

async fn create_pool(State(state): State<AppState>, Json(mut pool): Json<Pool>) -> Result<Json<Pool>, ApiError> {
    pool.id = Uuid::new_v4();
    pool.created_at = Utc::now();
    pool.updated_at = pool.created_at;
    pool.validate()?;
    Ok(Json(state.store.create_pool(pool).await?))
}

async fn update_pool(State(state): State<AppState>, Path(_id): Path<Uuid>, Json(mut pool): Json<Pool>) -> Result<Json<Pool>, ApiError> {
    pool.updated_at = Utc::now();
    pool.validate()?;
    Ok(Json(state.store.update_pool(pool).await?))
}

async fn delete_pool(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    state.store.delete_pool(id).await?;
    Ok(())
}

// -- Scale sets --

async fn list_scale_sets(State(state): State<AppState>) -> Result<Json<Vec<ScaleSet>>, ApiError> {
    Ok(Json(state.store.list_scale_sets(None).await?))
}

async fn get_scale_set(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ScaleSet>, ApiError> {
    Ok(Json(state.store.get_scale_set(id).await?))
}

async fn create_scale_set(State(state): State<AppState>, Json(mut scale_set): Json<ScaleSet>) -> Result<Json<ScaleSet>, ApiError> {
    scale_set.id = Uuid::new_v4();
    scale_set.created_at = Utc::now();
    scale_set.updated_at = scale_set.created_at;
    scale_set.validate()?;
    Ok(Json(state.store.create_scale_set(scale_set).await?))
}

async fn update_scale_set(
    State(state): State<AppState>,
    Path(_id): Path<Uuid>,
    Json(mut scale_set): Json<ScaleSet>,
) -> Result<Json<ScaleSet>, ApiError> {
    scale_set.updated_at = Utc::now();
    scale_set.validate()?;
    Ok(Json(state.store.update_scale_set(scale_set).await?))
}

async fn delete_scale_set(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    let scale_set = state.store.get_scale_set(id).await?;
    scale_set.deletable()?;
    state.store.delete_scale_set(id).await?;
    Ok(())
}

// -- Instances --

async fn get_instance(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<garm_core::domain::Instance>, ApiError> {
    Ok(Json(state.store.get_instance(&name).await?))
}

async fn force_delete_instance(State(state): State<AppState>, Path(name): Path<String>) -> Result<(), ApiError> {
    let instance = state.store.get_instance(&name).await?;
    let entity_id = match instance.parent {
        garm_core::domain::InstanceParent::Pool(pool_id) => state.store.get_pool(pool_id).await?.entity_id,
        garm_core::domain::InstanceParent::ScaleSet(scale_set_id) => {
            state.store.get_scale_set(scale_set_id).await?.entity_id
        }
    };
    let manager = state.controller.get_pool_manager(entity_id).await?;
    manager.force_delete_runner(&name).await?;
    Ok(())
}

// -- Templates --

async fn list_templates(State(state): State<AppState>) -> Result<Json<Vec<Template>>, ApiError> {
    Ok(Json(state.store.list_templates().await?))
}

async fn get_template(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Template>, ApiError> {
    Ok(Json(state.store.get_template(id).await?))
}
