//! Instance metadata service (§4.6). Every endpoint here authenticates with
//! the instance's short-lived bootstrap token instead of an admin JWT, and
//! only serves instances still in `pending`/`installing`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Serialize;

use garm_core::auth::InstanceTokenClaims;
use garm_core::domain::{builtin_script, FileObject, Instance, InstanceParent, RunnerStatus};
use garm_core::forge::RunnerApplication;
use garm_core::store::StoreGateway;
use garm_core::Error;

use super::error::ApiError;
use crate::controller::Controller;

#[derive(Clone)]
pub struct MetadataState {
    pub store: Arc<dyn StoreGateway>,
    pub controller: Arc<Controller>,
    pub jwt_secret: String,
}

pub fn router(state: MetadataState) -> Router {
    Router::new()
        .route("/instance/service-name", get(service_name))
        .route("/instance/systemd-unit", get(systemd_unit))
        .route("/instance/jit-config/{file}", get(jit_config))
        .route("/instance/credentials", get(registration_credentials))
        .route("/instance/ca-cert", get(ca_cert))
        .route("/instance/runner-tools", get(runner_tools))
        .route("/instance/install-script", get(install_script))
        .route("/instance/metadata", get(metadata))
        .with_state(state)
}

async fn authenticate(state: &MetadataState, headers: &HeaderMap) -> Result<Instance, ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| Error::Unauthorized("missing bootstrap token".into()))?;

    let mut validation = Validation::default();
    validation.set_required_spec_claims(&["exp", "sub"]);
    let claims = decode::<InstanceTokenClaims>(token, &DecodingKey::from_secret(state.jwt_secret.as_bytes()), &validation)
        .map_err(|e| Error::Unauthorized(format!("invalid bootstrap token: {e}")))?
        .claims;

    let instance = state.store.get_instance(&claims.sub).await?;
    if !matches!(instance.runner_status, RunnerStatus::Pending | RunnerStatus::Installing) {
        return Err(Error::Unauthorized("instance is no longer bootstrapping".into()).into());
    }
    Ok(instance)
}

async fn entity_id_for(state: &MetadataState, instance: &Instance) -> Result<uuid::Uuid, ApiError> {
    let entity_id = match instance.parent {
        InstanceParent::Pool(pool_id) => state.store.get_pool(pool_id).await?.entity_id,
        InstanceParent::ScaleSet(scale_set_id) => state.store.get_scale_set(scale_set_id).await?.entity_id,
    };
    Ok(entity_id)
}

async fn service_name(State(state): State<MetadataState>, headers: HeaderMap) -> Result<String, ApiError> {
    let instance = authenticate(&state, &headers).await?;
    let entity_id = entity_id_for(&state, &instance).await?;
    let entity = state.store.get_entity(entity_id).await?;
    Ok(entity.entity.runner_service_name())
}

async fn systemd_unit(State(state): State<MetadataState>, headers: HeaderMap) -> Result<String, ApiError> {
    let instance = authenticate(&state, &headers).await?;
    let entity_id = entity_id_for(&state, &instance).await?;
    let entity = state.store.get_entity(entity_id).await?;
    Ok(format!("{}.service", entity.entity.runner_service_name()))
}

async fn jit_config(
    State(state): State<MetadataState>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Result<String, ApiError> {
    let instance = authenticate(&state, &headers).await?;
    instance
        .jit_config
        .get(&file)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("no jit config file named '{file}'")).into())
}

#[derive(Serialize)]
struct CredentialsResponse {
    token: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

async fn registration_credentials(
    State(state): State<MetadataState>,
    headers: HeaderMap,
) -> Result<Json<CredentialsResponse>, ApiError> {
    let mut instance = authenticate(&state, &headers).await?;
    if !instance.can_fetch_registration_token() {
        return Err(Error::Unauthorized("registration token already issued for this instance".into()).into());
    }

    let entity_id = entity_id_for(&state, &instance).await?;
    let manager = state.controller.get_pool_manager(entity_id).await?;
    let token = manager.registration_token().await?;

    instance.token_fetched = true;
    instance.updated_at = chrono::Utc::now();
    state.store.update_instance(instance).await?;

    Ok(Json(CredentialsResponse {
        token: token.token,
        expires_at: token.expires_at,
    }))
}

async fn ca_cert(State(state): State<MetadataState>, headers: HeaderMap) -> Result<Vec<u8>, ApiError> {
    let instance = authenticate(&state, &headers).await?;
    let entity_id = entity_id_for(&state, &instance).await?;
    let manager = state.controller.get_pool_manager(entity_id).await?;
    Ok(manager.root_ca_bundle().unwrap_or_default())
}

async fn runner_tools(State(state): State<MetadataState>, headers: HeaderMap) -> Result<Json<Vec<RunnerApplication>>, ApiError> {
    let instance = authenticate(&state, &headers).await?;
    let entity_id = entity_id_for(&state, &instance).await?;
    let manager = state.controller.get_pool_manager(entity_id).await?;
    Ok(Json(manager.cached_tools().await.unwrap_or_default()))
}

/// Renders the bootstrap script an instance runs on first boot: the
/// pool's `template_id` if set, else the built-in default for the
/// instance's `(os_type, forge_kind)` (§4.7 "Template renderer").
async fn install_script(State(state): State<MetadataState>, headers: HeaderMap) -> Result<String, ApiError> {
    let instance = authenticate(&state, &headers).await?;
    let entity_id = entity_id_for(&state, &instance).await?;
    let entity = state.store.get_entity(entity_id).await?;
    let endpoint = state.store.get_endpoint(&entity.endpoint_name).await?;

    let template_id = match instance.parent {
        InstanceParent::Pool(pool_id) => state.store.get_pool(pool_id).await?.template_id,
        InstanceParent::ScaleSet(_) => None,
    };
    let data = match template_id {
        Some(id) => state.store.get_template(id).await?.data,
        None => builtin_script(instance.os_type, endpoint.kind).to_string(),
    };
    Ok(data)
}

#[derive(Serialize)]
struct InstanceMetadataResponse {
    runner_tools: Vec<RunnerApplication>,
    agent_tools: Vec<FileObject>,
}

/// Combined metadata listing: cached runner-application tools plus any
/// `category=garm-agent` file objects tagged for this instance's
/// `(os_type, forge_kind)` (§4.6, §6).
async fn metadata(State(state): State<MetadataState>, headers: HeaderMap) -> Result<Json<InstanceMetadataResponse>, ApiError> {
    let instance = authenticate(&state, &headers).await?;
    let entity_id = entity_id_for(&state, &instance).await?;
    let entity = state.store.get_entity(entity_id).await?;
    let endpoint = state.store.get_endpoint(&entity.endpoint_name).await?;
    let manager = state.controller.get_pool_manager(entity_id).await?;

    let mut tags = std::collections::BTreeMap::new();
    tags.insert(garm_core::domain::RESERVED_TAG_KEY.to_string(), garm_core::domain::RESERVED_TAG_VALUE.to_string());
    tags.insert("os_type".to_string(), instance.os_type.as_str().to_string());
    tags.insert("forge_kind".to_string(), endpoint.kind.as_str().to_string());
    let agent_tools = state.store.search_file_objects(tags, 100, 0).await.unwrap_or_default();

    Ok(Json(InstanceMetadataResponse {
        runner_tools: manager.cached_tools().await.unwrap_or_default(),
        agent_tools,
    }))
}
