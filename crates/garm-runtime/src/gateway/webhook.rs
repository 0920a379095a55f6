//! Webhook ingress (§4.5). Unauthenticated at the HTTP layer — trust comes
//! entirely from the per-entity HMAC signature, validated here before the
//! payload ever reaches the Controller.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;

use garm_core::store::StoreGateway;
use garm_core::webhook::{verify_signature, WorkflowJobPayload};

use super::error::ApiError;
use crate::controller::Controller;

#[derive(Clone)]
pub struct WebhookState {
    pub store: Arc<dyn StoreGateway>,
    pub controller: Arc<Controller>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhooks/{endpoint_name}", post(webhook_handler))
        .with_state(state)
}

async fn webhook_handler(
    State(state): State<WebhookState>,
    Path(endpoint_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let mut payload: WorkflowJobPayload =
        serde_json::from_slice(&body).map_err(|e| garm_core::Error::BadRequest(format!("malformed webhook body: {e}")))?;
    payload.endpoint_name = endpoint_name;

    let entity_kind = payload.entity_kind();
    let entities = state.store.list_entities().await?;
    let entity = entities
        .into_iter()
        .find(|e| e.endpoint_name == payload.endpoint_name && e.entity == entity_kind)
        .ok_or_else(|| garm_core::Error::NotFound("no entity matches this webhook's owner/endpoint".into()))?;

    let signature = headers
        .get("x-hub-signature-256")
        .or_else(|| headers.get("x-hub-signature"))
        .and_then(|v| v.to_str().ok());
    verify_signature(entity.webhook_secret.as_deref().unwrap_or(""), &body, signature)?;

    state.controller.dispatch(&payload).await?;
    Ok(StatusCode::NO_CONTENT)
}
