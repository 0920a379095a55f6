use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use garm_core::store::StoreGateway;

use super::auth::{auth_middleware, AuthConfig, AuthMiddleware};
use super::metadata::{self, MetadataState};
use super::routes::{self, AppState};
use super::tracing::TracingState;
use super::webhook::{self, WebhookState};
use crate::controller::Controller;

/// Gateway server configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind the HTTP listener to, e.g. "0.0.0.0:9997".
    pub bind_address: String,
    /// Maximum number of connections.
    pub max_connections: usize,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Enable CORS.
    pub cors_enabled: bool,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Authentication configuration for the admin CRUD surface.
    pub auth: AuthConfig,
    /// Secret used to verify instance bootstrap tokens (§4.6).
    pub instance_jwt_secret: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9997".to_string(),
            max_connections: 10000,
            request_timeout_secs: 30,
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
            auth: AuthConfig::default(),
            instance_jwt_secret: String::new(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Gateway HTTP server: merges the admin CRUD surface, the webhook ingress,
/// and the instance metadata service behind a single listener (§4.4-§4.6).
pub struct GatewayServer {
    config: GatewayConfig,
    store: Arc<dyn StoreGateway>,
    controller: Arc<Controller>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, store: Arc<dyn StoreGateway>, controller: Arc<Controller>) -> Self {
        Self { config, store, controller }
    }

    /// Build the Axum router.
    pub fn router(&self) -> Router {
        let app_state = AppState {
            store: self.store.clone(),
            controller: self.controller.clone(),
        };
        let webhook_state = WebhookState {
            store: self.store.clone(),
            controller: self.controller.clone(),
        };
        let metadata_state = MetadataState {
            store: self.store.clone(),
            controller: self.controller.clone(),
            jwt_secret: self.config.instance_jwt_secret.clone(),
        };

        let cors = if self.config.cors_enabled {
            if self.config.cors_origins.contains(&"*".to_string()) {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                let origins: Vec<_> = self.config.cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
                CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
            }
        } else {
            CorsLayer::new()
        };

        let auth_middleware_state = Arc::new(AuthMiddleware::new(self.config.auth.clone()));

        // Admin CRUD surface sits behind the JWT auth middleware.
        let admin_router = routes::router(app_state).layer(ServiceBuilder::new().layer(
            middleware::from_fn_with_state(auth_middleware_state, auth_middleware),
        ));

        // Webhook ingress and the metadata service authenticate internally
        // (HMAC signature, bootstrap token), so neither carries the admin
        // auth middleware.
        let webhook_router = webhook::router(webhook_state);
        let metadata_router = metadata::router(metadata_state);

        Router::new()
            .route("/health", get(health_handler))
            .merge(admin_router)
            .merge(webhook_router)
            .merge(metadata_router)
            .layer(middleware::from_fn(tracing_middleware))
            .layer(cors)
    }

    /// Get the socket address to bind to.
    pub fn addr(&self) -> SocketAddr {
        self.config
            .bind_address
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 9997)))
    }

    /// Run the server (blocking).
    pub async fn run(self) -> Result<(), std::io::Error> {
        let addr = self.addr();
        let router = self.router();

        tracing::info!("Gateway server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await
    }
}

/// Health check handler.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Stamps every request with a [`TracingState`], propagating an inbound
/// `X-Trace-Id` header or minting a fresh one, and logs method/path/status/
/// latency once the handler returns.
async fn tracing_middleware(req: axum::extract::Request, next: axum::middleware::Next) -> axum::response::Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let inbound_trace_id = req
        .headers()
        .get(super::tracing::TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let state = match inbound_trace_id {
        Some(trace_id) => TracingState::with_trace_id(trace_id),
        None => TracingState::new(),
    };

    let mut req = req;
    req.extensions_mut().insert(state.clone());

    let mut response = next.run(req).await;

    let latency_ms = state.elapsed().as_millis();
    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        trace_id = %state.trace_id,
        latency_ms,
        "request handled"
    );

    if let Ok(header) = state.trace_id.parse() {
        response.headers_mut().insert(super::tracing::TRACE_ID_HEADER, header);
    }
    if let Ok(header) = state.request_id.parse() {
        response.headers_mut().insert(super::tracing::REQUEST_ID_HEADER, header);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_all_interfaces_with_cors_open() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:9997");
        assert_eq!(config.max_connections, 10000);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.cors_enabled);
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
        assert!(config.instance_jwt_secret.is_empty());
    }

    #[test]
    fn health_response_round_trips_through_json() {
        let resp = HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn health_handler_reports_current_crate_version() {
        let Json(resp) = health_handler().await;
        assert_eq!(resp.status, "healthy");
        assert_eq!(resp.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn malformed_bind_address_falls_back_to_default_port() {
        let fallback = "not-an-address"
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 9997)));
        assert_eq!(fallback, SocketAddr::from(([0, 0, 0, 0], 9997)));
    }
}
