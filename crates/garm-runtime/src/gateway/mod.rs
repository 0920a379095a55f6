//! Request Facade HTTP surface (§4.4, §4.5, §4.6).

mod auth;
mod error;
mod metadata;
mod routes;
mod server;
mod tracing;
mod webhook;

pub use auth::{AuthConfig, AuthContext, AuthMiddleware};
pub use error::ApiError;
pub use metadata::MetadataState;
pub use routes::AppState;
pub use server::{GatewayConfig, GatewayServer};
pub use webhook::WebhookState;
