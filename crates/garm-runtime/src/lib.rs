pub mod controller;
pub mod forge;
pub mod gateway;
pub mod migrations;
pub mod observability;
pub mod pool_manager;
pub mod provider;
pub mod store;

pub use controller::Controller;
pub use forge::{GiteaForgeClient, GithubForgeClient};
pub use gateway::{AppState, AuthConfig, AuthContext, AuthMiddleware, GatewayConfig, GatewayServer, MetadataState, WebhookState};
pub use migrations::{get_builtin_migrations, load_migrations_from_dir, Migration, MigrationRunner};
pub use observability::init_tracing;
pub use pool_manager::{PoolManager, PoolManagerConfig};
pub use provider::ProcessProvider;
pub use store::PgStore;
