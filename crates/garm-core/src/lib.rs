pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod forge;
pub mod provider;
pub mod store;
pub mod webhook;

// Testing utilities - available when the "testing" feature is enabled or in test mode
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use auth::{AdminClaims, AdminClaimsBuilder, InstanceTokenClaims};
pub use config::GarmConfig;
pub use error::{Error, Result};
pub use forge::{
    ForgeClient, ForgeRunner, RegistrationToken, RunnerApplication, ScaleSetMessage, WebhookInfo,
};
pub use provider::{CreateInstanceParams, ProviderAdapter, ProviderCommand, ProviderInstance};
pub use store::{ChangeBus, ChangeEvent, ChangeKind, EntityTable, StoreGateway};
pub use webhook::{verify_signature, WebhookOwner, WorkflowJob, WorkflowJobPayload};
