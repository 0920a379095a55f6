//! Testing utilities (§4.11).
//!
//! An in-memory [`StoreGateway`](crate::store::StoreGateway) and scriptable
//! [`ProviderAdapter`](crate::provider::ProviderAdapter)/
//! [`ForgeClient`](crate::forge::ForgeClient) doubles so pool manager and
//! controller logic can be exercised without a running Postgres instance or
//! network access to a real forge.
//!
//! Following sqlx's own testing philosophy, integration tests that exercise
//! the real `garm-runtime` Postgres implementation are preferred over
//! mocking the database; these doubles exist for unit-level coverage of
//! `garm-core` control-flow that doesn't need a real transaction.

mod memory_store;
mod mock_forge;
mod mock_provider;

pub use memory_store::MemoryStore;
pub use mock_forge::{MockForgeClient, ScriptedForgeResponse};
pub use mock_provider::{MockProviderAdapter, ScriptedProviderResponse};
