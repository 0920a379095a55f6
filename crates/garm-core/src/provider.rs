use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::domain::{OsArch, OsType};
use crate::Result;

/// One command in the provider's fixed lifecycle command set (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCommand {
    CreateInstance,
    DeleteInstance,
    GetInstance,
    ListInstances,
    StartInstance,
    StopInstance,
    RemoveAllInstances,
}

impl ProviderCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateInstance => "CreateInstance",
            Self::DeleteInstance => "DeleteInstance",
            Self::GetInstance => "GetInstance",
            Self::ListInstances => "ListInstances",
            Self::StartInstance => "StartInstance",
            Self::StopInstance => "StopInstance",
            Self::RemoveAllInstances => "RemoveAllInstances",
        }
    }
}

/// JSON payload written to the provider's stdin for `CreateInstance` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceParams {
    pub name: String,
    pub pool_id: String,
    pub image: String,
    pub flavor: String,
    pub os_type: OsType,
    pub os_arch: OsArch,
    /// Cloud-init / user-data script produced by the template renderer,
    /// carrying the embedded instance bootstrap token (§6).
    pub user_data: String,
    pub extra_spec: serde_json::Value,
}

/// The provider's wire-format instance representation, returned on stdout
/// for `CreateInstance`/`GetInstance`/`ListInstances`/`StartInstance`/
/// `StopInstance` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstance {
    pub provider_id: String,
    pub name: String,
    pub status: String,
    pub address: Option<String>,
}

/// Translates between the core's instance record and a provider's wire
/// format by invoking an external binary (§6, §9 "Provider plugins as
/// external processes").
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn create_instance(
        &self,
        params: CreateInstanceParams,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderInstance>> + Send + '_>>;

    /// Provider `DeleteInstance` called twice on the same ID returns
    /// success both times (§8); a provider *not-found* is treated as
    /// success by the caller (§4.2, §7).
    fn delete_instance(
        &self,
        provider_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn get_instance(
        &self,
        provider_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderInstance>> + Send + '_>>;

    fn list_instances(
        &self,
        pool_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ProviderInstance>>> + Send + '_>>;

    fn start_instance(
        &self,
        provider_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn stop_instance(
        &self,
        provider_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn remove_all_instances(
        &self,
        pool_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
