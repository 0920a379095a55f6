use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::domain::EntityKind;
use crate::Result;

/// A forge-issued short-lived registration token (§4.2 `RegistrationToken`,
/// §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationToken {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// One entry in the forge's runner-application download manifest (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerApplication {
    pub os: String,
    pub architecture: String,
    pub download_url: String,
    pub filename: String,
    pub sha256_checksum: Option<String>,
}

/// Webhook installation info returned by install/get (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookInfo {
    pub id: i64,
    pub url: String,
    pub active: bool,
    pub events: Vec<String>,
    pub insecure_ssl: bool,
}

/// A forge-side self-hosted runner record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeRunner {
    pub id: i64,
    pub name: String,
    pub busy: bool,
    pub labels: Vec<String>,
}

/// One message received from a scale-set's long-poll session: "acquire N
/// runners" (§4.2 worker task 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleSetMessage {
    pub message_id: i64,
    pub acquire_count: u32,
}

/// Wraps one forge's REST API (§6). Implementations exist for github and
/// gitea; scale-set operations are github-only and return
/// `Error::BadRequest` on gitea.
pub trait ForgeClient: Send + Sync {
    fn issue_registration_token(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<RegistrationToken>> + Send + '_>>;

    fn list_runner_applications(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RunnerApplication>>> + Send + '_>>;

    fn register_runner(
        &self,
        entity: &EntityKind,
        name: &str,
        labels: &[String],
    ) -> Pin<Box<dyn Future<Output = Result<ForgeRunner>> + Send + '_>>;

    /// A 404 on deregister is swallowed by the caller (§7).
    fn deregister_runner(
        &self,
        entity: &EntityKind,
        runner_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn list_runners(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeRunner>>> + Send + '_>>;

    /// Idempotent: if a webhook with this URL already exists it is
    /// returned unchanged rather than duplicated (§4.2, §8).
    fn install_webhook(
        &self,
        entity: &EntityKind,
        callback_url: &str,
        secret: &str,
    ) -> Pin<Box<dyn Future<Output = Result<WebhookInfo>> + Send + '_>>;

    fn get_webhook_info(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookInfo>>> + Send + '_>>;

    fn uninstall_webhook(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Github-only. Gitea implementations return `Error::BadRequest`.
    fn create_scale_set(
        &self,
        entity: &EntityKind,
        name: &str,
        runner_group_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>>;

    fn update_scale_set(
        &self,
        entity: &EntityKind,
        scale_set_id: i64,
        name: &str,
        runner_group_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn delete_scale_set(
        &self,
        entity: &EntityKind,
        scale_set_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Opens/polls one long-poll session for a scale set, returning
    /// whatever messages are available right now (may be empty).
    fn poll_scale_set_messages(
        &self,
        entity: &EntityKind,
        scale_set_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ScaleSetMessage>>> + Send + '_>>;
}
