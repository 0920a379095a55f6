//! Gitea [`ForgeClient`] (§6). Gitea has no GitHub App equivalent, so it
//! only accepts a personal access token, and it has no scale-set feature
//! (§3 `ForgeKind::supports_scale_sets`), so every scale-set method
//! returns [`Error::BadRequest`].

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use garm_core::domain::{CredentialSecret, EntityKind};
use garm_core::forge::{
    ForgeClient, ForgeRunner, RegistrationToken, RunnerApplication, ScaleSetMessage, WebhookInfo,
};
use garm_core::{Error, Result};

fn scope_path(entity: &EntityKind) -> Result<String> {
    match entity {
        EntityKind::Repository { owner, name } => Ok(format!("repos/{owner}/{name}")),
        EntityKind::Organization { name } => Ok(format!("orgs/{name}")),
        EntityKind::Enterprise { .. } => {
            Err(Error::BadRequest("gitea has no enterprise-scoped actions API".into()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct RunnerDownloadWire {
    os: String,
    architecture: String,
    download_url: String,
    filename: String,
    sha256_checksum: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunnerWire {
    id: i64,
    name: String,
    busy: bool,
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RunnerListResponse {
    runners: Vec<RunnerWire>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WebhookConfigWire {
    url: String,
    #[serde(default)]
    content_type: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct WebhookWire {
    id: i64,
    active: bool,
    events: Vec<String>,
    config: WebhookConfigWire,
}

pub struct GiteaForgeClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl GiteaForgeClient {
    pub fn new(base_url: impl Into<String>, secret: CredentialSecret) -> Result<Self> {
        let token = match secret {
            CredentialSecret::PersonalAccessToken { token } => token,
            CredentialSecret::GithubApp { .. } => {
                return Err(Error::BadRequest("gitea credentials must be a personal access token".into()))
            }
        };
        Ok(Self { http: reqwest::Client::new(), base_url: base_url.into().trim_end_matches('/').to_string(), token })
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        Ok(self
            .http
            .get(format!("{}/api/v1/{path}", self.base_url))
            .header("Authorization", format!("token {}", self.token))
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await?)
    }

    async fn post<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<T> {
        Ok(self
            .http
            .post(format!("{}/api/v1/{path}", self.base_url))
            .header("Authorization", format!("token {}", self.token))
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.http
            .delete(format!("{}/api/v1/{path}", self.base_url))
            .header("Authorization", format!("token {}", self.token))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl ForgeClient for GiteaForgeClient {
    fn issue_registration_token(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<RegistrationToken>> + Send + '_>> {
        let scope = scope_path(entity);
        Box::pin(async move {
            let scope = scope?;
            let resp: TokenResponse =
                self.post(&format!("{scope}/actions/runners/registration-token"), &serde_json::json!({})).await?;
            Ok(RegistrationToken { token: resp.token, expires_at: resp.expires_at })
        })
    }

    fn list_runner_applications(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RunnerApplication>>> + Send + '_>> {
        let scope = scope_path(entity);
        Box::pin(async move {
            let scope = scope?;
            let wire: Vec<RunnerDownloadWire> = self.get(&format!("{scope}/actions/runners/downloads")).await?;
            Ok(wire
                .into_iter()
                .map(|w| RunnerApplication {
                    os: w.os,
                    architecture: w.architecture,
                    download_url: w.download_url,
                    filename: w.filename,
                    sha256_checksum: w.sha256_checksum,
                })
                .collect())
        })
    }

    fn register_runner(
        &self,
        entity: &EntityKind,
        name: &str,
        labels: &[String],
    ) -> Pin<Box<dyn Future<Output = Result<ForgeRunner>> + Send + '_>> {
        let scope = scope_path(entity);
        let name = name.to_string();
        let labels = labels.to_vec();
        Box::pin(async move {
            let scope = scope?;
            let body = serde_json::json!({ "name": name, "labels": labels });
            let wire: RunnerWire = self.post(&format!("{scope}/actions/runners"), &body).await?;
            Ok(ForgeRunner { id: wire.id, name: wire.name, busy: wire.busy, labels: wire.labels })
        })
    }

    fn deregister_runner(
        &self,
        entity: &EntityKind,
        runner_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let scope = scope_path(entity);
        Box::pin(async move {
            let scope = scope?;
            self.delete(&format!("{scope}/actions/runners/{runner_id}")).await
        })
    }

    fn list_runners(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeRunner>>> + Send + '_>> {
        let scope = scope_path(entity);
        Box::pin(async move {
            let scope = scope?;
            let resp: RunnerListResponse = self.get(&format!("{scope}/actions/runners")).await?;
            Ok(resp
                .runners
                .into_iter()
                .map(|w| ForgeRunner { id: w.id, name: w.name, busy: w.busy, labels: w.labels })
                .collect())
        })
    }

    fn install_webhook(
        &self,
        entity: &EntityKind,
        callback_url: &str,
        secret: &str,
    ) -> Pin<Box<dyn Future<Output = Result<WebhookInfo>> + Send + '_>> {
        let scope = scope_path(entity);
        let callback_url = callback_url.to_string();
        let secret = secret.to_string();
        Box::pin(async move {
            let scope = scope?;
            let existing: Vec<WebhookWire> = self.get(&format!("{scope}/hooks")).await?;
            if let Some(hook) = existing.into_iter().find(|h| h.config.url == callback_url) {
                return Ok(WebhookInfo {
                    id: hook.id,
                    url: hook.config.url,
                    active: hook.active,
                    events: hook.events,
                    insecure_ssl: false,
                });
            }

            let body = serde_json::json!({
                "type": "gitea",
                "active": true,
                "events": ["workflow_job"],
                "config": { "url": callback_url, "content_type": "json", "secret": secret },
            });
            let hook: WebhookWire = self.post(&format!("{scope}/hooks"), &body).await?;
            Ok(WebhookInfo {
                id: hook.id,
                url: hook.config.url,
                active: hook.active,
                events: hook.events,
                insecure_ssl: false,
            })
        })
    }

    fn get_webhook_info(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookInfo>>> + Send + '_>> {
        let scope = scope_path(entity);
        Box::pin(async move {
            let scope = scope?;
            let hooks: Vec<WebhookWire> = self.get(&format!("{scope}/hooks")).await?;
            Ok(hooks.into_iter().find(|h| h.events.iter().any(|e| e == "workflow_job")).map(|hook| WebhookInfo {
                id: hook.id,
                url: hook.config.url,
                active: hook.active,
                events: hook.events,
                insecure_ssl: false,
            }))
        })
    }

    fn uninstall_webhook(&self, entity: &EntityKind) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let scope = scope_path(entity);
        Box::pin(async move {
            let scope = scope?;
            let hooks: Vec<WebhookWire> = self.get(&format!("{scope}/hooks")).await?;
            let Some(hook) = hooks.into_iter().find(|h| h.events.iter().any(|e| e == "workflow_job")) else {
                return Ok(());
            };
            self.delete(&format!("{scope}/hooks/{}", hook.id)).await
        })
    }

    fn create_scale_set(
        &self,
        _entity: &EntityKind,
        _name: &str,
        _runner_group_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
        Box::pin(async { Err(Error::BadRequest("gitea does not support scale sets".into())) })
    }

    fn update_scale_set(
        &self,
        _entity: &EntityKind,
        _scale_set_id: i64,
        _name: &str,
        _runner_group_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Err(Error::BadRequest("gitea does not support scale sets".into())) })
    }

    fn delete_scale_set(
        &self,
        _entity: &EntityKind,
        _scale_set_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Err(Error::BadRequest("gitea does not support scale sets".into())) })
    }

    fn poll_scale_set_messages(
        &self,
        _entity: &EntityKind,
        _scale_set_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ScaleSetMessage>>> + Send + '_>> {
        Box::pin(async { Err(Error::BadRequest("gitea does not support scale sets".into())) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enterprise_scope_is_rejected() {
        let entity = EntityKind::Enterprise { name: "acme".into() };
        assert!(scope_path(&entity).is_err());
    }

    #[test]
    fn github_app_credentials_are_rejected() {
        let result = GiteaForgeClient::new(
            "https://gitea.example.com",
            CredentialSecret::GithubApp { app_id: 1, installation_id: 2, private_key_pem: "x".into() },
        );
        assert!(result.is_err());
    }
}
