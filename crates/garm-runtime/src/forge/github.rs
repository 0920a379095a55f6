//! Github [`ForgeClient`] (§6). Supports both personal-access-token and
//! GitHub App credentials; scale-set operations are implemented since
//! scale sets are a github-native feature (§3, §6).

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use garm_core::domain::{CredentialSecret, EntityKind};
use garm_core::forge::{
    ForgeClient, ForgeRunner, RegistrationToken, RunnerApplication, ScaleSetMessage, WebhookInfo,
};
use garm_core::{Error, Result};

fn scope_path(entity: &EntityKind) -> String {
    match entity {
        EntityKind::Repository { owner, name } => format!("repos/{owner}/{name}"),
        EntityKind::Organization { name } => format!("orgs/{name}"),
        EntityKind::Enterprise { name } => format!("enterprises/{name}"),
    }
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
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
    labels: Vec<RunnerLabelWire>,
}

#[derive(Debug, Deserialize)]
struct RunnerLabelWire {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RunnerListResponse {
    runners: Vec<RunnerWire>,
}

#[derive(Debug, Deserialize)]
struct JitConfigResponse {
    runner: RunnerWire,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
struct WebhookConfigWire {
    url: String,
    content_type: String,
    insecure_ssl: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct WebhookWire {
    id: i64,
    active: bool,
    events: Vec<String>,
    config: WebhookConfigWire,
}

#[derive(Debug, Deserialize)]
struct ScaleSetWire {
    id: i64,
}

/// Authenticates either with a static personal access token or by minting
/// short-lived GitHub App installation tokens, cached until a minute
/// before expiry.
enum AuthMode {
    PersonalAccessToken(String),
    GithubApp { app_id: u64, installation_id: u64, private_key_pem: String, cache: Mutex<Option<(String, DateTime<Utc>)>> },
}

pub struct GithubForgeClient {
    http: reqwest::Client,
    base_url: String,
    auth: AuthMode,
}

impl GithubForgeClient {
    pub fn new(base_url: impl Into<String>, secret: CredentialSecret) -> Self {
        let auth = match secret {
            CredentialSecret::PersonalAccessToken { token } => AuthMode::PersonalAccessToken(token),
            CredentialSecret::GithubApp { app_id, installation_id, private_key_pem } => {
                AuthMode::GithubApp { app_id, installation_id, private_key_pem, cache: Mutex::new(None) }
            }
        };
        Self { http: reqwest::Client::new(), base_url: base_url.into().trim_end_matches('/').to_string(), auth }
    }

    async fn token(&self) -> Result<String> {
        match &self.auth {
            AuthMode::PersonalAccessToken(token) => Ok(token.clone()),
            AuthMode::GithubApp { app_id, installation_id, private_key_pem, cache } => {
                let mut guard = cache.lock().await;
                if let Some((token, expires_at)) = guard.as_ref() {
                    if *expires_at > Utc::now() + ChronoDuration::seconds(60) {
                        return Ok(token.clone());
                    }
                }
                let now = Utc::now();
                let claims = AppClaims {
                    iat: now.timestamp() - 60,
                    exp: (now + ChronoDuration::minutes(9)).timestamp(),
                    iss: app_id.to_string(),
                };
                let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
                    .map_err(|e| Error::Internal(format!("invalid github app private key: {e}")))?;
                let jwt = encode(&Header::new(Algorithm::RS256), &claims, &key)
                    .map_err(|e| Error::Internal(format!("failed to sign github app jwt: {e}")))?;

                let resp: TokenResponse = self
                    .http
                    .post(format!("{}/app/installations/{installation_id}/access_tokens", self.base_url))
                    .bearer_auth(jwt)
                    .header("Accept", "application/vnd.github+json")
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;

                *guard = Some((resp.token.clone(), resp.expires_at));
                Ok(resp.token)
            }
        }
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let token = self.token().await?;
        let resp = self
            .http
            .get(format!("{}/{path}", self.base_url))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await?;
        Ok(resp)
    }

    async fn post<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<T> {
        let token = self.token().await?;
        let resp = self
            .http
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await?;
        Ok(resp)
    }

    async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let token = self.token().await?;
        self.http
            .patch(format!("{}/{path}", self.base_url))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let token = self.token().await?;
        self.http
            .delete(format!("{}/{path}", self.base_url))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl ForgeClient for GithubForgeClient {
    fn issue_registration_token(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<RegistrationToken>> + Send + '_>> {
        let scope = scope_path(entity);
        Box::pin(async move {
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
            let body = serde_json::json!({
                "name": name,
                "runner_group_id": 1,
                "labels": labels,
                "work_folder": "_work",
            });
            let resp: JitConfigResponse =
                self.post(&format!("{scope}/actions/runners/generate-jitconfig"), &body).await?;
            Ok(ForgeRunner {
                id: resp.runner.id,
                name: resp.runner.name,
                busy: resp.runner.busy,
                labels: resp.runner.labels.into_iter().map(|l| l.name).collect(),
            })
        })
    }

    fn deregister_runner(
        &self,
        entity: &EntityKind,
        runner_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let scope = scope_path(entity);
        Box::pin(async move { self.delete(&format!("{scope}/actions/runners/{runner_id}")).await })
    }

    fn list_runners(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeRunner>>> + Send + '_>> {
        let scope = scope_path(entity);
        Box::pin(async move {
            let resp: RunnerListResponse = self.get(&format!("{scope}/actions/runners")).await?;
            Ok(resp
                .runners
                .into_iter()
                .map(|w| ForgeRunner {
                    id: w.id,
                    name: w.name,
                    busy: w.busy,
                    labels: w.labels.into_iter().map(|l| l.name).collect(),
                })
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
            let existing: Vec<WebhookWire> = self.get(&format!("{scope}/hooks")).await?;
            if let Some(hook) = existing.into_iter().find(|h| h.config.url == callback_url) {
                return Ok(WebhookInfo {
                    id: hook.id,
                    url: hook.config.url,
                    active: hook.active,
                    events: hook.events,
                    insecure_ssl: hook.config.insecure_ssl != "0",
                });
            }

            let body = serde_json::json!({
                "name": "web",
                "active": true,
                "events": ["workflow_job"],
                "config": {
                    "url": callback_url,
                    "content_type": "json",
                    "secret": secret,
                    "insecure_ssl": "0",
                },
            });
            let hook: WebhookWire = self.post(&format!("{scope}/hooks"), &body).await?;
            Ok(WebhookInfo {
                id: hook.id,
                url: hook.config.url,
                active: hook.active,
                events: hook.events,
                insecure_ssl: hook.config.insecure_ssl != "0",
            })
        })
    }

    fn get_webhook_info(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookInfo>>> + Send + '_>> {
        let scope = scope_path(entity);
        Box::pin(async move {
            let hooks: Vec<WebhookWire> = self.get(&format!("{scope}/hooks")).await?;
            Ok(hooks.into_iter().find(|h| h.events.iter().any(|e| e == "workflow_job")).map(|hook| WebhookInfo {
                id: hook.id,
                url: hook.config.url,
                active: hook.active,
                events: hook.events,
                insecure_ssl: hook.config.insecure_ssl != "0",
            }))
        })
    }

    fn uninstall_webhook(&self, entity: &EntityKind) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let scope = scope_path(entity);
        Box::pin(async move {
            let hooks: Vec<WebhookWire> = self.get(&format!("{scope}/hooks")).await?;
            let Some(hook) = hooks.into_iter().find(|h| h.events.iter().any(|e| e == "workflow_job")) else {
                return Ok(());
            };
            self.delete(&format!("{scope}/hooks/{}", hook.id)).await
        })
    }

    fn create_scale_set(
        &self,
        entity: &EntityKind,
        name: &str,
        runner_group_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
        let scope = scope_path(entity);
        let name = name.to_string();
        Box::pin(async move {
            let body = serde_json::json!({ "name": name, "runner_group_id": runner_group_id });
            let resp: ScaleSetWire = self.post(&format!("{scope}/actions/runner-scale-sets"), &body).await?;
            Ok(resp.id)
        })
    }

    fn update_scale_set(
        &self,
        entity: &EntityKind,
        scale_set_id: i64,
        name: &str,
        runner_group_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let scope = scope_path(entity);
        let name = name.to_string();
        Box::pin(async move {
            let body = serde_json::json!({ "name": name, "runner_group_id": runner_group_id });
            self.patch(&format!("{scope}/actions/runner-scale-sets/{scale_set_id}"), &body).await
        })
    }

    fn delete_scale_set(
        &self,
        entity: &EntityKind,
        scale_set_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let scope = scope_path(entity);
        Box::pin(async move { self.delete(&format!("{scope}/actions/runner-scale-sets/{scale_set_id}")).await })
    }

    fn poll_scale_set_messages(
        &self,
        entity: &EntityKind,
        scale_set_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ScaleSetMessage>>> + Send + '_>> {
        #[derive(Debug, Deserialize)]
        struct MessageWire {
            #[serde(rename = "messageId")]
            message_id: i64,
            #[serde(rename = "acquireCount", default)]
            acquire_count: u32,
        }
        #[derive(Debug, Deserialize)]
        struct MessagesResponse {
            #[serde(default)]
            messages: Vec<MessageWire>,
        }

        let scope = scope_path(entity);
        Box::pin(async move {
            let resp: MessagesResponse =
                self.get(&format!("{scope}/actions/runner-scale-sets/{scale_set_id}/message")).await?;
            Ok(resp
                .messages
                .into_iter()
                .map(|m| ScaleSetMessage { message_id: m.message_id, acquire_count: m.acquire_count })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_path_for_repository() {
        let entity = EntityKind::Repository { owner: "acme".into(), name: "widget".into() };
        assert_eq!(scope_path(&entity), "repos/acme/widget");
    }

    #[test]
    fn scope_path_for_organization() {
        let entity = EntityKind::Organization { name: "acme".into() };
        assert_eq!(scope_path(&entity), "orgs/acme");
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let client = GithubForgeClient::new(
            "https://api.github.com/",
            CredentialSecret::PersonalAccessToken { token: "x".into() },
        );
        assert_eq!(client.base_url, "https://api.github.com");
    }
}
