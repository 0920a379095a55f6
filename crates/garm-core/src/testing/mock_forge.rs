use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::domain::EntityKind;
use crate::error::Error;
use crate::forge::{ForgeClient, ForgeRunner, RegistrationToken, RunnerApplication, ScaleSetMessage, WebhookInfo};
use crate::Result;

/// One scripted response for a [`MockForgeClient`] call.
pub enum ScriptedForgeResponse {
    Token(RegistrationToken),
    Applications(Vec<RunnerApplication>),
    Runner(ForgeRunner),
    Runners(Vec<ForgeRunner>),
    Webhook(WebhookInfo),
    MaybeWebhook(Option<WebhookInfo>),
    ScaleSetId(i64),
    Messages(Vec<ScaleSetMessage>),
    Ok,
    Err(Error),
}

#[derive(Default)]
struct Queues {
    issue_token: VecDeque<ScriptedForgeResponse>,
    list_apps: VecDeque<ScriptedForgeResponse>,
    register: VecDeque<ScriptedForgeResponse>,
    deregister: VecDeque<ScriptedForgeResponse>,
    list_runners: VecDeque<ScriptedForgeResponse>,
    install_webhook: VecDeque<ScriptedForgeResponse>,
    get_webhook: VecDeque<ScriptedForgeResponse>,
    uninstall_webhook: VecDeque<ScriptedForgeResponse>,
    create_scale_set: VecDeque<ScriptedForgeResponse>,
    update_scale_set: VecDeque<ScriptedForgeResponse>,
    delete_scale_set: VecDeque<ScriptedForgeResponse>,
    poll_messages: VecDeque<ScriptedForgeResponse>,
}

/// A [`ForgeClient`] double driven by pre-scripted responses (§4.11, §6).
///
/// `supports_scale_sets` controls whether scale-set methods return
/// `Error::BadRequest` unconditionally, mirroring a gitea endpoint, or
/// consult the scripted queue like a github endpoint.
#[derive(Clone)]
pub struct MockForgeClient {
    queues: Arc<Mutex<Queues>>,
    calls: Arc<Mutex<Vec<String>>>,
    supports_scale_sets: bool,
}

impl MockForgeClient {
    pub fn new(supports_scale_sets: bool) -> Self {
        Self {
            queues: Arc::new(Mutex::new(Queues::default())),
            calls: Arc::new(Mutex::new(Vec::new())),
            supports_scale_sets,
        }
    }

    pub fn push_issue_registration_token(&self, response: ScriptedForgeResponse) {
        self.queues.lock().unwrap().issue_token.push_back(response);
    }

    pub fn push_install_webhook(&self, response: ScriptedForgeResponse) {
        self.queues.lock().unwrap().install_webhook.push_back(response);
    }

    pub fn push_get_webhook_info(&self, response: ScriptedForgeResponse) {
        self.queues.lock().unwrap().get_webhook.push_back(response);
    }

    pub fn push_list_runners(&self, response: ScriptedForgeResponse) {
        self.queues.lock().unwrap().list_runners.push_back(response);
    }

    pub fn push_list_runner_applications(&self, response: ScriptedForgeResponse) {
        self.queues.lock().unwrap().list_apps.push_back(response);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn pop(queue: &mut VecDeque<ScriptedForgeResponse>) -> Result<ScriptedForgeResponse> {
        queue
            .pop_front()
            .ok_or_else(|| Error::Internal("mock forge client: no scripted response queued".into()))
    }
}

impl ForgeClient for MockForgeClient {
    fn issue_registration_token(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<RegistrationToken>> + Send + '_>> {
        self.record(format!("issue_registration_token {}", entity.identifier()));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().issue_token)? {
                ScriptedForgeResponse::Token(t) => Ok(t),
                ScriptedForgeResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock forge client: wrong response kind scripted".into())),
            }
        })
    }

    fn list_runner_applications(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RunnerApplication>>> + Send + '_>> {
        self.record(format!("list_runner_applications {}", entity.identifier()));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().list_apps)? {
                ScriptedForgeResponse::Applications(a) => Ok(a),
                ScriptedForgeResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock forge client: wrong response kind scripted".into())),
            }
        })
    }

    fn register_runner(
        &self,
        entity: &EntityKind,
        name: &str,
        _labels: &[String],
    ) -> Pin<Box<dyn Future<Output = Result<ForgeRunner>> + Send + '_>> {
        self.record(format!("register_runner {} {name}", entity.identifier()));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().register)? {
                ScriptedForgeResponse::Runner(r) => Ok(r),
                ScriptedForgeResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock forge client: wrong response kind scripted".into())),
            }
        })
    }

    fn deregister_runner(
        &self,
        entity: &EntityKind,
        runner_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.record(format!("deregister_runner {} {runner_id}", entity.identifier()));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().deregister)? {
                ScriptedForgeResponse::Ok => Ok(()),
                ScriptedForgeResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock forge client: wrong response kind scripted".into())),
            }
        })
    }

    fn list_runners(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeRunner>>> + Send + '_>> {
        self.record(format!("list_runners {}", entity.identifier()));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().list_runners)? {
                ScriptedForgeResponse::Runners(r) => Ok(r),
                ScriptedForgeResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock forge client: wrong response kind scripted".into())),
            }
        })
    }

    fn install_webhook(
        &self,
        entity: &EntityKind,
        _callback_url: &str,
        _secret: &str,
    ) -> Pin<Box<dyn Future<Output = Result<WebhookInfo>> + Send + '_>> {
        self.record(format!("install_webhook {}", entity.identifier()));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().install_webhook)? {
                ScriptedForgeResponse::Webhook(w) => Ok(w),
                ScriptedForgeResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock forge client: wrong response kind scripted".into())),
            }
        })
    }

    fn get_webhook_info(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookInfo>>> + Send + '_>> {
        self.record(format!("get_webhook_info {}", entity.identifier()));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().get_webhook)? {
                ScriptedForgeResponse::MaybeWebhook(w) => Ok(w),
                ScriptedForgeResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock forge client: wrong response kind scripted".into())),
            }
        })
    }

    fn uninstall_webhook(
        &self,
        entity: &EntityKind,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.record(format!("uninstall_webhook {}", entity.identifier()));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().uninstall_webhook)? {
                ScriptedForgeResponse::Ok => Ok(()),
                ScriptedForgeResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock forge client: wrong response kind scripted".into())),
            }
        })
    }

    fn create_scale_set(
        &self,
        entity: &EntityKind,
        name: &str,
        _runner_group_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
        self.record(format!("create_scale_set {} {name}", entity.identifier()));
        Box::pin(async move {
            if !self.supports_scale_sets {
                return Err(Error::BadRequest("forge endpoint does not support scale sets".into()));
            }
            match Self::pop(&mut self.queues.lock().unwrap().create_scale_set)? {
                ScriptedForgeResponse::ScaleSetId(id) => Ok(id),
                ScriptedForgeResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock forge client: wrong response kind scripted".into())),
            }
        })
    }

    fn update_scale_set(
        &self,
        entity: &EntityKind,
        scale_set_id: i64,
        _name: &str,
        _runner_group_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.record(format!("update_scale_set {} {scale_set_id}", entity.identifier()));
        Box::pin(async move {
            if !self.supports_scale_sets {
                return Err(Error::BadRequest("forge endpoint does not support scale sets".into()));
            }
            match Self::pop(&mut self.queues.lock().unwrap().update_scale_set)? {
                ScriptedForgeResponse::Ok => Ok(()),
                ScriptedForgeResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock forge client: wrong response kind scripted".into())),
            }
        })
    }

    fn delete_scale_set(
        &self,
        entity: &EntityKind,
        scale_set_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.record(format!("delete_scale_set {} {scale_set_id}", entity.identifier()));
        Box::pin(async move {
            if !self.supports_scale_sets {
                return Err(Error::BadRequest("forge endpoint does not support scale sets".into()));
            }
            match Self::pop(&mut self.queues.lock().unwrap().delete_scale_set)? {
                ScriptedForgeResponse::Ok => Ok(()),
                ScriptedForgeResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock forge client: wrong response kind scripted".into())),
            }
        })
    }

    fn poll_scale_set_messages(
        &self,
        entity: &EntityKind,
        scale_set_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ScaleSetMessage>>> + Send + '_>> {
        self.record(format!("poll_scale_set_messages {} {scale_set_id}", entity.identifier()));
        Box::pin(async move {
            if !self.supports_scale_sets {
                return Err(Error::BadRequest("forge endpoint does not support scale sets".into()));
            }
            match Self::pop(&mut self.queues.lock().unwrap().poll_messages)? {
                ScriptedForgeResponse::Messages(m) => Ok(m),
                ScriptedForgeResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock forge client: wrong response kind scripted".into())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gitea_style_client_rejects_scale_sets() {
        let client = MockForgeClient::new(false);
        let entity = EntityKind::Organization { name: "acme".into() };
        let result = client.create_scale_set(&entity, "default", 1).await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn github_style_client_replays_scale_set_id() {
        let client = MockForgeClient::new(true);
        client.queues.lock().unwrap().create_scale_set.push_back(ScriptedForgeResponse::ScaleSetId(42));
        let entity = EntityKind::Organization { name: "acme".into() };
        let id = client.create_scale_set(&entity, "default", 1).await.unwrap();
        assert_eq!(id, 42);
    }
}
