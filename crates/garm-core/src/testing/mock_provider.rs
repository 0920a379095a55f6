use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::provider::{CreateInstanceParams, ProviderAdapter, ProviderInstance};
use crate::Result;

/// One scripted response for a [`MockProviderAdapter`] call, consumed in
/// FIFO order per method.
pub enum ScriptedProviderResponse {
    Instance(ProviderInstance),
    Instances(Vec<ProviderInstance>),
    Ok,
    Err(Error),
}

#[derive(Default)]
struct Queues {
    create: VecDeque<ScriptedProviderResponse>,
    delete: VecDeque<ScriptedProviderResponse>,
    get: VecDeque<ScriptedProviderResponse>,
    list: VecDeque<ScriptedProviderResponse>,
    start: VecDeque<ScriptedProviderResponse>,
    stop: VecDeque<ScriptedProviderResponse>,
    remove_all: VecDeque<ScriptedProviderResponse>,
}

/// A [`ProviderAdapter`] double driven entirely by pre-scripted responses,
/// for exercising pool manager worker logic without spawning an external
/// process (§4.11, §6 "Provider plugins as external processes").
///
/// Calls against an empty queue return `Error::Internal` rather than
/// panicking, so a misconfigured test fails with a diagnosable error
/// instead of an unwrap panic deep in a spawned task.
#[derive(Clone)]
pub struct MockProviderAdapter {
    name: String,
    queues: Arc<Mutex<Queues>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockProviderAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queues: Arc::new(Mutex::new(Queues::default())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push_create_instance(&self, response: ScriptedProviderResponse) {
        self.queues.lock().unwrap().create.push_back(response);
    }

    pub fn push_delete_instance(&self, response: ScriptedProviderResponse) {
        self.queues.lock().unwrap().delete.push_back(response);
    }

    pub fn push_get_instance(&self, response: ScriptedProviderResponse) {
        self.queues.lock().unwrap().get.push_back(response);
    }

    pub fn push_list_instances(&self, response: ScriptedProviderResponse) {
        self.queues.lock().unwrap().list.push_back(response);
    }

    /// Calls recorded so far, in order, as `"<method> <argument>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn pop(queue: &mut VecDeque<ScriptedProviderResponse>) -> Result<ScriptedProviderResponse> {
        queue
            .pop_front()
            .ok_or_else(|| Error::Internal("mock provider: no scripted response queued".into()))
    }
}

impl ProviderAdapter for MockProviderAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_instance(
        &self,
        params: CreateInstanceParams,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderInstance>> + Send + '_>> {
        self.record(format!("create_instance {}", params.name));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().create)? {
                ScriptedProviderResponse::Instance(i) => Ok(i),
                ScriptedProviderResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock provider: wrong response kind scripted for create_instance".into())),
            }
        })
    }

    fn delete_instance(
        &self,
        provider_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.record(format!("delete_instance {provider_id}"));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().delete)? {
                ScriptedProviderResponse::Ok => Ok(()),
                ScriptedProviderResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock provider: wrong response kind scripted for delete_instance".into())),
            }
        })
    }

    fn get_instance(
        &self,
        provider_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderInstance>> + Send + '_>> {
        self.record(format!("get_instance {provider_id}"));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().get)? {
                ScriptedProviderResponse::Instance(i) => Ok(i),
                ScriptedProviderResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock provider: wrong response kind scripted for get_instance".into())),
            }
        })
    }

    fn list_instances(
        &self,
        pool_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ProviderInstance>>> + Send + '_>> {
        self.record(format!("list_instances {pool_id}"));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().list)? {
                ScriptedProviderResponse::Instances(i) => Ok(i),
                ScriptedProviderResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock provider: wrong response kind scripted for list_instances".into())),
            }
        })
    }

    fn start_instance(
        &self,
        provider_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.record(format!("start_instance {provider_id}"));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().start)? {
                ScriptedProviderResponse::Ok => Ok(()),
                ScriptedProviderResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock provider: wrong response kind scripted for start_instance".into())),
            }
        })
    }

    fn stop_instance(
        &self,
        provider_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.record(format!("stop_instance {provider_id}"));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().stop)? {
                ScriptedProviderResponse::Ok => Ok(()),
                ScriptedProviderResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock provider: wrong response kind scripted for stop_instance".into())),
            }
        })
    }

    fn remove_all_instances(
        &self,
        pool_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.record(format!("remove_all_instances {pool_id}"));
        Box::pin(async move {
            match Self::pop(&mut self.queues.lock().unwrap().remove_all)? {
                ScriptedProviderResponse::Ok => Ok(()),
                ScriptedProviderResponse::Err(e) => Err(e),
                _ => Err(Error::Internal("mock provider: wrong response kind scripted for remove_all_instances".into())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_scripted_responses_in_order() {
        let provider = MockProviderAdapter::new("mock");
        provider.push_create_instance(ScriptedProviderResponse::Instance(ProviderInstance {
            provider_id: "i-1".into(),
            name: "garm-abc".into(),
            status: "running".into(),
            address: None,
        }));

        let params = CreateInstanceParams {
            name: "garm-abc".into(),
            pool_id: "pool-1".into(),
            image: "ubuntu-22.04".into(),
            flavor: "small".into(),
            os_type: crate::domain::OsType::Linux,
            os_arch: crate::domain::OsArch::Amd64,
            user_data: String::new(),
            extra_spec: serde_json::Value::Null,
        };
        let result = provider.create_instance(params).await.unwrap();
        assert_eq!(result.provider_id, "i-1");
        assert_eq!(provider.calls(), vec!["create_instance garm-abc"]);
    }

    #[tokio::test]
    async fn empty_queue_is_an_error_not_a_panic() {
        let provider = MockProviderAdapter::new("mock");
        let result = provider.delete_instance("i-1").await;
        assert!(result.is_err());
    }
}
