//! External-process [`ProviderAdapter`] (§6, §9).
//!
//! Each provider is a binary invoked once per call: the command name is
//! the first argument, the JSON request body is written to stdin, and the
//! JSON response is read from stdout. A non-zero exit status is mapped to
//! [`Error::unavailable`] unless stderr names the target as missing, in
//! which case it is mapped to [`Error::NotFound`] so callers can treat a
//! delete of an already-gone instance as success (§7, §8).

use std::process::Stdio;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use garm_core::config::ProviderDefinition;
use garm_core::provider::{CreateInstanceParams, ProviderAdapter, ProviderCommand, ProviderInstance};
use garm_core::{Error, Result};

/// Spawns `executable_path` with the provider's configured environment for
/// every lifecycle call (§6).
pub struct ProcessProvider {
    definition: ProviderDefinition,
}

impl ProcessProvider {
    pub fn new(definition: ProviderDefinition) -> Self {
        Self { definition }
    }

    async fn invoke<T: Serialize>(&self, command: ProviderCommand, payload: &T) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.definition.executable_path);
        cmd.arg(command.as_str());
        if let Some(config_file) = &self.definition.config_file {
            cmd.arg("--config").arg(config_file);
        }
        for (key, value) in &self.definition.environment {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            Error::unavailable(format!("failed to spawn provider '{}': {e}", self.definition.name))
        })?;

        let body = serde_json::to_vec(payload)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&body).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.to_lowercase().contains("not found") {
                return Err(Error::NotFound(stderr));
            }
            return Err(Error::unavailable(format!(
                "provider '{}' exited with {}: {stderr}",
                self.definition.name, output.status
            )));
        }

        Ok(output.stdout)
    }
}

impl ProviderAdapter for ProcessProvider {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn create_instance(
        &self,
        params: CreateInstanceParams,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ProviderInstance>> + Send + '_>> {
        Box::pin(async move {
            let stdout = self.invoke(ProviderCommand::CreateInstance, &params).await?;
            Ok(serde_json::from_slice(&stdout)?)
        })
    }

    fn delete_instance(
        &self,
        provider_id: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>> {
        let provider_id = provider_id.to_string();
        Box::pin(async move {
            match self
                .invoke(ProviderCommand::DeleteInstance, &serde_json::json!({ "provider_id": provider_id }))
                .await
            {
                Ok(_) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    fn get_instance(
        &self,
        provider_id: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ProviderInstance>> + Send + '_>> {
        let provider_id = provider_id.to_string();
        Box::pin(async move {
            let stdout = self
                .invoke(ProviderCommand::GetInstance, &serde_json::json!({ "provider_id": provider_id }))
                .await?;
            Ok(serde_json::from_slice(&stdout)?)
        })
    }

    fn list_instances(
        &self,
        pool_id: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<ProviderInstance>>> + Send + '_>> {
        let pool_id = pool_id.to_string();
        Box::pin(async move {
            let stdout =
                self.invoke(ProviderCommand::ListInstances, &serde_json::json!({ "pool_id": pool_id })).await?;
            Ok(serde_json::from_slice(&stdout)?)
        })
    }

    fn start_instance(
        &self,
        provider_id: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>> {
        let provider_id = provider_id.to_string();
        Box::pin(async move {
            self.invoke(ProviderCommand::StartInstance, &serde_json::json!({ "provider_id": provider_id })).await?;
            Ok(())
        })
    }

    fn stop_instance(
        &self,
        provider_id: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>> {
        let provider_id = provider_id.to_string();
        Box::pin(async move {
            self.invoke(ProviderCommand::StopInstance, &serde_json::json!({ "provider_id": provider_id })).await?;
            Ok(())
        })
    }

    fn remove_all_instances(
        &self,
        pool_id: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>> {
        let pool_id = pool_id.to_string();
        Box::pin(async move {
            self.invoke(ProviderCommand::RemoveAllInstances, &serde_json::json!({ "pool_id": pool_id })).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn definition(executable_path: &str) -> ProviderDefinition {
        ProviderDefinition {
            name: "mock".into(),
            executable_path: executable_path.into(),
            config_file: None,
            environment: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_without_not_found_in_stderr_is_unavailable() {
        let provider = ProcessProvider::new(definition("/bin/false"));
        let result = provider.delete_instance("abc").await;
        match result {
            Err(e) => assert!(!e.is_not_found()),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn provider_name_is_exposed() {
        let provider = ProcessProvider::new(definition("/bin/true"));
        assert_eq!(provider.name(), "mock");
    }
}
