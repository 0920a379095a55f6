use std::collections::BTreeSet;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::EntityKind;
use crate::{Error, Result};

/// The `workflow_job` portion of a webhook payload (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: i64,
    pub run_id: i64,
    pub status: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    pub runner_name: Option<String>,
    pub conclusion: Option<String>,
}

/// Owning-entity identification carried on every webhook payload (§6).
///
/// `repo` set means the hook is repository-scoped (`login` is the repo's
/// owner). `repo` unset and `login` non-empty means organization-scoped.
/// `repo` unset and `login` empty means enterprise-scoped, with `enterprise`
/// carrying the enterprise slug — GitHub/Gitea both deliver enterprise-level
/// hooks with no owning repository or organization at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookOwner {
    #[serde(default)]
    pub login: String,
    pub repo: Option<String>,
    #[serde(default)]
    pub enterprise: Option<String>,
}

/// A validated, parsed `workflow_job` webhook payload (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJobPayload {
    pub action: String,
    pub workflow_job: WorkflowJob,
    pub owner: WebhookOwner,
    pub endpoint_name: String,
}

impl WorkflowJobPayload {
    /// Dispatch key: `(hook_target_type, owner, repo?, endpoint)` (§4.5).
    pub fn dispatch_key(&self) -> (String, String, Option<String>, String) {
        let target_type = if self.owner.repo.is_some() {
            "repository"
        } else if !self.owner.login.is_empty() {
            "organization"
        } else {
            "enterprise"
        };
        let owner = if target_type == "enterprise" {
            self.owner.enterprise.clone().unwrap_or_default()
        } else {
            self.owner.login.clone()
        };
        (target_type.to_string(), owner, self.owner.repo.clone(), self.endpoint_name.clone())
    }

    pub fn entity_kind(&self) -> EntityKind {
        match (&self.owner.repo, self.owner.login.is_empty()) {
            (Some(repo), _) => EntityKind::Repository {
                owner: self.owner.login.clone(),
                name: repo.clone(),
            },
            (None, false) => EntityKind::Organization {
                name: self.owner.login.clone(),
            },
            (None, true) => EntityKind::Enterprise {
                name: self.owner.enterprise.clone().unwrap_or_default(),
            },
        }
    }
}

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Validates a webhook signature header against the raw payload and the
/// entity's stored secret (§4.5, §8).
///
/// Accepted formats: `sha256=<hex>` (preferred) and `sha1=<hex>` (legacy).
/// Any other prefix, or a missing signature when the secret is non-empty,
/// is `Unauthorized`. Comparison is constant-time.
pub fn verify_signature(secret: &str, raw_body: &[u8], signature_header: Option<&str>) -> Result<()> {
    if secret.is_empty() {
        return Ok(());
    }

    let header = signature_header
        .ok_or_else(|| Error::Unauthorized("missing webhook signature".into()))?;

    if let Some(hex_sig) = header.strip_prefix("sha256=") {
        return verify_hex::<HmacSha256>(secret, raw_body, hex_sig);
    }
    if let Some(hex_sig) = header.strip_prefix("sha1=") {
        return verify_hex::<HmacSha1>(secret, raw_body, hex_sig);
    }

    Err(Error::Unauthorized(format!(
        "unsupported webhook signature prefix in header: {header}"
    )))
}

fn verify_hex<M: Mac + KeyInit>(secret: &str, raw_body: &[u8], hex_sig: &str) -> Result<()> {
    let expected = hex::decode(hex_sig)
        .map_err(|_| Error::Unauthorized("malformed webhook signature".into()))?;

    let mut mac = <M as KeyInit>::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::Internal("invalid hmac key length".into()))?;
    mac.update(raw_body);
    let computed = mac.finalize().into_bytes();

    if computed.as_slice().ct_eq(&expected).into() {
        Ok(())
    } else {
        Err(Error::Unauthorized("webhook signature mismatch".into()))
    }
}

use hmac::digest::KeyInit;

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_sha256(secret: &str, body: &[u8]) -> String {
        let mut mac = <HmacSha256 as KeyInit>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn sign_sha1(secret: &str, body: &[u8]) -> String {
        let mut mac = <HmacSha1 as KeyInit>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_sha256() {
        let body = b"{\"action\":\"queued\"}";
        let sig = sign_sha256("secret", body);
        assert!(verify_signature("secret", body, Some(&sig)).is_ok());
    }

    #[test]
    fn accepts_valid_sha1_legacy() {
        let body = b"{\"action\":\"queued\"}";
        let sig = sign_sha1("secret", body);
        assert!(verify_signature("secret", body, Some(&sig)).is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = b"{\"action\":\"queued\"}";
        let sig = sign_sha256("secret", body);
        assert!(verify_signature("other-secret", body, Some(&sig)).is_err());
    }

    #[test]
    fn rejects_missing_signature_when_secret_set() {
        assert!(verify_signature("secret", b"{}", None).is_err());
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert!(verify_signature("secret", b"{}", Some("md5=deadbeef")).is_err());
    }

    #[test]
    fn empty_secret_skips_validation() {
        assert!(verify_signature("", b"{}", None).is_ok());
    }

    #[test]
    fn dispatch_key_distinguishes_repo_and_org() {
        let repo_payload = WorkflowJobPayload {
            action: "queued".into(),
            workflow_job: WorkflowJob {
                id: 1,
                run_id: 1,
                status: "queued".into(),
                labels: BTreeSet::new(),
                runner_name: None,
                conclusion: None,
            },
            owner: WebhookOwner {
                login: "acme".into(),
                repo: Some("widget".into()),
                enterprise: None,
            },
            endpoint_name: "gh-default".into(),
        };
        let (target_type, owner, repo, endpoint) = repo_payload.dispatch_key();
        assert_eq!(target_type, "repository");
        assert_eq!(owner, "acme");
        assert_eq!(repo, Some("widget".to_string()));
        assert_eq!(endpoint, "gh-default");
    }

    #[test]
    fn entity_kind_resolves_enterprise_scope() {
        let payload = WorkflowJobPayload {
            action: "queued".into(),
            workflow_job: WorkflowJob {
                id: 1,
                run_id: 1,
                status: "queued".into(),
                labels: BTreeSet::new(),
                runner_name: None,
                conclusion: None,
            },
            owner: WebhookOwner {
                login: String::new(),
                repo: None,
                enterprise: Some("acme-holdings".into()),
            },
            endpoint_name: "gh-default".into(),
        };
        assert_eq!(payload.entity_kind(), EntityKind::Enterprise { name: "acme-holdings".into() });
        let (target_type, owner, repo, _) = payload.dispatch_key();
        assert_eq!(target_type, "enterprise");
        assert_eq!(owner, "acme-holdings");
        assert_eq!(repo, None);
    }
}
