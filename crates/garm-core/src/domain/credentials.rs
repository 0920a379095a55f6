use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::endpoint::{ForgeEndpoint, ForgeKind};
use crate::error::{Error, Result};

/// A named auth principal bound to one endpoint (§3 "Forge Credentials").
///
/// `secret` is encrypted at rest; this struct models the decrypted form as
/// handed to the Forge Client, never serialized back to the store directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeCredentials {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub endpoint_name: String,
    pub secret: CredentialSecret,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The credential material itself: a PAT, or a GitHub App private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialSecret {
    PersonalAccessToken { token: String },
    GithubApp { app_id: u64, installation_id: u64, private_key_pem: String },
}

impl ForgeCredentials {
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::BadRequest("credentials name must not be empty".into()));
        }
        if self.endpoint_name.trim().is_empty() {
            return Err(crate::Error::BadRequest(
                "credentials must reference an endpoint".into(),
            ));
        }
        Ok(())
    }
}

/// Resolves a credentials object by name alone, the way an entity create
/// call that only names credentials (no endpoint) must (§3, §8 "Dual-owned
/// credentials name"). Two endpoints of different forge kinds may each
/// carry a credentials object with the same `name`; without `forge_hint`
/// to disambiguate, that's a `BadRequest` rather than a silent pick.
pub fn resolve_by_name<'a>(
    credentials: &'a [ForgeCredentials],
    endpoints: &[ForgeEndpoint],
    name: &str,
    forge_hint: Option<ForgeKind>,
) -> Result<&'a ForgeCredentials> {
    let endpoint_kind = |endpoint_name: &str| endpoints.iter().find(|e| e.name == endpoint_name).map(|e| e.kind);

    let mut matches: Vec<&ForgeCredentials> = credentials
        .iter()
        .filter(|c| c.name == name)
        .filter(|c| match forge_hint {
            Some(hint) => endpoint_kind(&c.endpoint_name) == Some(hint),
            None => true,
        })
        .collect();

    match matches.len() {
        0 => Err(Error::NotFound(format!("credentials '{name}' not found"))),
        1 => Ok(matches.remove(0)),
        _ => {
            let kinds: Vec<&'static str> = matches
                .iter()
                .filter_map(|c| endpoint_kind(&c.endpoint_name))
                .map(|k| k.as_str())
                .collect();
            Err(Error::BadRequest(format!(
                "credentials '{name}' defined for both {}, specify a forge hint",
                kinds.join(" and ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_name_and_endpoint() {
        let now = Utc::now();
        let c = ForgeCredentials {
            id: Uuid::new_v4(),
            name: "".into(),
            description: "".into(),
            endpoint_name: "gh".into(),
            secret: CredentialSecret::PersonalAccessToken { token: "x".into() },
            created_at: now,
            updated_at: now,
        };
        assert!(c.validate().is_err());
    }

    fn endpoint(name: &str, kind: ForgeKind) -> ForgeEndpoint {
        let now = Utc::now();
        ForgeEndpoint {
            name: name.to_string(),
            base_url: "https://example.invalid".into(),
            ca_cert_bundle: None,
            kind,
            description: "".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn credentials(name: &str, endpoint_name: &str) -> ForgeCredentials {
        let now = Utc::now();
        ForgeCredentials {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: "".into(),
            endpoint_name: endpoint_name.to_string(),
            secret: CredentialSecret::PersonalAccessToken { token: "x".into() },
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn resolve_by_name_disambiguates_with_forge_hint() {
        let endpoints = vec![endpoint("gh", ForgeKind::Github), endpoint("gitea", ForgeKind::Gitea)];
        let creds = vec![credentials("foo", "gh"), credentials("foo", "gitea")];

        let resolved = resolve_by_name(&creds, &endpoints, "foo", Some(ForgeKind::Gitea)).unwrap();
        assert_eq!(resolved.endpoint_name, "gitea");
    }

    #[test]
    fn resolve_by_name_rejects_dual_ownership_without_hint() {
        let endpoints = vec![endpoint("gh", ForgeKind::Github), endpoint("gitea", ForgeKind::Gitea)];
        let creds = vec![credentials("foo", "gh"), credentials("foo", "gitea")];

        let err = resolve_by_name(&creds, &endpoints, "foo", None).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}
