use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The forge implementation an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForgeKind {
    Github,
    Gitea,
}

impl ForgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitea => "gitea",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "github" => Some(Self::Github),
            "gitea" => Some(Self::Gitea),
            _ => None,
        }
    }

    /// Scale sets are a github-native feature (§6).
    pub fn supports_scale_sets(&self) -> bool {
        matches!(self, Self::Github)
    }
}

impl std::fmt::Display for ForgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named forge installation (§3 "Forge Endpoint"). Must be created before
/// any credentials that reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeEndpoint {
    pub name: String,
    pub base_url: String,
    pub ca_cert_bundle: Option<Vec<u8>>,
    pub kind: ForgeKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ForgeEndpoint {
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::BadRequest("endpoint name must not be empty".into()));
        }
        if self.base_url.trim().is_empty() {
            return Err(crate::Error::BadRequest("endpoint base_url must not be empty".into()));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| crate::Error::BadRequest(format!("invalid endpoint base_url: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forge_kind_round_trips() {
        assert_eq!(ForgeKind::from_str("github"), Some(ForgeKind::Github));
        assert_eq!(ForgeKind::from_str("gitea"), Some(ForgeKind::Gitea));
        assert_eq!(ForgeKind::from_str("bogus"), None);
        assert!(ForgeKind::Github.supports_scale_sets());
        assert!(!ForgeKind::Gitea.supports_scale_sets());
    }

    #[test]
    fn endpoint_validation_rejects_empty_fields() {
        let now = Utc::now();
        let ep = ForgeEndpoint {
            name: "".into(),
            base_url: "https://api.github.com".into(),
            ca_cert_bundle: None,
            kind: ForgeKind::Github,
            description: "".into(),
            created_at: now,
            updated_at: now,
        };
        assert!(ep.validate().is_err());
    }

    #[test]
    fn endpoint_validation_rejects_bad_url() {
        let now = Utc::now();
        let ep = ForgeEndpoint {
            name: "gh".into(),
            base_url: "not-a-url".into(),
            ca_cert_bundle: None,
            kind: ForgeKind::Github,
            description: "".into(),
            created_at: now,
            updated_at: now,
        };
        assert!(ep.validate().is_err());
    }
}
