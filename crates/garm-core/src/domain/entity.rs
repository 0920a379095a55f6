use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::endpoint::ForgeKind;

/// Which kind of forge entity this is, and the identifier that disambiguates
/// it (§3 "Forge Entity").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKind {
    Repository { owner: String, name: String },
    Organization { name: String },
    Enterprise { name: String },
}

impl EntityKind {
    /// The `(kind, identifier)` half of the `(kind, identifier, endpoint)`
    /// uniqueness key.
    pub fn identifier(&self) -> String {
        match self {
            Self::Repository { owner, name } => format!("{owner}/{name}"),
            Self::Organization { name } => name.clone(),
            Self::Enterprise { name } => name.clone(),
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Repository { .. } => "repository",
            Self::Organization { .. } => "organization",
            Self::Enterprise { .. } => "enterprise",
        }
    }

    /// The installation-script service name derived from the entity
    /// (§4.6): `actions.runner.<owner>` for enterprise/org,
    /// `actions.runner.<owner>.<repo>` for repo.
    pub fn runner_service_name(&self) -> String {
        match self {
            Self::Repository { owner, name } => format!("actions.runner.{owner}.{name}"),
            Self::Organization { name } => format!("actions.runner.{name}"),
            Self::Enterprise { name } => format!("actions.runner.{name}"),
        }
    }
}

/// Policy used to pick a pool when several satisfy a job's labels (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolBalancerPolicy {
    #[default]
    RoundRobin,
    Pack,
    None,
}

/// Aggregate runtime status surfaced by a list/get call (§4.4, §7).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EntityStatus {
    pub is_running: bool,
    pub failure_reason: Option<String>,
}

/// A code-forge repository, organization, or enterprise this system
/// manages as a unit (§3 "Forge Entity").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeEntity {
    pub id: Uuid,
    pub entity: EntityKind,
    pub endpoint_name: String,
    pub credentials_name: String,
    pub webhook_secret: Option<String>,
    pub pool_balancer_policy: PoolBalancerPolicy,
    #[serde(skip)]
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ForgeEntity {
    pub fn validate(&self) -> crate::Result<()> {
        match &self.entity {
            EntityKind::Repository { owner, name } => {
                if owner.trim().is_empty() || name.trim().is_empty() {
                    return Err(crate::Error::BadRequest(
                        "repository entity requires owner and name".into(),
                    ));
                }
            }
            EntityKind::Organization { name } | EntityKind::Enterprise { name } => {
                if name.trim().is_empty() {
                    return Err(crate::Error::BadRequest("entity name must not be empty".into()));
                }
            }
        }
        if self.endpoint_name.trim().is_empty() {
            return Err(crate::Error::BadRequest("entity must reference an endpoint".into()));
        }
        Ok(())
    }

    /// `true` if this forge kind requires the endpoint's kind to match
    /// scale-set support before scale sets can be created.
    pub fn supports_scale_sets(&self, endpoint_kind: ForgeKind) -> bool {
        endpoint_kind.supports_scale_sets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(kind: EntityKind) -> ForgeEntity {
        let now = Utc::now();
        ForgeEntity {
            id: Uuid::new_v4(),
            entity: kind,
            endpoint_name: "gh-default".into(),
            credentials_name: "c1".into(),
            webhook_secret: None,
            pool_balancer_policy: PoolBalancerPolicy::default(),
            status: EntityStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn repo_service_name() {
        let e = EntityKind::Repository {
            owner: "acme".into(),
            name: "widget".into(),
        };
        assert_eq!(e.runner_service_name(), "actions.runner.acme.widget");
        assert_eq!(e.identifier(), "acme/widget");
    }

    #[test]
    fn org_service_name() {
        let e = EntityKind::Organization { name: "acme".into() };
        assert_eq!(e.runner_service_name(), "actions.runner.acme");
    }

    #[test]
    fn validate_rejects_empty_repo_fields() {
        let e = entity(EntityKind::Repository {
            owner: "".into(),
            name: "widget".into(),
        });
        assert!(e.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_entity() {
        let e = entity(EntityKind::Organization { name: "acme".into() });
        assert!(e.validate().is_ok());
    }
}
