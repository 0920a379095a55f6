use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OS type for an instance/pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Linux,
    Windows,
    MacOs,
}

impl OsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::MacOs => "macos",
        }
    }
}

/// CPU architecture for an instance/pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsArch {
    Amd64,
    Arm64,
}

impl OsArch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }
}

/// A sizing unit under one entity (§3 "Pool").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub provider_name: String,
    pub image: String,
    pub flavor: String,
    pub os_type: OsType,
    pub os_arch: OsArch,
    pub tags: BTreeSet<String>,
    pub min_idle_runners: u32,
    pub max_runners: u32,
    pub runner_bootstrap_timeout_secs: u64,
    pub template_id: Option<Uuid>,
    pub extra_spec: serde_json::Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pool {
    pub fn runner_bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.runner_bootstrap_timeout_secs)
    }

    /// §3 invariants: `min_idle_runners <= max_runners`;
    /// `runner_bootstrap_timeout > 0` if the pool is enabled.
    pub fn validate(&self) -> crate::Result<()> {
        if self.min_idle_runners > self.max_runners {
            return Err(crate::Error::BadRequest(format!(
                "min_idle_runners ({}) must be <= max_runners ({})",
                self.min_idle_runners, self.max_runners
            )));
        }
        if self.enabled && self.runner_bootstrap_timeout_secs == 0 {
            return Err(crate::Error::BadRequest(
                "runner_bootstrap_timeout must be > 0 for an enabled pool".into(),
            ));
        }
        Ok(())
    }

    /// Labels this pool can satisfy: its tag set must be a subset of the
    /// job's requested labels.
    pub fn matches_labels(&self, requested: &BTreeSet<String>) -> bool {
        !self.tags.is_empty() && self.tags.is_subset(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_pool() -> Pool {
        let now = Utc::now();
        Pool {
            id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            provider_name: "mock".into(),
            image: "ubuntu-22.04".into(),
            flavor: "small".into(),
            os_type: OsType::Linux,
            os_arch: OsArch::Amd64,
            tags: BTreeSet::from(["self-hosted".to_string(), "linux".to_string()]),
            min_idle_runners: 2,
            max_runners: 4,
            runner_bootstrap_timeout_secs: 600,
            template_id: None,
            extra_spec: serde_json::json!({}),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn rejects_min_idle_above_max() {
        let mut p = base_pool();
        p.min_idle_runners = 5;
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeout_when_enabled() {
        let mut p = base_pool();
        p.runner_bootstrap_timeout_secs = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn allows_zero_timeout_when_disabled() {
        let mut p = base_pool();
        p.runner_bootstrap_timeout_secs = 0;
        p.enabled = false;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn matches_labels_requires_subset() {
        let p = base_pool();
        let req: BTreeSet<String> = ["self-hosted", "linux", "x64"].iter().map(|s| s.to_string()).collect();
        assert!(p.matches_labels(&req));

        let req2: BTreeSet<String> = ["self-hosted"].iter().map(|s| s.to_string()).collect();
        assert!(!p.matches_labels(&req2));
    }
}
