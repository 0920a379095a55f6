use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pool::{OsArch, OsType};

/// An alternative sizing unit tied to the forge's native scale-set feature
/// (§3 "Scale Set").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleSet {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub forge_scale_set_id: Option<i64>,
    pub runner_group_id: i64,
    pub name: String,
    pub provider_name: String,
    pub image: String,
    pub flavor: String,
    pub os_type: OsType,
    pub os_arch: OsArch,
    pub tags: BTreeSet<String>,
    pub min_idle_runners: u32,
    pub max_runners: u32,
    pub runner_bootstrap_timeout_secs: u64,
    pub ephemeral: bool,
    pub disable_update: bool,
    pub enabled: bool,
    pub instance_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScaleSet {
    pub fn validate(&self) -> crate::Result<()> {
        if self.min_idle_runners > self.max_runners {
            return Err(crate::Error::BadRequest(format!(
                "min_idle_runners ({}) must be <= max_runners ({})",
                self.min_idle_runners, self.max_runners
            )));
        }
        if self.enabled && self.runner_bootstrap_timeout_secs == 0 {
            return Err(crate::Error::BadRequest(
                "runner_bootstrap_timeout must be > 0 for an enabled scale set".into(),
            ));
        }
        Ok(())
    }

    /// Deleting a scale set requires `enabled=false` and `instances==0`.
    pub fn deletable(&self) -> crate::Result<()> {
        if self.enabled {
            return Err(crate::Error::BadRequest(
                "scale set must be disabled before deletion".into(),
            ));
        }
        if self.instance_count != 0 {
            return Err(crate::Error::BadRequest(format!(
                "scale set has {} runners",
                self.instance_count
            )));
        }
        Ok(())
    }

    /// Fields whose mutation propagates to the forge (§3): name,
    /// runner-group, disable-update.
    pub fn forge_mutable_fields_changed(&self, other: &ScaleSet) -> bool {
        self.name != other.name
            || self.runner_group_id != other.runner_group_id
            || self.disable_update != other.disable_update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(instance_count: u32, enabled: bool) -> ScaleSet {
        let now = Utc::now();
        ScaleSet {
            id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            forge_scale_set_id: Some(42),
            runner_group_id: 1,
            name: "default".into(),
            provider_name: "mock".into(),
            image: "ubuntu-22.04".into(),
            flavor: "small".into(),
            os_type: OsType::Linux,
            os_arch: OsArch::Amd64,
            tags: BTreeSet::new(),
            min_idle_runners: 0,
            max_runners: 4,
            runner_bootstrap_timeout_secs: 600,
            ephemeral: true,
            disable_update: false,
            enabled,
            instance_count,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn deletable_requires_disabled_and_empty() {
        assert!(base(0, true).deletable().is_err());
        assert!(base(1, false).deletable().is_err());
        assert!(base(0, false).deletable().is_ok());
    }

    #[test]
    fn detects_forge_mutable_field_changes() {
        let a = base(0, false);
        let mut b = a.clone();
        assert!(!a.forge_mutable_fields_changed(&b));
        b.name = "renamed".into();
        assert!(a.forge_mutable_fields_changed(&b));
    }
}
