use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::endpoint::ForgeKind;
use super::pool::OsType;
use crate::error::{Error, Result};

/// Owner of `"system"` marks a template as reprovisionable from built-ins
/// (§4.7); any other value is a user-owned template restore never touches.
pub const SYSTEM_TEMPLATE_OWNER: &str = "system";

/// Named script blob carrying `(owner, os_type, forge_kind, data)`
/// (§3 "Template").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    pub os_type: OsType,
    pub forge_kind: ForgeKind,
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    pub fn is_system_owned(&self) -> bool {
        self.owner == SYSTEM_TEMPLATE_OWNER
    }
}

/// Default bootstrap script shipped for every `(os_type, forge_kind)`
/// combination, used to seed a fresh install and to reset a system
/// template back to its original contents (§4.7 "Template restore").
pub fn builtin_script(os_type: OsType, forge_kind: ForgeKind) -> &'static str {
    match (os_type, forge_kind) {
        (OsType::Linux, ForgeKind::Github) => {
            "#!/bin/bash\nset -euo pipefail\ncurl -fsSL -o actions-runner.tar.gz \"$RUNNER_DOWNLOAD_URL\"\ntar xzf actions-runner.tar.gz\n./config.sh --unattended --url \"$FORGE_URL\" --token \"$RUNNER_TOKEN\" --ephemeral\n./run.sh\n"
        }
        (OsType::Linux, ForgeKind::Gitea) => {
            "#!/bin/bash\nset -euo pipefail\ncurl -fsSL -o act_runner \"$RUNNER_DOWNLOAD_URL\"\nchmod +x act_runner\n./act_runner register --no-interactive --instance \"$FORGE_URL\" --token \"$RUNNER_TOKEN\"\n./act_runner daemon\n"
        }
        (OsType::Windows, ForgeKind::Github) => {
            "$ErrorActionPreference = 'Stop'\nInvoke-WebRequest -Uri $env:RUNNER_DOWNLOAD_URL -OutFile actions-runner.zip\nExpand-Archive -Path actions-runner.zip -DestinationPath .\n.\\config.cmd --unattended --url $env:FORGE_URL --token $env:RUNNER_TOKEN --ephemeral\n.\\run.cmd\n"
        }
        (OsType::Windows, ForgeKind::Gitea) => {
            "$ErrorActionPreference = 'Stop'\nInvoke-WebRequest -Uri $env:RUNNER_DOWNLOAD_URL -OutFile act_runner.exe\n.\\act_runner.exe register --no-interactive --instance $env:FORGE_URL --token $env:RUNNER_TOKEN\n.\\act_runner.exe daemon\n"
        }
        (OsType::MacOs, ForgeKind::Github) => {
            "#!/bin/bash\nset -euo pipefail\ncurl -fsSL -o actions-runner.tar.gz \"$RUNNER_DOWNLOAD_URL\"\ntar xzf actions-runner.tar.gz\n./config.sh --unattended --url \"$FORGE_URL\" --token \"$RUNNER_TOKEN\" --ephemeral\n./run.sh\n"
        }
        (OsType::MacOs, ForgeKind::Gitea) => {
            "#!/bin/bash\nset -euo pipefail\ncurl -fsSL -o act_runner \"$RUNNER_DOWNLOAD_URL\"\nchmod +x act_runner\n./act_runner register --no-interactive --instance \"$FORGE_URL\" --token \"$RUNNER_TOKEN\"\n./act_runner daemon\n"
        }
    }
}

/// Canonical name for the built-in template of a given `(os_type,
/// forge_kind)` pair.
pub fn builtin_name(os_type: OsType, forge_kind: ForgeKind) -> String {
    format!("{}-{}-default", os_type.as_str(), forge_kind.as_str())
}

/// Builds a fresh system-owned template for `(os_type, forge_kind)`, used
/// when seeding an install with its initial template set.
pub fn builtin_template(id: Uuid, os_type: OsType, forge_kind: ForgeKind, now: DateTime<Utc>) -> Template {
    Template {
        id,
        name: builtin_name(os_type, forge_kind),
        owner: SYSTEM_TEMPLATE_OWNER.to_string(),
        os_type,
        forge_kind,
        data: builtin_script(os_type, forge_kind).to_string(),
        created_at: now,
        updated_at: now,
    }
}

/// Resets a system-owned template back to its built-in name and data,
/// keeping its `id` (§4.7). Rejects a user-owned template: restore only
/// ever touches templates `garm` itself ships.
pub fn restore(existing: &Template, now: DateTime<Utc>) -> Result<Template> {
    if !existing.is_system_owned() {
        return Err(Error::BadRequest(format!(
            "template '{}' is owned by '{}' and cannot be restored",
            existing.id, existing.owner
        )));
    }
    Ok(Template {
        id: existing.id,
        name: builtin_name(existing.os_type, existing.forge_kind),
        owner: SYSTEM_TEMPLATE_OWNER.to_string(),
        os_type: existing.os_type,
        forge_kind: existing.forge_kind,
        data: builtin_script(existing.os_type, existing.forge_kind).to_string(),
        created_at: existing.created_at,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(owner: &str) -> Template {
        let now = Utc::now();
        Template {
            id: Uuid::new_v4(),
            name: "custom".to_string(),
            owner: owner.to_string(),
            os_type: OsType::Linux,
            forge_kind: ForgeKind::Github,
            data: "echo mutated".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn restore_resets_name_and_data_but_keeps_id() {
        let mutated = sample(SYSTEM_TEMPLATE_OWNER);
        let restored = restore(&mutated, Utc::now()).unwrap();
        assert_eq!(restored.id, mutated.id);
        assert_eq!(restored.name, builtin_name(OsType::Linux, ForgeKind::Github));
        assert_eq!(restored.data, builtin_script(OsType::Linux, ForgeKind::Github));
    }

    #[test]
    fn restore_rejects_user_owned_template() {
        let owned = sample("alice");
        assert!(restore(&owned, Utc::now()).is_err());
    }
}
