use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pool::{OsArch, OsType};

/// Instance runner-status state machine (§4.2):
///
/// ```text
/// pending -> installing -> active -> terminating -> terminated
///    \          \             \
///     -> failed  -> failed     -> terminating (job completes, ephemeral; or force-delete)
/// failed -> terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Pending,
    Installing,
    Active,
    Failed,
    Terminating,
    Terminated,
}

impl RunnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Installing => "installing",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "installing" => Some(Self::Installing),
            "active" => Some(Self::Active),
            "failed" => Some(Self::Failed),
            "terminating" => Some(Self::Terminating),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal transition per the §4.2 state
    /// machine diagram.
    pub fn can_transition_to(&self, next: RunnerStatus) -> bool {
        use RunnerStatus::*;
        matches!(
            (self, next),
            (Pending, Installing)
                | (Pending, Failed)
                | (Installing, Active)
                | (Installing, Failed)
                | (Active, Terminating)
                | (Failed, Terminated)
                | (Terminating, Terminated)
        )
    }

    /// Counted as "busy-or-idle" by the Consolidator.
    pub fn is_busy_or_idle(&self) -> bool {
        matches!(self, Self::Pending | Self::Installing | Self::Active)
    }
}

/// Cloud-side lifecycle status, opaque to the core beyond a few named
/// states the Reaper cross-checks against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Pending,
    Running,
    Stopped,
    Error,
    Deleted,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Deleted => "deleted",
        }
    }
}

/// Which sizing unit owns an instance — exactly one, never both (§3, §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstanceParent {
    Pool(Uuid),
    ScaleSet(Uuid),
}

impl InstanceParent {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Pool(id) | Self::ScaleSet(id) => *id,
        }
    }
}

/// Severity of an instance event log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

/// One append-only entry in an instance's event log (§4.3
/// `AddInstanceEvent`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceEvent {
    pub id: Uuid,
    pub instance_name: String,
    pub kind: String,
    pub level: EventLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// One compute machine (§3 "Instance").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Globally-unique natural key.
    pub name: String,
    pub parent: InstanceParent,
    pub provider_id: Option<String>,
    pub provider_name: String,
    pub os_type: OsType,
    pub os_arch: OsArch,
    pub runner_status: RunnerStatus,
    pub provider_status: ProviderStatus,
    pub ephemeral: bool,
    pub token_fetched: bool,
    /// File-name -> base64 blob, for JIT-capable forges (§3, §4.6).
    pub jit_config: HashMap<String, String>,
    /// Assigned by the forge once the worker registers.
    pub agent_id: Option<i64>,
    /// The workflow job currently assigned, if any.
    pub job_id: Option<i64>,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Backs the optimistic-concurrency CAS in `StoreGateway::update_instance`.
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// Counted as "idle" by the Consolidator: active with no assigned job.
    pub fn is_idle(&self) -> bool {
        self.runner_status == RunnerStatus::Active && self.job_id.is_none()
    }

    pub fn is_busy_or_idle(&self) -> bool {
        self.runner_status.is_busy_or_idle()
    }

    /// A one-shot registration token may be issued at most once per
    /// instance when JIT is not in use (§4.6).
    pub fn can_fetch_registration_token(&self) -> bool {
        !self.token_fetched && self.jit_config.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(status: RunnerStatus) -> Instance {
        let now = Utc::now();
        Instance {
            name: "garm-abc123".into(),
            parent: InstanceParent::Pool(Uuid::new_v4()),
            provider_id: None,
            provider_name: "mock".into(),
            os_type: OsType::Linux,
            os_arch: OsArch::Amd64,
            runner_status: status,
            provider_status: ProviderStatus::Pending,
            ephemeral: true,
            token_fetched: false,
            jit_config: HashMap::new(),
            agent_id: None,
            job_id: None,
            status_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn legal_transitions() {
        assert!(RunnerStatus::Pending.can_transition_to(RunnerStatus::Installing));
        assert!(RunnerStatus::Installing.can_transition_to(RunnerStatus::Active));
        assert!(RunnerStatus::Active.can_transition_to(RunnerStatus::Terminating));
        assert!(RunnerStatus::Terminating.can_transition_to(RunnerStatus::Terminated));
    }

    #[test]
    fn illegal_transitions_rejected() {
        assert!(!RunnerStatus::Active.can_transition_to(RunnerStatus::Installing));
        assert!(!RunnerStatus::Terminated.can_transition_to(RunnerStatus::Active));
        assert!(!RunnerStatus::Pending.can_transition_to(RunnerStatus::Active));
    }

    #[test]
    fn idle_requires_active_and_no_job() {
        let mut i = instance(RunnerStatus::Active);
        assert!(i.is_idle());
        i.job_id = Some(1);
        assert!(!i.is_idle());
    }

    #[test]
    fn registration_token_gate() {
        let mut i = instance(RunnerStatus::Pending);
        assert!(i.can_fetch_registration_token());
        i.token_fetched = true;
        assert!(!i.can_fetch_registration_token());

        let mut j = instance(RunnerStatus::Pending);
        j.jit_config.insert("config.json".into(), "base64".into());
        assert!(!j.can_fetch_registration_token());
    }

    #[test]
    fn busy_or_idle_counts_pending_installing_active() {
        assert!(RunnerStatus::Pending.is_busy_or_idle());
        assert!(RunnerStatus::Installing.is_busy_or_idle());
        assert!(RunnerStatus::Active.is_busy_or_idle());
        assert!(!RunnerStatus::Terminating.is_busy_or_idle());
        assert!(!RunnerStatus::Failed.is_busy_or_idle());
    }
}
