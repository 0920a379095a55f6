use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a forge workflow job, mirrored for observability and
/// scale-set demand computation (§3 "Job").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowJobStatus {
    Queued,
    InProgress,
    Completed,
}

impl WorkflowJobStatus {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "queued" => Some(Self::Queued),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A workflow-job row mirrored from the forge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub run_id: i64,
    pub entity_id: Uuid,
    pub status: WorkflowJobStatus,
    pub labels: BTreeSet<String>,
    pub runner_name: Option<String>,
    pub conclusion: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
