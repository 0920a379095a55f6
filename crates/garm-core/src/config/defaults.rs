use serde::{Deserialize, Serialize};

/// Default numeric constants for the Pool Manager control loops (§4.2),
/// overridable per-pool only where the data model allows it
/// (`runner_bootstrap_timeout`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Fallback `runner_bootstrap_timeout` for pools that don't set one.
    #[serde(default = "default_bootstrap_timeout_secs")]
    pub runner_bootstrap_timeout_secs: u64,

    /// Consolidator tick period.
    #[serde(default = "default_consolidator_period_secs")]
    pub consolidator_period_secs: u64,

    /// Scale-down sweeper tick period.
    #[serde(default = "default_sweeper_period_secs")]
    pub sweeper_period_secs: u64,

    /// Reaper tick period.
    #[serde(default = "default_reaper_period_secs")]
    pub reaper_period_secs: u64,

    /// Tool-cache refresh period.
    #[serde(default = "default_tool_refresh_period_secs")]
    pub tool_refresh_period_secs: u64,

    /// Tool-cache refresh period after an authentication failure.
    #[serde(default = "default_tool_refresh_backoff_secs")]
    pub tool_refresh_backoff_secs: u64,

    /// How long the manager stays in unauthorized-backoff after a
    /// persistent forge 401.
    #[serde(default = "default_unauthorized_backoff_secs")]
    pub unauthorized_backoff_secs: u64,

    /// Grace period before a surplus-idle instance is torn down.
    #[serde(default = "default_idle_grace_period_secs")]
    pub idle_grace_period_secs: u64,

    /// Observability retention window for `terminated` instance rows.
    #[serde(default = "default_terminated_retention_secs")]
    pub terminated_retention_secs: u64,

    /// Stop() grace period before detaching still-running provider calls.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            runner_bootstrap_timeout_secs: default_bootstrap_timeout_secs(),
            consolidator_period_secs: default_consolidator_period_secs(),
            sweeper_period_secs: default_sweeper_period_secs(),
            reaper_period_secs: default_reaper_period_secs(),
            tool_refresh_period_secs: default_tool_refresh_period_secs(),
            tool_refresh_backoff_secs: default_tool_refresh_backoff_secs(),
            unauthorized_backoff_secs: default_unauthorized_backoff_secs(),
            idle_grace_period_secs: default_idle_grace_period_secs(),
            terminated_retention_secs: default_terminated_retention_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_bootstrap_timeout_secs() -> u64 {
    600
}

fn default_consolidator_period_secs() -> u64 {
    5
}

fn default_sweeper_period_secs() -> u64 {
    60
}

fn default_reaper_period_secs() -> u64 {
    300
}

fn default_tool_refresh_period_secs() -> u64 {
    900
}

fn default_tool_refresh_backoff_secs() -> u64 {
    3600
}

fn default_unauthorized_backoff_secs() -> u64 {
    3 * 3600
}

fn default_idle_grace_period_secs() -> u64 {
    60
}

fn default_terminated_retention_secs() -> u64 {
    24 * 3600
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let d = DefaultsConfig::default();
        assert_eq!(d.consolidator_period_secs, 5);
        assert_eq!(d.sweeper_period_secs, 60);
        assert_eq!(d.reaper_period_secs, 300);
        assert_eq!(d.tool_refresh_period_secs, 900);
        assert_eq!(d.tool_refresh_backoff_secs, 3600);
        assert_eq!(d.unauthorized_backoff_secs, 10800);
        assert_eq!(d.idle_grace_period_secs, 60);
        assert_eq!(d.terminated_retention_secs, 86400);
        assert_eq!(d.shutdown_grace_secs, 30);
    }
}
