//! Logging setup (§4.8). Structured logging via `tracing` +
//! `tracing-subscriber`, matching the way the CLI `run` command wires it:
//! an env-filter defaulting to the configured level, with an optional JSON
//! formatter for log shipping.

use garm_core::config::ObservabilityConfig;

/// Installs the global `tracing` subscriber. Call once at process start.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());

    if config.json_format {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
