//! CLI surface and process-wide configuration (spec.md §6 env vars).

use std::time::Duration;

use clap::Parser;
use team_session::SessionManagerConfig;

#[derive(Parser)]
#[command(name = "team-service")]
#[command(about = "Team Runtime Orchestrator - deployment service and HTTP API")]
#[command(version)]
pub struct Cli {
    /// HTTP server port.
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// JWT secret used to validate capability tokens on every request.
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Base directory agent scratch directories are created under.
    #[arg(long, default_value = "data/team-scratch")]
    pub scratch_base: String,

    /// Number of queue workers draining `team_agent_loop` dispatch jobs.
    #[arg(long, default_value = "4")]
    pub dispatch_workers: usize,
}

/// Build the agent session manager's tuning knobs from environment
/// variables, falling back to [`SessionManagerConfig::default`]'s values.
///
/// Recognizes `TEAM_AGENT_READY_SETTLE_MS`, `TEAM_DISPATCH_VERIFY_DELAY_MS`,
/// `TEAM_DISPATCH_MIN_GROWTH_LINES` (spec.md §6).
pub fn session_manager_config(scratch_base: &str) -> SessionManagerConfig {
    let mut config = SessionManagerConfig {
        scratch_base: scratch_base.into(),
        ..SessionManagerConfig::default()
    };

    if let Some(ms) = env_u64("TEAM_AGENT_READY_SETTLE_MS") {
        config.ready_settle_window = Duration::from_millis(ms);
    }
    if let Some(ms) = env_u64("TEAM_DISPATCH_VERIFY_DELAY_MS") {
        config.dispatch_verify_delay = Duration::from_millis(ms);
    }
    if let Some(lines) = env_u64("TEAM_DISPATCH_MIN_GROWTH_LINES") {
        config.dispatch_verify_min_lines = lines;
    }

    config
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Default agent working directory for a role whose pattern omits one, from
/// `TEAM_AGENT_DEFAULT_WORKDIR`.
pub fn default_agent_workdir() -> Option<String> {
    std::env::var("TEAM_AGENT_DEFAULT_WORKDIR").ok()
}
