//! [`SessionManager`] — spawn, drive, and tear down PTY-backed agent
//! subprocesses (spec.md §4.3).
//!
//! Grounded in the teacher's `AgentProcessManager` (`Arc<DashMap<..>>`
//! registry, readiness-wait-by-polling, graceful-then-force-kill shape);
//! the supervised unit here is an OS subprocess attached to a PTY rather than
//! an in-process future.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use team_bus::{EventBus, PromptInfo, RuntimeEvent, ToolInfo};
use team_llm::LlmGateway;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::scratch::ensure_scratch_dir;
use crate::session::PtySession;

/// Tunables for readiness detection, stop grace, and dispatch verification.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Base directory scratch paths are resolved under
    /// (`data/team-scratch` by default).
    pub scratch_base: PathBuf,
    /// No-new-output window that counts as "settled" during the readiness
    /// wait.
    pub ready_settle_window: Duration,
    /// Total time budget for the readiness wait before giving up.
    pub ready_timeout: Duration,
    /// How long to wait after a graceful stop attempt before force-killing.
    pub stop_grace_period: Duration,
    /// Delay between sending a task prompt and sampling output growth.
    pub dispatch_verify_delay: Duration,
    /// Minimum new lines required to consider a dispatch acknowledged.
    pub dispatch_verify_min_lines: u64,
    /// Number of synthetic-`enter` retries before giving up and logging.
    pub dispatch_verify_retries: u32,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            scratch_base: PathBuf::from("data/team-scratch"),
            ready_settle_window: Duration::from_millis(800),
            ready_timeout: Duration::from_secs(30),
            stop_grace_period: Duration::from_secs(5),
            dispatch_verify_delay: Duration::from_secs(5),
            dispatch_verify_min_lines: 15,
            dispatch_verify_retries: 2,
        }
    }
}

/// Everything needed to spawn one agent's subprocess, assembled by the
/// caller (typically the Deployment Service) from `team_types::Agent` and
/// `team_types::Deployment`.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Owning deployment id (path-safe, used in the scratch path).
    pub deployment_id: String,
    /// Agent id (path-safe, used in the scratch path).
    pub agent_id: String,
    /// CLI agent type — resolved to a program name via [`resolve_program`].
    pub agent_type: String,
    /// Working directory override; `None` uses the ensured scratch dir.
    pub workdir: Option<PathBuf>,
    /// Environment variables injected on top of the inherited environment
    /// (credentials, adapter config).
    pub env: Vec<(String, String)>,
    /// System prompt, sent as the first message once the session is ready.
    pub system_prompt: String,
}

/// Map an agent type to its CLI binary. Unknown types are passed through
/// literally, so operators can register new adapters without a code change.
pub fn resolve_program(agent_type: &str) -> &str {
    match agent_type {
        "claude-code" => "claude",
        "codex" => "codex",
        other => other,
    }
}

struct ManagedSession {
    pty: AsyncMutex<PtySession>,
    buffer: Arc<std::sync::Mutex<crate::session::OutputBuffer>>,
    last_output_at: Arc<std::sync::Mutex<Instant>>,
    deployment_id: String,
    agent_id: String,
}

/// Aggregate counters mirroring the teacher's `RuntimeStats`.
#[derive(Debug, Clone, Default)]
pub struct SessionManagerStats {
    /// Currently live sessions.
    pub active_sessions: u64,
    /// Sessions spawned since startup.
    pub total_spawned: u64,
    /// Sessions that exited cleanly.
    pub total_stopped: u64,
    /// Sessions that exited with a fatal error.
    pub total_errored: u64,
}

/// Owns every live PTY session for this process.
pub struct SessionManager {
    sessions: Arc<DashMap<String, Arc<ManagedSession>>>,
    bus: Arc<dyn EventBus>,
    llm: Arc<LlmGateway>,
    config: SessionManagerConfig,
    stats: std::sync::RwLock<SessionManagerStats>,
}

impl SessionManager {
    /// Construct a manager bound to the given event bus and LLM gateway
    /// (used only by `forceClassifySession`).
    pub fn new(bus: Arc<dyn EventBus>, llm: Arc<LlmGateway>, config: SessionManagerConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            bus,
            llm,
            config,
            stats: std::sync::RwLock::new(SessionManagerStats::default()),
        }
    }

    /// Current aggregate stats.
    pub fn stats(&self) -> SessionManagerStats {
        self.stats.read().unwrap().clone()
    }

    /// `spawn(agent, deployment) → sessionId`.
    pub async fn spawn(&self, req: SpawnRequest) -> SessionResult<String> {
        let workdir = match req.workdir.clone() {
            Some(dir) => {
                std::fs::create_dir_all(&dir)?;
                dir
            }
            None => ensure_scratch_dir(&self.config.scratch_base, &req.deployment_id, &req.agent_id)?,
        };

        let program = resolve_program(&req.agent_type).to_string();
        let pty = PtySession::spawn(&program, &[], &workdir, &req.env)?;

        let buffer = pty.buffer.clone();
        let last_output_at = pty.last_output_at.clone();
        let session_id = uuid::Uuid::new_v4().to_string();

        let managed = Arc::new(ManagedSession {
            pty: AsyncMutex::new(pty),
            buffer,
            last_output_at,
            deployment_id: req.deployment_id.clone(),
            agent_id: req.agent_id.clone(),
        });
        self.sessions.insert(session_id.clone(), managed);

        {
            let mut stats = self.stats.write().unwrap();
            stats.active_sessions += 1;
            stats.total_spawned += 1;
        }

        self.wait_for_ready(&session_id).await?;

        if !req.system_prompt.trim().is_empty() {
            self.send(&session_id, &req.system_prompt).await?;
        }

        info!(session_id = %session_id, agent_id = %req.agent_id, "session spawned and ready");
        Ok(session_id)
    }

    async fn wait_for_ready(&self, session_id: &str) -> SessionResult<()> {
        let session = self.get(session_id)?;
        let deadline = Instant::now() + self.config.ready_timeout;
        loop {
            let quiet_for = session.last_output_at.lock().unwrap().elapsed();
            if quiet_for >= self.config.ready_settle_window {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::ReadyTimeout(
                    session_id.to_string(),
                    self.config.ready_timeout,
                ));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn get(&self, session_id: &str) -> SessionResult<Arc<ManagedSession>> {
        self.sessions
            .get(session_id)
            .map(|r| r.clone())
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// `send(sessionId, text)` — writes a task prompt, then performs
    /// dispatch verification (spec.md §4.3).
    pub async fn send(&self, session_id: &str, text: &str) -> SessionResult<()> {
        let session = self.get(session_id)?;
        let before = session.buffer.lock().unwrap().total_line_count();

        {
            let mut pty = session.pty.lock().await;
            pty.write_text(text)?;
            pty.write_key("enter")?;
        }

        for attempt in 0..=self.config.dispatch_verify_retries {
            tokio::time::sleep(self.config.dispatch_verify_delay).await;
            let after = session.buffer.lock().unwrap().total_line_count();
            if after.saturating_sub(before) >= self.config.dispatch_verify_min_lines {
                return Ok(());
            }
            if attempt < self.config.dispatch_verify_retries {
                debug!(session_id, attempt, "dispatch not yet acknowledged, retrying with enter");
                session.pty.lock().await.write_key("enter")?;
            }
        }

        warn!(session_id, "dispatch verification failed after retries");
        Ok(())
    }

    /// `sendKeys(sessionId, keyname)`.
    pub async fn send_keys(&self, session_id: &str, keyname: &str) -> SessionResult<()> {
        let session = self.get(session_id)?;
        session.pty.lock().await.write_key(keyname)
    }

    /// `stop(sessionId)` — graceful shutdown, then force-kill after a grace
    /// period.
    pub async fn stop(&self, session_id: &str) -> SessionResult<()> {
        let session = self.get(session_id)?;
        {
            let mut pty = session.pty.lock().await;
            let _ = pty.write_key("ctrl_c");
        }

        let deadline = Instant::now() + self.config.stop_grace_period;
        let exit_code = loop {
            let exited = session.pty.lock().await.has_exited();
            if let Some(code) = exited {
                break Some(code);
            }
            if Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        };

        let exit_code = match exit_code {
            Some(code) => Some(code),
            None => {
                let mut pty = session.pty.lock().await;
                pty.kill()?;
                pty.has_exited()
            }
        };

        self.sessions.remove(session_id);
        {
            let mut stats = self.stats.write().unwrap();
            stats.active_sessions = stats.active_sessions.saturating_sub(1);
            stats.total_stopped += 1;
        }

        let _ = self.bus.publish(&RuntimeEvent::AgentStopped {
            session_id: session_id.to_string(),
            reason: "stopped".to_string(),
            exit_code,
            login_detected: false,
        });
        Ok(())
    }

    /// `outputBuffer(sessionId) → string`.
    pub fn output_buffer(&self, session_id: &str) -> SessionResult<String> {
        let session = self.get(session_id)?;
        Ok(session.buffer.lock().unwrap().text())
    }

    /// `outputLineCount(sessionId) → int`.
    pub fn output_line_count(&self, session_id: &str) -> SessionResult<u64> {
        let session = self.get(session_id)?;
        Ok(session.buffer.lock().unwrap().total_line_count())
    }

    /// `forceClassifySession(sessionId, ctx)` — on-demand stall
    /// classification via the opaque LLM boundary.
    pub async fn force_classify_session(&self, session_id: &str, ctx: &str) -> SessionResult<String> {
        let session = self.get(session_id)?;
        let tail = session.buffer.lock().unwrap().tail(4000);
        let prompt = format!(
            "Context: {ctx}\n\nRecent session output:\n{tail}\n\nIs this agent session stalled (no forward progress)? Answer true or false."
        );

        let classification = match self
            .llm
            .classify(prompt, None, "stall_classification")
            .await
        {
            Ok(true) => "stalled".to_string(),
            Ok(false) => "active".to_string(),
            Err(e) => {
                warn!(session_id, error = %e, "stall classification call failed");
                "unknown".to_string()
            }
        };

        let _ = self.bus.publish(&RuntimeEvent::StallClassified {
            session_id: session_id.to_string(),
            classification: classification.clone(),
        });
        Ok(classification)
    }

    /// Emit `tool_running` for a detected tool invocation. Exposed so a
    /// future output-classifier (heuristic or LLM-based) can drive session
    /// lifecycle events without reaching into the session map itself.
    pub fn notify_tool_running(&self, session_id: &str, tool_name: String, description: Option<String>, auto_interrupt_enabled: bool) {
        let _ = self.bus.publish(&RuntimeEvent::ToolRunning {
            session_id: session_id.to_string(),
            info: ToolInfo { tool_name, description },
            auto_interrupt_enabled,
        });
    }

    /// Emit `blocking_prompt` for a detected interactive prompt.
    pub fn notify_blocking_prompt(&self, session_id: &str, prompt_info: PromptInfo) {
        let _ = self.bus.publish(&RuntimeEvent::BlockingPrompt {
            session_id: session_id.to_string(),
            prompt_info,
        });
    }

    /// Which deployment/agent a live session id belongs to, for callers that
    /// only have the opaque session id (e.g. the Anomaly Coordinator).
    pub fn owner_of(&self, session_id: &str) -> SessionResult<(String, String)> {
        let session = self.get(session_id)?;
        Ok((session.deployment_id.clone(), session.agent_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use team_bus::InMemoryBus;
    use team_llm::Config;

    async fn test_manager() -> SessionManager {
        std::env::set_var("ANTHROPIC_API_KEY", "sk-ant-test-key-not-real");
        let config = Config::from_env().expect("test llm config");
        let llm = Arc::new(LlmGateway::new(config).await.expect("test llm gateway"));
        let bus = Arc::new(InMemoryBus::default());
        let mut session_config = SessionManagerConfig::default();
        session_config.scratch_base = std::env::temp_dir().join("team-session-tests");
        session_config.ready_settle_window = Duration::from_millis(200);
        session_config.ready_timeout = Duration::from_secs(5);
        session_config.dispatch_verify_delay = Duration::from_millis(100);
        session_config.dispatch_verify_min_lines = 1;
        session_config.dispatch_verify_retries = 1;
        SessionManager::new(bus, llm, session_config)
    }

    fn ticking_shell_request(deployment: &str, agent: &str) -> SpawnRequest {
        SpawnRequest {
            deployment_id: deployment.to_string(),
            agent_id: agent.to_string(),
            agent_type: "sh".to_string(),
            workdir: None,
            env: vec![],
            system_prompt: String::new(),
        }
    }

    #[tokio::test]
    async fn spawn_waits_for_quiescence_then_reports_output() {
        let manager = test_manager().await;
        let session_id = manager
            .spawn(ticking_shell_request("dep-spawn", "agent-spawn"))
            .await
            .expect("spawn should succeed");

        assert!(manager.output_line_count(&session_id).is_ok());
        manager.stop(&session_id).await.unwrap();
    }

    #[tokio::test]
    async fn send_grows_the_output_buffer() {
        let manager = test_manager().await;
        let session_id = manager
            .spawn(ticking_shell_request("dep-send", "agent-send"))
            .await
            .expect("spawn should succeed");

        manager
            .send(&session_id, "for i in 1 2 3 4 5; do echo line-$i; done")
            .await
            .unwrap();

        let count = manager.output_line_count(&session_id).unwrap();
        assert!(count > 0, "expected some output after sending a command");

        manager.stop(&session_id).await.unwrap();
    }

    #[tokio::test]
    async fn stop_removes_the_session() {
        let manager = test_manager().await;
        let session_id = manager
            .spawn(ticking_shell_request("dep-stop", "agent-stop"))
            .await
            .unwrap();

        manager.stop(&session_id).await.unwrap();
        assert!(manager.output_buffer(&session_id).is_err());
    }

    #[tokio::test]
    async fn unknown_session_id_returns_not_found() {
        let manager = test_manager().await;
        let result = manager.send("does-not-exist", "hi").await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }
}
