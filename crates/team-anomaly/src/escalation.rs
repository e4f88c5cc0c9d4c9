//! Coordinator-blocked and main-brain escalation (spec.md §4.6), each
//! enforcing at-most-one-in-flight per `runtimeSessionId`.

use std::sync::Arc;

use dashmap::DashSet;
use team_llm::LlmGateway;
use team_session::SessionManager;

/// Text a skip-escalation response is recognized by, case-insensitively.
pub const SKIP_MARKER: &str = "SKIP";

/// A guard ensuring only one escalation attempt runs per key at a time.
#[derive(Default)]
pub struct InFlightGuard {
    keys: DashSet<String>,
}

impl InFlightGuard {
    /// Construct an empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to enter the critical section for `key`; `false` if already
    /// in-flight.
    pub fn try_enter(&self, key: &str) -> bool {
        self.keys.insert(key.to_string())
    }

    /// Release `key` once the attempt (successful or not) has finished.
    pub fn leave(&self, key: &str) {
        self.keys.remove(key);
    }
}

/// Whether an escalation call produced a usable unblocking response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// The LLM produced a non-empty, non-skip response; it was sent.
    Responded(String),
    /// The LLM returned nothing useful; the caller should try the next
    /// escalation stage (or surface to the user if there is none).
    Skipped,
    /// Another escalation for this session is already in flight.
    AlreadyInFlight,
}

/// Ask the LLM for an unblocking response given an org-chart-style context
/// and recent session output, returning `Skipped` if it declines.
async fn ask_for_unblocking_response(llm: &LlmGateway, prompt: String) -> anyhow::Result<Option<String>> {
    let response = llm.generate(prompt, None, "unblock_escalation").await?;
    let text = response.content().trim().to_string();
    if text.is_empty() || text.eq_ignore_ascii_case(SKIP_MARKER) {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

/// First-stage escalation: the lead agent is asked to unblock a non-lead
/// agent that messaging alone didn't unstick.
pub struct CoordinatorResponseService {
    sessions: Arc<SessionManager>,
    llm: Arc<LlmGateway>,
    guard: InFlightGuard,
}

impl CoordinatorResponseService {
    /// Construct the service.
    pub fn new(sessions: Arc<SessionManager>, llm: Arc<LlmGateway>) -> Self {
        Self { sessions, llm, guard: InFlightGuard::new() }
    }

    /// Attempt to unblock `blocked_session_id` using `lead_session_id`'s
    /// role authority: builds a prompt from the org chart summary and the
    /// blocked session's recent output, asks the LLM, and sends any
    /// non-skip response into the blocked session.
    pub async fn respond(
        &self,
        blocked_session_id: &str,
        org_chart_summary: &str,
        blocked_recent_output: &str,
    ) -> anyhow::Result<EscalationOutcome> {
        if !self.guard.try_enter(blocked_session_id) {
            return Ok(EscalationOutcome::AlreadyInFlight);
        }
        let result = self.respond_inner(blocked_session_id, org_chart_summary, blocked_recent_output).await;
        self.guard.leave(blocked_session_id);
        result
    }

    async fn respond_inner(
        &self,
        blocked_session_id: &str,
        org_chart_summary: &str,
        blocked_recent_output: &str,
    ) -> anyhow::Result<EscalationOutcome> {
        let tail: String = blocked_recent_output.chars().rev().take(500).collect::<Vec<_>>().into_iter().rev().collect();
        let prompt = format!(
            "Org chart:\n{org_chart_summary}\n\nA teammate appears blocked. Recent output:\n{tail}\n\n\
Respond with the exact text to send them to unblock it, or reply {SKIP_MARKER} if nothing useful can be said."
        );
        match ask_for_unblocking_response(&self.llm, prompt).await? {
            Some(text) => {
                self.sessions.send(blocked_session_id, &text).await?;
                Ok(EscalationOutcome::Responded(text))
            }
            None => Ok(EscalationOutcome::Skipped),
        }
    }
}

/// Second-stage escalation: when the lead itself is blocked, ask "at
/// workspace authority" — no lead-of-leads exists, so the prompt speaks for
/// the workspace operator instead of another agent role.
pub struct MainBrainEscalation {
    sessions: Arc<SessionManager>,
    llm: Arc<LlmGateway>,
    guard: InFlightGuard,
}

impl MainBrainEscalation {
    /// Construct the service.
    pub fn new(sessions: Arc<SessionManager>, llm: Arc<LlmGateway>) -> Self {
        Self { sessions, llm, guard: InFlightGuard::new() }
    }

    /// Attempt to unblock the lead's own session at workspace authority.
    pub async fn escalate(&self, lead_session_id: &str, deployment_name: &str, lead_recent_output: &str) -> anyhow::Result<EscalationOutcome> {
        if !self.guard.try_enter(lead_session_id) {
            return Ok(EscalationOutcome::AlreadyInFlight);
        }
        let result = self.escalate_inner(lead_session_id, deployment_name, lead_recent_output).await;
        self.guard.leave(lead_session_id);
        result
    }

    async fn escalate_inner(&self, lead_session_id: &str, deployment_name: &str, lead_recent_output: &str) -> anyhow::Result<EscalationOutcome> {
        let tail: String = lead_recent_output.chars().rev().take(500).collect::<Vec<_>>().into_iter().rev().collect();
        let prompt = format!(
            "You are acting with workspace-operator authority over the team deployment \"{deployment_name}\". \
Its lead agent is blocked. Recent output:\n{tail}\n\n\
Respond with the exact text to send it to unblock it, or reply {SKIP_MARKER} if nothing useful can be said."
        );
        match ask_for_unblocking_response(&self.llm, prompt).await? {
            Some(text) => {
                self.sessions.send(lead_session_id, &text).await?;
                Ok(EscalationOutcome::Responded(text))
            }
            None => Ok(EscalationOutcome::Skipped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_rejects_reentry_until_released() {
        let guard = InFlightGuard::new();
        assert!(guard.try_enter("sess-1"));
        assert!(!guard.try_enter("sess-1"));
        guard.leave("sess-1");
        assert!(guard.try_enter("sess-1"));
    }
}
