//! Coordinated authentication flow (spec.md §4.6): exactly one agent per
//! `(deploymentId, agentType)` drives login; every other simultaneous
//! `login_required` is queued behind it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use team_types::{AgentId, DeploymentId};

/// One in-flight login flow: the agent driving it, the session it is
/// driving from, and everyone queued behind it.
#[derive(Debug, Clone)]
pub struct AuthFlow {
    /// The agent currently driving the login.
    pub primary_agent_id: AgentId,
    /// Its live session id.
    pub primary_session_id: String,
    /// Agents whose `login_required` arrived after registration; stopped
    /// and marked `error` until the primary flow completes.
    pub queued: Vec<AgentId>,
}

/// Outcome of [`AuthFlowRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// This call registered the flow; the caller should drive login.
    Primary,
    /// A flow was already in-flight; the caller was queued behind it.
    Queued,
}

/// Registry of in-flight auth flows keyed by `(deploymentId, agentType)`.
#[derive(Debug, Default)]
pub struct AuthFlowRegistry {
    flows: Mutex<HashMap<(DeploymentId, String), AuthFlow>>,
}

impl AuthFlowRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent_id`/`session_id` as driving login for
    /// `(deployment_id, agent_type)`, or queue it behind whoever already is.
    pub fn register(
        &self,
        deployment_id: DeploymentId,
        agent_type: &str,
        agent_id: AgentId,
        session_id: &str,
    ) -> RegisterOutcome {
        let mut flows = self.flows.lock().unwrap();
        let key = (deployment_id, agent_type.to_string());
        match flows.get_mut(&key) {
            Some(flow) => {
                flow.queued.push(agent_id);
                RegisterOutcome::Queued
            }
            None => {
                flows.insert(
                    key,
                    AuthFlow {
                        primary_agent_id: agent_id,
                        primary_session_id: session_id.to_string(),
                        queued: Vec::new(),
                    },
                );
                RegisterOutcome::Primary
            }
        }
    }

    /// Remove and return the completed flow, so the caller can flip every
    /// queued agent back to `idle`.
    pub fn take(&self, deployment_id: DeploymentId, agent_type: &str) -> Option<AuthFlow> {
        self.flows.lock().unwrap().remove(&(deployment_id, agent_type.to_string()))
    }
}

/// Strip ANSI CSI/SGR escape sequences (`ESC [ ... letter`) from captured
/// terminal output before scanning it for text.
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Scan ANSI-stripped `text` for a URL, preferring one hosted on
/// `claude.ai`/`anthropic.com` over any other `http(s)://` token found.
pub fn extract_login_url(text: &str) -> Option<String> {
    let cleaned = strip_ansi(text);
    let mut fallback = None;
    for token in cleaned.split_whitespace() {
        let candidate = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '/' && c != '.' && c != ':' && c != '-' && c != '_' && c != '?' && c != '=' && c != '&');
        if candidate.starts_with("http://") || candidate.starts_with("https://") {
            if candidate.contains("claude.ai") || candidate.contains("anthropic.com") {
                return Some(candidate.to_string());
            }
            fallback.get_or_insert_with(|| candidate.to_string());
        }
    }
    fallback
}

/// Poll `read_output` every `poll_interval` until it reports a successful
/// login marker or `timeout` elapses. Generic over the read function so it
/// can be driven by a fake in tests, not just a live PTY session.
pub async fn wait_for_login_success<F, Fut>(mut read_output: F, poll_interval: Duration, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = String>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let text = read_output().await;
        if text.contains("Login successful") || text.contains("Logged in as") {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_csi_color_codes() {
        let raw = "\u{1b}[31mVisit\u{1b}[0m https://claude.ai/login now";
        assert_eq!(strip_ansi(raw), "Visit https://claude.ai/login now");
    }

    #[test]
    fn prefers_claude_or_anthropic_urls() {
        let text = "see https://example.com/x or https://claude.ai/login?token=abc for auth";
        assert_eq!(extract_login_url(text), Some("https://claude.ai/login?token=abc".to_string()));
    }

    #[test]
    fn falls_back_to_any_url_if_no_known_host() {
        let text = "visit https://example.com/login to continue";
        assert_eq!(extract_login_url(text), Some("https://example.com/login".to_string()));
    }

    #[test]
    fn no_url_returns_none() {
        assert_eq!(extract_login_url("nothing to see here"), None);
    }

    #[test]
    fn second_registration_is_queued_behind_the_first() {
        let registry = AuthFlowRegistry::new();
        let deployment_id = DeploymentId::new();
        let a = AgentId::new();
        let b = AgentId::new();

        assert_eq!(registry.register(deployment_id, "claude-code", a, "sess-a"), RegisterOutcome::Primary);
        assert_eq!(registry.register(deployment_id, "claude-code", b, "sess-b"), RegisterOutcome::Queued);

        let flow = registry.take(deployment_id, "claude-code").unwrap();
        assert_eq!(flow.primary_agent_id, a);
        assert_eq!(flow.queued, vec![b]);
    }

    #[tokio::test]
    async fn wait_for_login_success_detects_marker() {
        let mut calls = 0;
        let ok = wait_for_login_success(
            || {
                calls += 1;
                let n = calls;
                async move { if n < 3 { "still waiting".to_string() } else { "Login successful".to_string() } }
            },
            Duration::from_millis(1),
            Duration::from_secs(5),
        )
        .await;
        assert!(ok);
    }

    #[tokio::test]
    async fn wait_for_login_success_times_out() {
        let ok = wait_for_login_success(
            || async { "still waiting".to_string() },
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
        .await;
        assert!(!ok);
    }
}
