//! Queue-worker pool and periodic stall sweep (spec.md §5).
//!
//! Durable queueing is an external collaborator's job; what lives here is
//! the in-process shape: a bounded channel standing in for the queue, a
//! fixed pool of workers draining it, and a background sweep that forces a
//! stall classification on every agent still `running` with an assigned
//! step, the same periodic cadence `toka-orchestration`'s session-manager
//! reaper uses for its own housekeeping loop.

use std::sync::Arc;
use std::time::Duration;

use team_bus::{EventBus, RuntimeEvent, TeamEventName};
use team_messaging::{MessagingBus, Sender};
use team_store::DeploymentStore;

/// One `team_agent_loop` job: an agent loop dispatch that has already been
/// persisted (status `running`, `currentStepId` set) by the Workflow
/// Executor and now needs its kickoff message actually sent.
#[derive(Debug, Clone)]
struct AgentLoopJob {
    workspace_id: team_types::WorkspaceId,
    deployment_id: team_types::DeploymentId,
    agent_id: team_types::AgentId,
    task: String,
}

/// Spawns the bus-to-queue bridge plus a fixed pool of workers that consume
/// it, and the periodic stall sweep. All three run for the lifetime of the
/// process; callers keep the returned handles only to let them run.
pub fn spawn(
    bus: Arc<dyn EventBus>,
    store: Arc<dyn DeploymentStore>,
    sessions: Arc<team_session::SessionManager>,
    messaging: Arc<MessagingBus>,
    worker_count: usize,
) -> Vec<tokio::task::JoinHandle<()>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<AgentLoopJob>(256);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    let mut handles = Vec::with_capacity(worker_count + 2);

    {
        let mut bus_rx = bus.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(RuntimeEvent::Team { name: TeamEventName::AgentLoopStarted, workspace_id, deployment_id, agent_id: Some(agent_id), payload, .. }) => {
                        let task = payload.get("task").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                        let job = AgentLoopJob { workspace_id, deployment_id, agent_id, task };
                        if tx.send(job).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "dispatch bridge fell behind the event bus");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    for worker_id in 0..worker_count.max(1) {
        let rx = Arc::clone(&rx);
        let messaging = Arc::clone(&messaging);
        handles.push(tokio::spawn(async move {
            loop {
                let job = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };
                let Some(job) = job else { break };
                if let Err(e) = messaging
                    .send_message(job.workspace_id, job.deployment_id, Sender::System, &job.agent_id.to_string(), &job.task)
                    .await
                {
                    tracing::warn!(worker_id, agent_id = %job.agent_id, error = %e, "agent loop dispatch failed");
                }
            }
        }));
    }

    handles.push(tokio::spawn(stall_sweep(store, sessions)));

    handles
}

/// Every 20 seconds, force a stall classification on every agent the store
/// reports as running with an assigned step.
async fn stall_sweep(store: Arc<dyn DeploymentStore>, sessions: Arc<team_session::SessionManager>) {
    let mut interval = tokio::time::interval(Duration::from_secs(20));
    loop {
        interval.tick().await;
        let agents = match store.list_running_agents().await {
            Ok(agents) => agents,
            Err(e) => {
                tracing::warn!(error = %e, "stall sweep could not list running agents");
                continue;
            }
        };
        for agent in agents {
            let (Some(session_id), Some(step_id)) = (agent.runtime_session_id.clone(), agent.current_step_id.clone()) else {
                continue;
            };
            if let Err(e) = sessions.force_classify_session(&session_id, &step_id).await {
                tracing::warn!(session_id, error = %e, "stall sweep classification failed");
            }
        }
    }
}
