#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **team-session** – Agent Session Manager for the team runtime
//! orchestrator (spec.md §4.3).
//!
//! Owns the lifecycle of the interactive CLI subprocesses that back each
//! deployed agent: a [`SessionManager`] spawns each agent's configured CLI
//! inside a pseudo-terminal (so it behaves as it would in an operator's own
//! shell — no line-buffering surprises, no missed TUI redraws), captures its
//! output into a bounded ring buffer, and exposes the primitives the rest of
//! the system drives it with: `send`, `sendKeys`, `stop`,
//! `outputBuffer`/`outputLineCount`, `forceClassifySession`.
//!
//! This crate owns subprocess I/O only. Interpreting that output — detecting
//! tool invocations, blocking prompts, login flows — is the Anomaly
//! Coordinator's job (`team-anomaly`), which subscribes to the events this
//! crate publishes on the shared [`team_bus::EventBus`].
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use team_bus::InMemoryBus;
//! use team_session::{SessionManager, SessionManagerConfig, SpawnRequest};
//!
//! # async fn example(llm: Arc<team_llm::LlmGateway>) -> anyhow::Result<()> {
//! let bus = Arc::new(InMemoryBus::default());
//! let manager = SessionManager::new(bus, llm, SessionManagerConfig::default());
//!
//! let session_id = manager.spawn(SpawnRequest {
//!     deployment_id: "dep-1".into(),
//!     agent_id: "agent-1".into(),
//!     agent_type: "claude-code".into(),
//!     workdir: None,
//!     env: vec![],
//!     system_prompt: "You are the lead engineer.".into(),
//! }).await?;
//!
//! manager.send(&session_id, "Start on the first task.").await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod manager;
pub mod scratch;
pub mod session;

pub use error::{SessionError, SessionResult};
pub use manager::{resolve_program, SessionManager, SessionManagerConfig, SessionManagerStats, SpawnRequest};
pub use session::{OutputBuffer, PtySession};
