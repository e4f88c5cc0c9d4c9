#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **team-messaging** – Messaging Bus for the team runtime orchestrator
//! (spec.md §4.5).
//!
//! [`MessagingBus`] resolves `sendMessage`'s `to` target (an agent id or a
//! role name), enforces [`routing::validate_routing`]'s up/down/explicit-rule
//! legality check, persists the envelope, and — if the recipient is idle
//! with no live session — spawns it through [`team_session::SessionManager`]
//! before delivering every pending message as one formatted block, the way
//! the bus drives spawn-on-first-message in spec.md §4.5's delivery model.

pub mod bus;
pub mod error;
pub mod roster;
pub mod routing;

pub use bus::{build_kickoff_prompt, MessagingBus, Sender, SendMessageResult};
pub use error::{MessagingError, MessagingResult};
pub use roster::RosterEntry;
pub use routing::{resolve_target, validate_routing};
