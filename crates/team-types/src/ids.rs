//! Newtype identifiers, `Uuid`-backed (per spec §6: "IDs are UUIDs").
//!
//! Each id is its own type so the compiler catches an `AgentId` passed where
//! a `DeploymentId` is expected, the same motivation as `toka-types`'
//! `EntityId`, just specialized per entity instead of a single shared type.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(WorkspaceId, "Tenant scope every resource is checked against.");
uuid_id!(SpaceId, "A project/space within a workspace.");
uuid_id!(DeploymentId, "A single team deployment.");
uuid_id!(AgentId, "One materialized agent instance within a deployment.");
uuid_id!(TemplateId, "A stored template (system or custom org pattern).");
uuid_id!(UserId, "A pseudo-user identity provisioned for an agent.");
