//! Stored, named org patterns (spec.md §3 `Template`).

use serde::{Deserialize, Serialize};

use crate::{
    ids::{TemplateId, WorkspaceId},
    pattern::OrgPattern,
    validate_bounded_text, ValidationError, MAX_NAME_LEN,
};

/// Whether a template is a shared, read-only system template or a
/// per-tenant, mutable, soft-deletable custom template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// Shared, read-only; update/delete must be rejected (403).
    System,
    /// Per-tenant, mutable, soft-deletable.
    Custom,
}

/// A named, versioned org pattern plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Unique id.
    pub id: TemplateId,
    /// Display name.
    pub name: String,
    /// System or custom.
    pub kind: TemplateKind,
    /// Owning workspace for a custom template; `None` for system templates,
    /// which are shared across every workspace.
    pub workspace_id: Option<WorkspaceId>,
    /// The org pattern this template materializes.
    pub pattern: OrgPattern,
    /// Soft-delete marker (custom templates only).
    pub deleted: bool,
}

impl Template {
    /// Create a new template, validating the name and the embedded pattern.
    pub fn new(
        name: String,
        kind: TemplateKind,
        workspace_id: Option<WorkspaceId>,
        pattern: OrgPattern,
    ) -> Result<Self, ValidationError> {
        validate_bounded_text(&name, "template.name", MAX_NAME_LEN)?;
        pattern.validate().map_err(|e| e.to_string())?;
        if kind == TemplateKind::Custom && workspace_id.is_none() {
            return Err("custom templates must have an owning workspace".to_string());
        }
        Ok(Self {
            id: TemplateId::new(),
            name,
            kind,
            workspace_id,
            pattern,
            deleted: false,
        })
    }

    /// Whether mutation (update/delete) is permitted for this template.
    pub fn is_mutable(&self) -> bool {
        self.kind == TemplateKind::Custom
    }
}
