//! Scratch-directory path construction and the containment guard (spec.md §4.3).

use std::path::{Path, PathBuf};

use team_types::validate_path_safe_id;

use crate::error::{SessionError, SessionResult};

/// Resolve (and ensure-create) the scratch directory for `(deployment_id,
/// agent_id)` under `base`, rejecting anything that would resolve outside of
/// it.
pub fn ensure_scratch_dir(base: &Path, deployment_id: &str, agent_id: &str) -> SessionResult<PathBuf> {
    validate_path_safe_id(deployment_id, "deploymentId")
        .map_err(SessionError::InvalidId)?;
    validate_path_safe_id(agent_id, "agentId")
        .map_err(SessionError::InvalidId)?;

    let dir = base.join(deployment_id).join(agent_id);
    std::fs::create_dir_all(&dir)?;

    let canonical_base = base.canonicalize()?;
    let canonical_dir = dir.canonicalize()?;
    if !canonical_dir.starts_with(&canonical_base) {
        return Err(SessionError::PathEscape(
            deployment_id.to_string(),
            agent_id.to_string(),
        ));
    }

    Ok(dir)
}

/// Remove a scratch directory if present. Used by teardown/reset (§4.8).
pub fn remove_scratch_dir(base: &Path, deployment_id: &str, agent_id: &str) -> SessionResult<()> {
    validate_path_safe_id(deployment_id, "deploymentId")
        .map_err(SessionError::InvalidId)?;
    validate_path_safe_id(agent_id, "agentId")
        .map_err(SessionError::InvalidId)?;

    let dir = base.join(deployment_id).join(agent_id);
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    Ok(())
}
