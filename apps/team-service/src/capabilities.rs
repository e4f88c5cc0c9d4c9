//! Capability-string validation and the persistence-ensured augmentation
//! rule applied when materializing agents from a role (spec.md §4.8/§6).

use std::collections::HashSet;

/// Write operations that count as "the role can already persist something"
/// for the purposes of [`ensure_persistence_capability`].
const WRITE_OPERATIONS: &[&str] = &[
    "create", "update", "complete", "assign", "delete", "move", "register", "restore", "approve",
    "teardown", "deploy", "trigger", "start",
];

/// A role whose capability set carries none of these gets this bundle added
/// so it can still record task/page state and mark the target experiment
/// updated, even if its own remit is read-only (spec.md §4.8).
const PERSISTENCE_FALLBACK: &[&str] = &["task.create", "page.create", "experiment.update"];

/// A capability string is `resource.operation`, `resource.*`, or the literal
/// `*`. Anything else is rejected at template-create/update and
/// deploy-from-pattern time.
pub fn validate_capability_format(capability: &str) -> Result<(), String> {
    if capability == "*" {
        return Ok(());
    }
    let mut parts = capability.splitn(2, '.');
    let resource = parts.next().unwrap_or_default();
    let operation = parts.next();
    if resource.is_empty() || operation.map_or(true, str::is_empty) {
        return Err(format!("invalid capability string: {capability:?}"));
    }
    Ok(())
}

/// Whether `capability` grants at least the given wildcard or exact match.
fn is_write_capability(capability: &str) -> bool {
    if capability == "*" {
        return true;
    }
    match capability.split_once('.') {
        Some((_, "*")) => true,
        Some((_, op)) => WRITE_OPERATIONS.contains(&op),
        None => false,
    }
}

/// Augment `capabilities` with [`PERSISTENCE_FALLBACK`] if none of them
/// already grants a write operation or a wildcard.
pub fn ensure_persistence_capability(capabilities: &mut HashSet<String>) {
    if capabilities.iter().any(|c| is_write_capability(c)) {
        return;
    }
    for cap in PERSISTENCE_FALLBACK {
        capabilities.insert((*cap).to_string());
    }
}
