//! Planning: which units a run will touch, in which order
//!
//! Planning is pure. It reads the registry and a snapshot of the ledger and
//! produces the ordered work list; the Runner executes it.

use crate::errors::{MigrexError, Result};
use crate::identifier::MigrationId;
use crate::registry::Registry;
use crate::unit::MigrationUnit;
use std::collections::BTreeSet;

/// Work list for `migrate up`
#[derive(Debug)]
pub struct UpPlan<'r> {
    /// Pending units, ascending by identifier
    pub pending: Vec<&'r MigrationUnit>,
    /// Applied identifiers with no definition in the registry
    pub orphans: Vec<MigrationId>,
}

impl UpPlan<'_> {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_ids(&self) -> Vec<&MigrationId> {
        self.pending.iter().map(|u| u.id()).collect()
    }
}

/// One entry of a revert plan, most recently applied first
#[derive(Debug)]
pub enum DownStep<'r> {
    Revert(&'r MigrationUnit),
    /// The unit exists but has no down step; the run stops here
    Irreversible(&'r MigrationUnit),
    /// The ledger names a unit the registry no longer has; the run stops here
    MissingDefinition(MigrationId),
}

impl DownStep<'_> {
    pub fn id(&self) -> &MigrationId {
        match self {
            DownStep::Revert(unit) | DownStep::Irreversible(unit) => unit.id(),
            DownStep::MissingDefinition(id) => id,
        }
    }
}

/// Work list for `migrate down`
#[derive(Debug)]
pub struct DownPlan<'r> {
    pub steps: Vec<DownStep<'r>>,
}

/// Compute the pending sequence
///
/// `pending = registry - applied`, ascending. With a target, only pending
/// units whose identifier is `<= target` are kept, so the run applies a
/// prefix of history and never an arbitrary subset.
///
/// # Errors
///
/// `MigrexError::UnknownTarget` if `target` is not a registered identifier.
pub fn plan_up<'r>(
    registry: &'r Registry,
    applied: &BTreeSet<MigrationId>,
    target: Option<&MigrationId>,
) -> Result<UpPlan<'r>> {
    if let Some(target) = target {
        if !registry.contains(target.as_str()) {
            return Err(MigrexError::UnknownTarget {
                id: target.to_string(),
            });
        }
    }

    let pending = registry
        .list_all()
        .iter()
        .filter(|unit| !applied.contains(unit.id()))
        .take_while(|unit| target.map_or(true, |t| unit.id() <= t))
        .collect();

    Ok(UpPlan {
        pending,
        orphans: orphans(registry, applied.iter()),
    })
}

/// Compute the revert sequence
///
/// `applied_in_order` lists ledger identifiers oldest first. The last `count`
/// are returned most recent first. Irreversible or undefined units stay in
/// the plan at their position so the Runner can stop exactly there.
///
/// # Errors
///
/// `MigrexError::InvalidInput` if `count` is zero.
pub fn plan_down<'r>(
    registry: &'r Registry,
    applied_in_order: &[MigrationId],
    count: usize,
) -> Result<DownPlan<'r>> {
    if count == 0 {
        return Err(MigrexError::InvalidInput {
            reason: "step count must be at least 1".to_string(),
        });
    }

    let steps = applied_in_order
        .iter()
        .rev()
        .take(count)
        .map(|id| match registry.get(id.as_str()) {
            Some(unit) if unit.is_reversible() => DownStep::Revert(unit),
            Some(unit) => DownStep::Irreversible(unit),
            None => DownStep::MissingDefinition(id.clone()),
        })
        .collect();

    Ok(DownPlan { steps })
}

/// Applied identifiers that the registry does not know, ascending
pub fn orphans<'a>(
    registry: &Registry,
    applied: impl IntoIterator<Item = &'a MigrationId>,
) -> Vec<MigrationId> {
    let mut orphans: Vec<MigrationId> = applied
        .into_iter()
        .filter(|id| !registry.contains(id.as_str()))
        .cloned()
        .collect();
    orphans.sort();
    orphans
}
