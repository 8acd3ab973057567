//! Reconciliation engine
//!
//! Pure consolidation from raw attribution tuples to canonical
//! assignments, checked against one authority snapshot.
//!
//! # Architecture
//!
//! Three passes in fixed order, so the same inputs always produce the
//! same output:
//!
//! 1. **Identity** — person ids present in the snapshot pass through;
//!    corrupted renderings attempt repair against the member catalog;
//!    remaining misses are re-resolved by recorded display name.
//! 2. **Group** — group ids present in the role catalog pass through;
//!    corrupted renderings attempt repair; stale ids re-resolve by group
//!    name to the currently valid id. A group name with more than one
//!    live id is a data-quality conflict: reported, never auto-resolved.
//! 3. **Pair dedup** — fold into one [`Assignment`] per
//!    `(person_id, group_id)`, summing per-source evidence counts.
//!
//! Evidence is conserved: every input tuple either lands in exactly one
//! assignment's counts or is accounted for by exactly one rejection
//! counter.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use rollcall_common::ids::repair_corrupted_id;
use rollcall_common::model::{Assignment, GroupId, PersonId};

use crate::adapters::PersonRef;
use crate::mapper::{GroupRef, RawTuple};
use crate::snapshot::{AuthoritySnapshot, NameLookup};

/// Cap on sample strings kept per rejection reason
const SAMPLE_LIMIT: usize = 10;

/// Consolidation accounting, one counter per rejection or fix-up reason
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub tuples_in: usize,
    pub assignments_out: usize,
    /// Stale person ids re-resolved through the roster by display name
    pub person_fixed_by_name: usize,
    /// Corrupted person renderings repaired against the member catalog
    pub person_repaired: usize,
    pub person_unresolved: usize,
    /// Corrupted person renderings that could not be repaired or named
    pub person_corrupted: usize,
    /// Stale group ids re-resolved by group name
    pub group_remapped: usize,
    /// Corrupted group renderings repaired against the role catalog
    pub group_repaired: usize,
    pub group_unresolved: usize,
    /// Group names carrying more than one currently valid id
    pub group_conflicts: usize,
    pub person_unresolved_samples: Vec<String>,
    pub person_corrupted_samples: Vec<String>,
    pub group_unresolved_samples: Vec<String>,
    pub group_conflict_samples: Vec<String>,
}

impl ReconcileReport {
    fn sample(list: &mut Vec<String>, value: String) {
        if list.len() < SAMPLE_LIMIT && !list.contains(&value) {
            list.push(value);
        }
    }

    /// Tuples that did not survive consolidation
    pub fn dropped(&self) -> usize {
        self.person_unresolved + self.person_corrupted + self.group_unresolved + self.group_conflicts
    }
}

/// Consolidate raw tuples into canonical assignments.
///
/// Deterministic: output order is by group name, then total evidence
/// descending, then person id.
pub fn reconcile(
    tuples: Vec<RawTuple>,
    snapshot: &AuthoritySnapshot,
) -> (Vec<Assignment>, ReconcileReport) {
    let lookup = snapshot.name_lookup();
    let mut report = ReconcileReport {
        tuples_in: tuples.len(),
        ..Default::default()
    };

    let mut pairs: BTreeMap<(PersonId, GroupId), Assignment> = BTreeMap::new();

    for tuple in tuples {
        let Some(person_id) = resolve_person(&tuple, snapshot, &lookup, &mut report) else {
            continue;
        };
        let Some(group_id) = resolve_group(&tuple, snapshot, &mut report) else {
            continue;
        };

        // Snapshot names win over recorded ones for display
        let person_name = snapshot.members[&person_id].username.clone();
        let group_name = snapshot.roles[&group_id].clone();

        pairs
            .entry((person_id, group_id))
            .or_insert_with(|| Assignment::new(person_id, group_id, person_name, group_name))
            .add_evidence(tuple.event.kind);
    }

    let mut assignments: Vec<Assignment> = pairs.into_values().collect();
    assignments.sort_by(|a, b| {
        a.group_name
            .cmp(&b.group_name)
            .then(b.total_events().cmp(&a.total_events()))
            .then(a.person_id.cmp(&b.person_id))
    });

    report.assignments_out = assignments.len();
    info!(
        tuples = report.tuples_in,
        assignments = report.assignments_out,
        dropped = report.dropped(),
        "Reconciliation complete"
    );

    (assignments, report)
}

fn resolve_person(
    tuple: &RawTuple,
    snapshot: &AuthoritySnapshot,
    lookup: &NameLookup,
    report: &mut ReconcileReport,
) -> Option<PersonId> {
    match &tuple.person {
        PersonRef::Id(id) => {
            if snapshot.members.contains_key(id) {
                return Some(*id);
            }
            // Stale id: the recorded display name is the remaining lead
            if let Some(found) = tuple
                .person_name
                .as_deref()
                .and_then(|name| lookup.resolve_exact(name))
            {
                debug!(stale = %id, fixed = %found, "Re-resolved stale person id by name");
                report.person_fixed_by_name += 1;
                return Some(found);
            }
            report.person_unresolved += 1;
            ReconcileReport::sample(
                &mut report.person_unresolved_samples,
                format!("{id} ({})", tuple.person_name.as_deref().unwrap_or("?")),
            );
            None
        }
        PersonRef::Corrupted(raw) => {
            if let Some(repaired) =
                repair_corrupted_id(raw, snapshot.members.keys().map(|p| p.0))
            {
                info!(raw = %raw, repaired, "Repaired corrupted person id");
                report.person_repaired += 1;
                return Some(PersonId(repaired));
            }
            if let Some(found) = tuple
                .person_name
                .as_deref()
                .and_then(|name| lookup.resolve_exact(name))
            {
                report.person_fixed_by_name += 1;
                return Some(found);
            }
            warn!(raw = %raw, "Corrupted person id is unrepairable; dropping tuple");
            report.person_corrupted += 1;
            ReconcileReport::sample(&mut report.person_corrupted_samples, raw.clone());
            None
        }
    }
}

fn resolve_group(
    tuple: &RawTuple,
    snapshot: &AuthoritySnapshot,
    report: &mut ReconcileReport,
) -> Option<GroupId> {
    let stale = match &tuple.group {
        GroupRef::Id(id) => {
            if snapshot.roles.contains_key(id) {
                return Some(*id);
            }
            None
        }
        GroupRef::Corrupted(raw) => {
            if let Some(repaired) = repair_corrupted_id(raw, snapshot.roles.keys().map(|g| g.0)) {
                info!(raw = %raw, repaired, "Repaired corrupted group id");
                report.group_repaired += 1;
                return Some(GroupId(repaired));
            }
            Some(raw.as_str())
        }
    };

    let current = snapshot.role_ids_for_name(&tuple.group_name);
    match current.as_slice() {
        [only] => {
            debug!(name = %tuple.group_name, id = %only, "Remapped group by name");
            report.group_remapped += 1;
            Some(*only)
        }
        [] => {
            report.group_unresolved += 1;
            ReconcileReport::sample(
                &mut report.group_unresolved_samples,
                format!("{} ({})", tuple.group_name, stale.unwrap_or("stale id")),
            );
            None
        }
        many => {
            warn!(
                name = %tuple.group_name,
                candidates = many.len(),
                "Group name maps to multiple live ids; refusing to guess"
            );
            report.group_conflicts += 1;
            ReconcileReport::sample(&mut report.group_conflict_samples, tuple.group_name.clone());
            None
        }
    }
}
