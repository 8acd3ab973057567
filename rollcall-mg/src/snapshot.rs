//! Authority membership snapshot
//!
//! The snapshot is the read-only source of truth for one run: which groups
//! and people currently exist in the target scope, and which roles each
//! person already holds. It is fetched (or loaded from a cache file) once
//! per run and never mutated afterwards; staleness by the end of a long
//! run is acceptable because not-found outcomes are simply retried on a
//! subsequent run.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use rollcall_common::error::{Error, Result};
use rollcall_common::model::{GroupId, PersonId, ScopeId};

/// One person in the target scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub username: String,
    /// Server-specific display name, when set
    pub display_name: Option<String>,
    /// Groups the person currently holds
    pub roles: BTreeSet<GroupId>,
}

/// Point-in-time view of a scope's groups and members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthoritySnapshot {
    pub scope_id: ScopeId,
    pub scope_name: String,
    /// Current role catalog: id → name
    pub roles: BTreeMap<GroupId, String>,
    pub members: BTreeMap<PersonId, Member>,
    pub fetched_at: DateTime<Utc>,
}

impl AuthoritySnapshot {
    /// Persist to a JSON cache file so reconcile runs work offline
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Parse(format!("snapshot serialization failed: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Parse(format!("malformed snapshot file: {e}")))
    }

    /// Build the display-name roster for this snapshot
    pub fn name_lookup(&self) -> NameLookup {
        NameLookup::build(self)
    }

    /// All currently valid ids for a group name (case-insensitive).
    ///
    /// More than one entry means the authority itself carries duplicate
    /// names; the reconciler surfaces that as a data-quality error.
    pub fn role_ids_for_name(&self, name: &str) -> Vec<GroupId> {
        let wanted = name.trim().to_lowercase();
        self.roles
            .iter()
            .filter(|(_, n)| n.trim().to_lowercase() == wanted)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Roster lookup from observed names to person ids.
///
/// Maps lowercased usernames and display names to ids. When two members
/// share a name the first (lowest id, snapshot iteration order) wins and
/// the collision is counted; name matches are for attribution evidence
/// only, so a rare wrong pick surfaces later as an already-member or
/// not-found outcome rather than a grant to an arbitrary person.
#[derive(Debug, Clone)]
pub struct NameLookup {
    exact: HashMap<String, PersonId>,
    /// Original-cased names for fuzzy scoring, deduplicated
    names: Vec<(String, PersonId)>,
    pub collisions: usize,
}

impl NameLookup {
    fn build(snapshot: &AuthoritySnapshot) -> Self {
        let mut exact: HashMap<String, PersonId> = HashMap::new();
        let mut names = Vec::new();
        let mut collisions = 0;

        for (id, member) in &snapshot.members {
            let mut candidates = vec![member.username.as_str()];
            if let Some(display) = member.display_name.as_deref() {
                if !display.eq_ignore_ascii_case(&member.username) {
                    candidates.push(display);
                }
            }
            for name in candidates {
                let key = name.trim().to_lowercase();
                if key.is_empty() {
                    continue;
                }
                match exact.entry(key) {
                    std::collections::hash_map::Entry::Vacant(e) => {
                        e.insert(*id);
                        names.push((name.trim().to_string(), *id));
                    }
                    std::collections::hash_map::Entry::Occupied(_) => collisions += 1,
                }
            }
        }

        debug!(
            members = snapshot.members.len(),
            names = names.len(),
            collisions,
            "Built roster name lookup"
        );

        Self { exact, names, collisions }
    }

    /// Exact case-insensitive match on username or display name
    pub fn resolve_exact(&self, name: &str) -> Option<PersonId> {
        self.exact.get(&name.trim().to_lowercase()).copied()
    }

    /// Best fuzzy match at or above `threshold` (Jaro-Winkler over
    /// lowercased names), with its similarity score
    pub fn resolve_fuzzy(&self, name: &str, threshold: f64) -> Option<(PersonId, f64)> {
        let wanted = name.trim().to_lowercase();
        let mut best: Option<(PersonId, f64)> = None;
        for (candidate, id) in &self.names {
            let score = strsim::jaro_winkler(&wanted, &candidate.to_lowercase());
            if score >= threshold && best.map_or(true, |(_, s)| score > s) {
                best = Some((*id, score));
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
