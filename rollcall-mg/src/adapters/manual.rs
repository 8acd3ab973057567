//! Manual-interest adapter
//!
//! Reads manually collected interest lists. These rows carry free-text
//! display names rather than platform ids, so each name is resolved
//! against the roster built from the authority snapshot: exact
//! case-insensitive match first, then a Jaro-Winkler fuzzy match above
//! [`FUZZY_THRESHOLD`], else unresolved. Every resolution attempt is
//! recorded for audit so a human can review the fuzzy picks.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use rollcall_common::error::Result;
use rollcall_common::model::{PersonId, SourceKind, MANUAL_COLLECTION_MARKER};
use rollcall_common::table::Table;

use crate::snapshot::NameLookup;

use super::{AdapterReport, PersonRef, SourceRecord};

const REQUIRED_COLUMNS: [&str; 2] = ["event_title", "interested_names"];

/// Minimum Jaro-Winkler similarity accepted as a fuzzy name match
pub const FUZZY_THRESHOLD: f64 = 0.85;

/// Placeholder username the platform substitutes for deleted accounts.
/// Such rows can never be attributed to a live person.
const DELETED_ACCOUNT_PREFIX: &str = "deleted_user";

/// How one manual-list name was (or was not) matched to a person
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum MatchMethod {
    Exact,
    Fuzzy { score: f64 },
    Unresolved,
}

/// Audit record for one name-resolution attempt
#[derive(Debug, Clone, Serialize)]
pub struct NameResolution {
    pub name: String,
    pub event_label: String,
    #[serde(flatten)]
    pub method: MatchMethod,
}

/// Extract manual-interest records, resolving names through the roster.
///
/// Unresolved names are counted and excluded; they never become records.
pub fn extract(
    path: &Path,
    lookup: &NameLookup,
) -> Result<(Vec<SourceRecord>, AdapterReport, Vec<NameResolution>)> {
    let table = Table::from_path(path)?;
    table.require_columns(&REQUIRED_COLUMNS)?;

    let mut records = Vec::new();
    let mut report = AdapterReport::new("manual");
    let mut resolutions = Vec::new();
    report.rows_read = table.len();

    for row in table.rows() {
        let event_title = match row.get_non_empty("event_title") {
            Some(t) => t,
            None => {
                report.events_skipped += 1;
                continue;
            }
        };

        for name in row
            .get("interested_names")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let (person, method) = resolve(name, lookup);
            match &method {
                MatchMethod::Exact => {
                    report.names_exact += 1;
                }
                MatchMethod::Fuzzy { score } => {
                    info!(name = %name, score = %score, "Fuzzy-matched manual interest name");
                    report.names_fuzzy += 1;
                }
                MatchMethod::Unresolved => {
                    warn!(name = %name, event = %event_title, "Manual interest name unresolved");
                    report.names_unresolved += 1;
                }
            }
            resolutions.push(NameResolution {
                name: name.to_string(),
                event_label: event_title.to_string(),
                method,
            });

            if let Some(id) = person {
                records.push(SourceRecord {
                    person: PersonRef::Id(id),
                    person_name: Some(name.to_string()),
                    kind: SourceKind::ManualInterest,
                    event_label: event_title.to_string(),
                    marker: MANUAL_COLLECTION_MARKER.to_string(),
                });
            }
        }
    }

    report.records_produced = records.len();
    debug!(
        rows = report.rows_read,
        records = report.records_produced,
        exact = report.names_exact,
        fuzzy = report.names_fuzzy,
        unresolved = report.names_unresolved,
        "Manual-interest extraction complete"
    );

    Ok((records, report, resolutions))
}

fn resolve(name: &str, lookup: &NameLookup) -> (Option<PersonId>, MatchMethod) {
    if name.to_lowercase().starts_with(DELETED_ACCOUNT_PREFIX) {
        return (None, MatchMethod::Unresolved);
    }
    if let Some(id) = lookup.resolve_exact(name) {
        return (Some(id), MatchMethod::Exact);
    }
    match lookup.resolve_fuzzy(name, FUZZY_THRESHOLD) {
        Some((id, score)) => (Some(id), MatchMethod::Fuzzy { score }),
        None => (None, MatchMethod::Unresolved),
    }
}
