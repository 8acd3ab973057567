//! Event→group mapper
//!
//! A reviewed lookup table decides which group each source event feeds.
//! Lookup is exact on (source kind, event title) first, then falls back to
//! a normalized key that collapses whitespace runs and unifies dash and
//! quote punctuation; the near-duplicate titles in real exports differ
//! only in en-dash vs hyphen and doubled spaces. An event with no mapping
//! entry is dropped and counted, never guessed.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use rollcall_common::error::{Error, Result};
use rollcall_common::ids::parse_exact_id;
use rollcall_common::model::{AttributionEvent, GroupId, SourceKind};
use rollcall_common::table::Table;

use crate::adapters::{PersonRef, SourceRecord};

const REQUIRED_COLUMNS: [&str; 4] = ["source_kind", "event_title", "group_id", "group_name"];

/// Cap on sample labels kept per report list
const SAMPLE_LIMIT: usize = 10;

/// How the mapping table referenced a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRef {
    /// Exact platform id
    Id(GroupId),
    /// Float-corrupted rendering carried over from the source exports,
    /// kept verbatim for repair against the role catalog
    Corrupted(String),
}

/// One fully attributed observation, ready for reconciliation
#[derive(Debug, Clone)]
pub struct RawTuple {
    pub person: PersonRef,
    pub person_name: Option<String>,
    pub group: GroupRef,
    pub group_name: String,
    pub event: AttributionEvent,
}

/// Reviewed (source kind, event title) → group lookup table
#[derive(Debug, Clone)]
pub struct EventGroupMap {
    exact: HashMap<(SourceKind, String), (GroupRef, String)>,
    normalized: HashMap<(SourceKind, String), (GroupRef, String)>,
}

impl EventGroupMap {
    /// Load the mapping table from its CSV file.
    ///
    /// The table is curated input: a group id that is neither exact nor a
    /// recognizable float rendering fails the load outright.
    pub fn from_path(path: &Path) -> Result<Self> {
        let table = Table::from_path(path)?;
        table.require_columns(&REQUIRED_COLUMNS)?;

        let mut exact = HashMap::new();
        let mut normalized = HashMap::new();

        for row in table.rows() {
            let kind_raw = row.get("source_kind").unwrap_or_default().trim();
            let kind = SourceKind::from_str_name(kind_raw).ok_or_else(|| {
                Error::Parse(format!("mapping table: unknown source kind '{kind_raw}'"))
            })?;
            let title = row
                .get_non_empty("event_title")
                .ok_or_else(|| Error::Parse("mapping table: empty event title".to_string()))?
                .to_string();
            let group_name = row
                .get_non_empty("group_name")
                .ok_or_else(|| {
                    Error::Parse(format!("mapping table: empty group name for '{title}'"))
                })?
                .to_string();

            let id_raw = row.get("group_id").unwrap_or_default().trim();
            let group = match parse_exact_id(id_raw) {
                Ok(id) => GroupRef::Id(GroupId(id)),
                Err(Error::IdentifierCorrupted(_)) => GroupRef::Corrupted(id_raw.to_string()),
                Err(_) => {
                    return Err(Error::Parse(format!(
                        "mapping table: unparseable group id '{id_raw}' for '{title}'"
                    )));
                }
            };

            let norm_key = (kind, normalize_label(&title));
            exact.insert((kind, title), (group.clone(), group_name.clone()));
            normalized.entry(norm_key).or_insert((group, group_name));
        }

        debug!(entries = exact.len(), "Loaded event→group mapping table");
        Ok(Self { exact, normalized })
    }

    /// Resolve an event label to its target group, exact match first
    pub fn resolve(&self, kind: SourceKind, label: &str) -> Option<(GroupRef, &str)> {
        if let Some((group, name)) = self.exact.get(&(kind, label.to_string())) {
            return Some((group.clone(), name.as_str()));
        }
        self.normalized
            .get(&(kind, normalize_label(label)))
            .map(|(group, name)| (group.clone(), name.as_str()))
    }
}

/// Mapping-stage accounting
#[derive(Debug, Clone, Default, Serialize)]
pub struct MapperReport {
    pub tuples_produced: usize,
    pub unmapped: usize,
    /// Distinct unmapped (kind, label) pairs, capped
    pub unmapped_samples: Vec<String>,
}

/// Attach each extracted record to its target group.
///
/// Records whose event has no mapping entry are dropped and counted.
pub fn annotate(records: Vec<SourceRecord>, map: &EventGroupMap) -> (Vec<RawTuple>, MapperReport) {
    let mut tuples = Vec::new();
    let mut report = MapperReport::default();

    for record in records {
        let Some((group, group_name)) = map.resolve(record.kind, &record.event_label) else {
            report.unmapped += 1;
            let sample = format!("{}: {}", record.kind.as_str(), record.event_label);
            if report.unmapped_samples.len() < SAMPLE_LIMIT
                && !report.unmapped_samples.contains(&sample)
            {
                warn!(
                    kind = record.kind.as_str(),
                    event = %record.event_label,
                    "No mapping entry for event; dropping its records"
                );
                report.unmapped_samples.push(sample);
            }
            continue;
        };
        let group_name = group_name.to_string();
        tuples.push(RawTuple {
            person: record.person,
            person_name: record.person_name,
            group,
            group_name,
            event: AttributionEvent {
                kind: record.kind,
                label: record.event_label,
                marker: record.marker,
            },
        });
    }

    report.tuples_produced = tuples.len();
    (tuples, report)
}

/// Conservative label normalization: trim, collapse whitespace runs,
/// unify dash and quote punctuation, casefold
fn normalize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_space = false;
    for c in label.trim().chars() {
        let c = match c {
            '\u{2013}' | '\u{2014}' => '-',
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            c => c,
        };
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.extend(c.to_lowercase());
    }
    out
}
