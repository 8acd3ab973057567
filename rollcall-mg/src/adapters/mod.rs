//! Source adapters
//!
//! Three independent extraction adapters, one per participation source:
//! - **attendance** — historical event-attendance logs
//! - **subscription** — scheduled-event subscriber lists
//! - **manual** — manually collected expressions of interest
//!
//! Each adapter reads a tabular snapshot file and yields [`SourceRecord`]s
//! plus an [`AdapterReport`]. Malformed events are recovered locally (skip
//! and count); an adapter never aborts the reconciliation pass over one bad
//! row.

pub mod attendance;
pub mod manual;
pub mod subscription;

use serde::Serialize;

use rollcall_common::model::{PersonId, SourceKind};

/// How an adapter referenced a person.
///
/// Exact ids pass straight through; corrupted renderings are kept verbatim
/// so the reconciler can attempt repair against the authority catalog.
/// Manual-collection names are resolved to ids inside the manual adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersonRef {
    /// Exact platform id
    Id(PersonId),
    /// Numeric but float-corrupted rendering, kept verbatim for repair
    Corrupted(String),
}

/// One extracted `(person, event)` observation, not yet mapped to a group
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub person: PersonRef,
    /// Display name recorded alongside the id, when the source had one
    pub person_name: Option<String>,
    pub kind: SourceKind,
    /// Source event label, used by the event→group mapper
    pub event_label: String,
    /// Occurrence timestamp as recorded upstream, or the manual marker
    pub marker: String,
}

/// Per-adapter extraction accounting
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdapterReport {
    pub adapter: &'static str,
    pub rows_read: usize,
    pub records_produced: usize,
    /// Events skipped whole (malformed row structure)
    pub events_skipped: usize,
    /// Individual entries skipped inside otherwise valid events
    pub entries_skipped: usize,
    /// Manual rows whose display name had no confident match
    pub names_unresolved: usize,
    /// Manual rows resolved by exact name match
    pub names_exact: usize,
    /// Manual rows resolved by fuzzy name match
    pub names_fuzzy: usize,
}

impl AdapterReport {
    pub fn new(adapter: &'static str) -> Self {
        Self { adapter, ..Default::default() }
    }
}
