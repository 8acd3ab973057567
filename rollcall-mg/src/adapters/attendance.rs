//! Attendance adapter
//!
//! Reads historical event-attendance exports. Each row carries parallel
//! comma-joined `attendee_ids` / `attendee_names` arrays. The upstream
//! export is known to produce arrays of unequal length; pairing by
//! truncated index would attribute attendance to the wrong person, so a
//! mismatched event is skipped entirely and counted instead.

use std::path::Path;

use tracing::{debug, warn};

use rollcall_common::error::Result;
use rollcall_common::ids::parse_exact_id;
use rollcall_common::model::{PersonId, SourceKind};
use rollcall_common::table::Table;

use super::{AdapterReport, PersonRef, SourceRecord};

/// Required columns in the attendance export
const REQUIRED_COLUMNS: [&str; 3] = ["event_title", "attendee_ids", "attendee_names"];

/// Extract attendance records from an export file.
///
/// Returns the records plus a report counting skipped events (id/name
/// array length mismatch) and skipped entries (unparseable, non-numeric
/// ids). Float-corrupted ids are kept as [`PersonRef::Corrupted`] for the
/// reconciler to repair against the authority catalog.
pub fn extract(path: &Path) -> Result<(Vec<SourceRecord>, AdapterReport)> {
    let table = Table::from_path(path)?;
    table.require_columns(&REQUIRED_COLUMNS)?;

    let mut records = Vec::new();
    let mut report = AdapterReport::new("attendance");
    report.rows_read = table.len();

    for row in table.rows() {
        let event_title = match row.get_non_empty("event_title") {
            Some(t) => t,
            None => {
                report.events_skipped += 1;
                continue;
            }
        };
        let marker = row.get_non_empty("start_time").unwrap_or_default();

        let ids = split_joined(row.get("attendee_ids").unwrap_or_default());
        let names = split_joined(row.get("attendee_names").unwrap_or_default());

        if ids.is_empty() {
            // Event with no recorded attendees; nothing to extract.
            continue;
        }

        if ids.len() != names.len() {
            warn!(
                event = %event_title,
                ids = ids.len(),
                names = names.len(),
                "Attendee id/name arrays differ in length; skipping event"
            );
            report.events_skipped += 1;
            continue;
        }

        for (id_raw, name) in ids.iter().zip(names.iter()) {
            let person = match parse_exact_id(id_raw) {
                Ok(id) => PersonRef::Id(PersonId(id)),
                Err(_) if looks_float_rendered(id_raw) => PersonRef::Corrupted(id_raw.to_string()),
                Err(_) => {
                    report.entries_skipped += 1;
                    continue;
                }
            };
            records.push(SourceRecord {
                person,
                person_name: Some(name.to_string()),
                kind: SourceKind::Attendance,
                event_label: event_title.to_string(),
                marker: marker.to_string(),
            });
        }
    }

    report.records_produced = records.len();
    debug!(
        rows = report.rows_read,
        records = report.records_produced,
        events_skipped = report.events_skipped,
        entries_skipped = report.entries_skipped,
        "Attendance extraction complete"
    );

    Ok((records, report))
}

/// Split a comma-joined cell into trimmed, non-empty items
fn split_joined(cell: &str) -> Vec<&str> {
    cell.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// A token that went through a float renders with an exponent or decimal
/// point; those are repair candidates rather than plain garbage
fn looks_float_rendered(raw: &str) -> bool {
    raw.contains(['e', 'E', '.']) && raw.parse::<f64>().is_ok()
}
