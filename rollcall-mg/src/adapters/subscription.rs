//! Subscription adapter
//!
//! Reads scheduled-event exports whose subscriber lists were serialized as
//! a textual list (`"[123, 456]"`). The container is parsed defensively:
//! only a flat bracket-delimited list of integer tokens is accepted, and
//! anything else skips the event. Embedded content is never evaluated.

use std::path::Path;

use tracing::{debug, warn};

use rollcall_common::error::Result;
use rollcall_common::ids::parse_exact_id;
use rollcall_common::model::{PersonId, SourceKind};
use rollcall_common::table::Table;

use super::{AdapterReport, PersonRef, SourceRecord};

const REQUIRED_COLUMNS: [&str; 2] = ["event_title", "subscriber_ids"];

/// Extract subscription records from an export file
pub fn extract(path: &Path) -> Result<(Vec<SourceRecord>, AdapterReport)> {
    let table = Table::from_path(path)?;
    table.require_columns(&REQUIRED_COLUMNS)?;

    let mut records = Vec::new();
    let mut report = AdapterReport::new("subscription");
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

        let raw_list = row.get("subscriber_ids").unwrap_or_default().trim();
        let tokens = match parse_id_list(raw_list) {
            Some(tokens) => tokens,
            None => {
                warn!(
                    event = %event_title,
                    "Subscriber list is not a flat list of ids; skipping event"
                );
                report.events_skipped += 1;
                continue;
            }
        };

        for token in tokens {
            match parse_exact_id(&token) {
                Ok(id) => records.push(SourceRecord {
                    person: PersonRef::Id(PersonId(id)),
                    person_name: None,
                    kind: SourceKind::Subscription,
                    event_label: event_title.to_string(),
                    marker: marker.to_string(),
                }),
                Err(_) => report.entries_skipped += 1,
            }
        }
    }

    report.records_produced = records.len();
    debug!(
        rows = report.rows_read,
        records = report.records_produced,
        events_skipped = report.events_skipped,
        "Subscription extraction complete"
    );

    Ok((records, report))
}

/// Parse a serialized subscriber container.
///
/// Accepts `[]` and `[id, id, ...]` where each id is a digit run,
/// optionally single- or double-quoted. Returns `None` for anything else
/// (nested structures, expressions, non-numeric tokens) so no embedded
/// content ever executes or half-parses.
fn parse_id_list(raw: &str) -> Option<Vec<String>> {
    let inner = raw.strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }

    let mut tokens = Vec::new();
    for part in inner.split(',') {
        let token = part
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        tokens.push(token);
    }
    Some(tokens)
}
