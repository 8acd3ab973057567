//! Tabular file handling and the canonical assignment format
//!
//! The source snapshots and the canonical assignment set are plain CSV.
//! Identifier columns are read and written as exact decimal strings; the
//! reader refuses float-rendered identifiers rather than silently loading
//! a truncated value (see [`crate::ids`]).

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::{Assignment, GroupId, PersonId};

/// Header of the canonical assignment file, one integer column per
/// attribution source kind
pub const ASSIGNMENT_HEADER: [&str; 7] = [
    "person_id",
    "group_id",
    "person_name",
    "group_name",
    "attendance_events",
    "subscription_events",
    "manual_events",
];

// ============================================================================
// CSV primitives
// ============================================================================

/// Parse CSV text into records (RFC 4180 quoting: quoted fields may contain
/// commas, doubled quotes and newlines).
pub fn parse_records(input: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => {
                record.push(std::mem::take(&mut field));
            }
            '\r' => {
                // Consumed as part of CRLF; a bare CR inside a field is odd
                // enough upstream data never produces it.
            }
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(Error::Parse("unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}

/// Format one record, quoting fields that need it
pub fn format_record(fields: &[&str]) -> String {
    let mut out = String::new();
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if f.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&f.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(f);
        }
    }
    out.push('\n');
    out
}

/// A loaded tabular file with by-name column access
#[derive(Debug, Clone)]
pub struct Table {
    columns: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn parse(input: &str) -> Result<Self> {
        let mut records = parse_records(input)?;
        if records.is_empty() {
            return Err(Error::Parse("empty table: missing header row".to_string()));
        }
        let header = records.remove(0);
        let columns = header
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        Ok(Self { columns, rows: records })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::parse(&input)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |cells| Row { table: self, cells })
    }

    /// Fail early when a required column is absent, naming it
    pub fn require_columns(&self, names: &[&str]) -> Result<()> {
        for name in names {
            if !self.has_column(name) {
                return Err(Error::Parse(format!("missing required column: {name}")));
            }
        }
        Ok(())
    }
}

/// One row of a [`Table`]
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    cells: &'a Vec<String>,
}

impl<'a> Row<'a> {
    /// Cell by column name; `None` when the column is missing or the row is
    /// ragged (shorter than the header)
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let idx = *self.table.columns.get(column)?;
        self.cells.get(idx).map(|s| s.as_str())
    }

    /// Like `get`, treating empty/whitespace cells as absent
    pub fn get_non_empty(&self, column: &str) -> Option<&'a str> {
        self.get(column).map(str::trim).filter(|s| !s.is_empty())
    }
}

// ============================================================================
// Canonical assignment file
// ============================================================================

/// Write the canonical assignment set. Output is deterministic for a given
/// input ordering; identifiers are exact decimal strings.
pub fn write_assignments(path: &Path, assignments: &[Assignment]) -> Result<()> {
    let mut out = format_record(&ASSIGNMENT_HEADER);
    for a in assignments {
        let person_id = a.person_id.to_string();
        let group_id = a.group_id.to_string();
        let attendance = a.attendance_events.to_string();
        let subscription = a.subscription_events.to_string();
        let manual = a.manual_events.to_string();
        out.push_str(&format_record(&[
            &person_id,
            &group_id,
            &a.person_name,
            &a.group_name,
            &attendance,
            &subscription,
            &manual,
        ]));
    }
    std::fs::write(path, out)?;
    Ok(())
}

/// Read a canonical assignment file. Rejects float-rendered identifiers.
pub fn read_assignments(path: &Path) -> Result<Vec<Assignment>> {
    let table = Table::from_path(path)?;
    table.require_columns(&ASSIGNMENT_HEADER)?;

    let mut assignments = Vec::with_capacity(table.len());
    for (i, row) in table.rows().enumerate() {
        let line = i + 2; // 1-based, after the header
        let field = |name: &str| {
            row.get_non_empty(name)
                .ok_or_else(|| Error::Parse(format!("line {line}: missing {name}")))
        };
        let person_id: PersonId = field("person_id")?
            .parse()
            .map_err(|e| Error::Parse(format!("line {line}: person_id: {e}")))?;
        let group_id: GroupId = field("group_id")?
            .parse()
            .map_err(|e| Error::Parse(format!("line {line}: group_id: {e}")))?;
        let count = |name: &str| -> Result<u32> {
            field(name)?
                .parse::<u32>()
                .map_err(|_| Error::Parse(format!("line {line}: {name} is not a count")))
        };

        assignments.push(Assignment {
            person_id,
            group_id,
            person_name: row.get("person_name").unwrap_or_default().to_string(),
            group_name: row.get("group_name").unwrap_or_default().to_string(),
            attendance_events: count("attendance_events")?,
            subscription_events: count("subscription_events")?,
            manual_events: count("manual_events")?,
        });
    }
    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_records() {
        let records = parse_records("a,b,c\n1,2,3\n").unwrap();
        assert_eq!(records, vec![vec!["a", "b", "c"], vec!["1", "2", "3"]]);
    }

    #[test]
    fn test_parse_quoted_fields() {
        let records = parse_records("title,ids\n\"Yoga, Stretching\",\"1,2\"\n").unwrap();
        assert_eq!(records[1], vec!["Yoga, Stretching", "1,2"]);
    }

    #[test]
    fn test_parse_embedded_quote_and_newline() {
        let records = parse_records("a\n\"he said \"\"hi\"\"\nbye\"\n").unwrap();
        assert_eq!(records[1], vec!["he said \"hi\"\nbye"]);
    }

    #[test]
    fn test_parse_missing_final_newline() {
        let records = parse_records("a,b\n1,2").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], vec!["1", "2"]);
    }

    #[test]
    fn test_parse_unterminated_quote_rejected() {
        assert!(parse_records("a\n\"oops\n").is_err());
    }

    #[test]
    fn test_format_round_trip() {
        let line = format_record(&["plain", "with,comma", "with \"quote\""]);
        let records = parse_records(&line).unwrap();
        assert_eq!(records[0], vec!["plain", "with,comma", "with \"quote\""]);
    }

    #[test]
    fn test_assignment_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assignments.csv");

        let mut a = Assignment::new(
            PersonId(480695542155051010),
            GroupId(1392210566407524382),
            "basic_bit",
            "YOGA",
        );
        a.attendance_events = 3;
        a.manual_events = 1;

        write_assignments(&path, &[a.clone()]).unwrap();
        let back = read_assignments(&path).unwrap();
        assert_eq!(back, vec![a]);

        // The ids must appear as full decimal strings in the file
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("1392210566407524382"));
        assert!(!raw.contains("e+"), "no scientific notation in output: {raw}");
    }

    #[test]
    fn test_read_rejects_float_rendered_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "person_id,group_id,person_name,group_name,attendance_events,subscription_events,manual_events\n\
             1.3922105664075244e+18,7,x,Y,1,0,0\n",
        )
        .unwrap();
        assert!(read_assignments(&path).is_err());
    }

    #[test]
    fn test_table_by_name_access() {
        let table = Table::parse("EventTitle,AttendeeIds\nYoga,\"1,2\"\n").unwrap();
        let row = table.rows().next().unwrap();
        assert_eq!(row.get("EventTitle"), Some("Yoga"));
        assert_eq!(row.get("AttendeeIds"), Some("1,2"));
        assert_eq!(row.get("nope"), None);
    }
}
