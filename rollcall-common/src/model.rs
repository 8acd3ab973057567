//! Domain model shared across the rollcall crates
//!
//! Identity rules: a person or group *is* its 64-bit platform id. Names are
//! observed attributes kept for matching and display only; they drift and
//! are never authoritative once an id is known. Identifiers serialize as
//! exact decimal strings so no downstream consumer can coerce them through
//! floating point.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::ids::parse_exact_id;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! exact_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                parse_exact_id(s).map($name)
            }
        }

        // Serialized as a decimal string: JSON and CSV consumers must never
        // see these as numbers a float path could truncate.
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct IdVisitor;

                impl<'v> Visitor<'v> for IdVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str("an exact decimal identifier string")
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<$name, E> {
                        parse_exact_id(v).map($name).map_err(de::Error::custom)
                    }

                    fn visit_u64<E: de::Error>(self, v: u64) -> Result<$name, E> {
                        Ok($name(v))
                    }
                }

                deserializer.deserialize_any(IdVisitor)
            }
        }
    };
}

exact_id!(PersonId, "Platform-assigned person identifier (immutable, authoritative)");
exact_id!(GroupId, "Platform-assigned group identifier (authoritative; names drift)");
exact_id!(ScopeId, "Identifier of a community/server instance on the authority");

// ============================================================================
// Attribution evidence
// ============================================================================

/// Which pipeline observed the participation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Historical event attendance logs
    Attendance,
    /// Scheduled-event subscriber lists
    Subscription,
    /// Manually collected expressions of interest
    ManualInterest,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::Attendance,
        SourceKind::Subscription,
        SourceKind::ManualInterest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Attendance => "attendance",
            SourceKind::Subscription => "subscription",
            SourceKind::ManualInterest => "manual-interest",
        }
    }

    /// Parse the kebab-case name used in mapping tables and CLI output
    pub fn from_str_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker used in place of a timestamp for manually collected rows
pub const MANUAL_COLLECTION_MARKER: &str = "manual-collection";

/// One observed reason a person should belong to a group.
///
/// Immutable evidence record: produced once by an adapter, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionEvent {
    pub kind: SourceKind,
    /// Source event label (title of the session/event)
    pub label: String,
    /// Occurrence timestamp as recorded upstream, or
    /// [`MANUAL_COLLECTION_MARKER`]
    pub marker: String,
}

// ============================================================================
// Assignments
// ============================================================================

/// One canonical `(person, group)` membership target with aggregated
/// evidence counts per source kind.
///
/// The reconciliation engine guarantees exactly one `Assignment` per unique
/// `(person_id, group_id)` pair; colliding raw tuples sum their counts so
/// provenance strength is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub person_id: PersonId,
    pub group_id: GroupId,
    pub person_name: String,
    pub group_name: String,
    pub attendance_events: u32,
    pub subscription_events: u32,
    pub manual_events: u32,
}

impl Assignment {
    pub fn new(
        person_id: PersonId,
        group_id: GroupId,
        person_name: impl Into<String>,
        group_name: impl Into<String>,
    ) -> Self {
        Self {
            person_id,
            group_id,
            person_name: person_name.into(),
            group_name: group_name.into(),
            attendance_events: 0,
            subscription_events: 0,
            manual_events: 0,
        }
    }

    pub fn add_evidence(&mut self, kind: SourceKind) {
        match kind {
            SourceKind::Attendance => self.attendance_events += 1,
            SourceKind::Subscription => self.subscription_events += 1,
            SourceKind::ManualInterest => self.manual_events += 1,
        }
    }

    pub fn count_for(&self, kind: SourceKind) -> u32 {
        match kind {
            SourceKind::Attendance => self.attendance_events,
            SourceKind::Subscription => self.subscription_events,
            SourceKind::ManualInterest => self.manual_events,
        }
    }

    /// Total evidence across all source kinds
    pub fn total_events(&self) -> u32 {
        self.attendance_events + self.subscription_events + self.manual_events
    }
}

// ============================================================================
// Apply outcomes
// ============================================================================

/// Terminal outcome of applying one assignment against the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyOutcome {
    Granted,
    AlreadyMember,
    PersonNotFound,
    GroupNotFound,
    Denied,
    TransientFailure,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Granted => "granted",
            ApplyOutcome::AlreadyMember => "already-member",
            ApplyOutcome::PersonNotFound => "person-not-found",
            ApplyOutcome::GroupNotFound => "group-not-found",
            ApplyOutcome::Denied => "denied",
            ApplyOutcome::TransientFailure => "transient-failure",
        }
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Compute and report every transition without performing grant calls
    Simulate,
    /// Perform grant calls
    Commit,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Simulate => f.write_str("simulate"),
            RunMode::Commit => f.write_str("commit"),
        }
    }
}

/// Durable audit record of one apply run.
///
/// Always flushed to disk, including for interrupted runs, so a partial
/// commit leaves an accurate trail rather than silent data loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub scope_id: ScopeId,
    pub scope_name: String,
    pub mode: RunMode,
    pub total_assignments: usize,
    pub granted: usize,
    pub already_member: usize,
    pub person_not_found: usize,
    pub group_not_found: usize,
    pub denied: usize,
    pub transient_failures: usize,
    /// True when the run was cancelled before processing every assignment
    pub aborted: bool,
    pub elapsed_seconds: f64,
}

impl RunSummary {
    pub fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Granted => self.granted += 1,
            ApplyOutcome::AlreadyMember => self.already_member += 1,
            ApplyOutcome::PersonNotFound => self.person_not_found += 1,
            ApplyOutcome::GroupNotFound => self.group_not_found += 1,
            ApplyOutcome::Denied => self.denied += 1,
            ApplyOutcome::TransientFailure => self.transient_failures += 1,
        }
    }

    /// Count of assignments that reached a terminal state this run
    pub fn processed(&self) -> usize {
        self.granted
            + self.already_member
            + self.person_not_found
            + self.group_not_found
            + self.denied
            + self.transient_failures
    }
}
