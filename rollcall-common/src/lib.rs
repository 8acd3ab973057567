//! # Rollcall Common Library
//!
//! Shared code for the rollcall migration toolkit including:
//! - Exact identifier parsing and repair
//! - Domain model (assignments, attribution events, run summaries)
//! - Error taxonomy
//! - Canonical assignment table format
//! - Configuration loading

pub mod config;
pub mod error;
pub mod ids;
pub mod model;
pub mod table;

pub use error::{Error, Result};
pub use model::{Assignment, AttributionEvent, GroupId, PersonId, ScopeId, SourceKind};
