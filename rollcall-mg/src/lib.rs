//! rollcall-mg library interface
//!
//! Exposes the migration pipeline for the binary and for integration
//! testing: source adapters, the event→group mapper, the reconciliation
//! engine, the authority boundary, and the apply engine.

pub mod adapters;
pub mod apply;
pub mod authority;
pub mod mapper;
pub mod reconcile;
pub mod snapshot;

pub use adapters::{AdapterReport, PersonRef, SourceRecord};
pub use apply::{ApplyEngine, ApplyPolicy};
pub use authority::{Authority, GrantOutcome};
pub use reconcile::{reconcile, ReconcileReport};
pub use snapshot::{AuthoritySnapshot, Member, NameLookup};
