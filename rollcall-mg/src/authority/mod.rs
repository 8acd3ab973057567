//! Authority boundary
//!
//! Everything that talks to the chat platform goes through the
//! [`Authority`] trait: fetching the scope snapshot and granting one group
//! to one person. The apply engine depends only on the trait, so tests
//! drive it with the in-memory [`MockAuthority`] and production uses the
//! REST client.

pub mod mock;
pub mod rest;

pub use mock::MockAuthority;
pub use rest::RestAuthority;

use std::time::Duration;

use async_trait::async_trait;

use rollcall_common::error::Result;
use rollcall_common::model::{GroupId, PersonId, ScopeId};

use crate::snapshot::AuthoritySnapshot;

/// Result of a single grant call.
///
/// Failures are data, not errors: the apply engine records each outcome
/// per assignment and keeps going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    PersonNotFound,
    GroupNotFound,
    /// Permission failure (missing scope permission, role above the bot)
    Denied(String),
    /// Throttled; the authority asked us to wait before retrying
    RateLimited { retry_after: Duration },
    /// Network or server-side failure worth one retry
    Transient(String),
}

#[async_trait]
pub trait Authority: Send + Sync {
    /// Fetch the current role catalog and member list for a scope
    async fn fetch_snapshot(&self, scope: ScopeId) -> Result<AuthoritySnapshot>;

    /// Grant `group` to `person` within `scope`
    async fn grant(&self, scope: ScopeId, person: PersonId, group: GroupId) -> GrantOutcome;
}
