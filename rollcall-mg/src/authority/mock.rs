//! In-memory authority for tests
//!
//! Serves a pre-built snapshot and answers grant calls from a script:
//! outcomes can be pinned to specific call indexes, everything else is
//! granted. Every call is recorded for assertion.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use rollcall_common::error::{Error, Result};
use rollcall_common::model::{GroupId, PersonId, ScopeId};

use crate::snapshot::AuthoritySnapshot;

use super::{Authority, GrantOutcome};

pub struct MockAuthority {
    snapshot: AuthoritySnapshot,
    /// Outcomes pinned to 0-based call indexes
    scripted: Mutex<HashMap<usize, GrantOutcome>>,
    calls: Mutex<Vec<(PersonId, GroupId)>>,
}

impl MockAuthority {
    pub fn new(snapshot: AuthoritySnapshot) -> Self {
        Self {
            snapshot,
            scripted: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Pin the outcome of the `index`-th grant call (0-based)
    pub fn script_outcome(&self, index: usize, outcome: GrantOutcome) {
        self.scripted.lock().unwrap().insert(index, outcome);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(PersonId, GroupId)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Authority for MockAuthority {
    async fn fetch_snapshot(&self, scope: ScopeId) -> Result<AuthoritySnapshot> {
        if scope != self.snapshot.scope_id {
            return Err(Error::UnresolvedEntity(format!("unknown scope {scope}")));
        }
        Ok(self.snapshot.clone())
    }

    async fn grant(&self, _scope: ScopeId, person: PersonId, group: GroupId) -> GrantOutcome {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((person, group));
            calls.len() - 1
        };
        self.scripted
            .lock()
            .unwrap()
            .remove(&index)
            .unwrap_or(GrantOutcome::Granted)
    }
}
