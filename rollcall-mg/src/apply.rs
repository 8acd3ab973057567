//! Apply engine
//!
//! Drives canonical assignments to terminal outcomes against the
//! authority, one call in flight at a time.
//!
//! # Architecture
//!
//! Assignments are processed grouped by target group, in the canonical
//! order the reconciler produced. Each assignment reaches exactly one
//! terminal outcome:
//!
//! - `already-member` is decided from the snapshot, with zero API calls
//! - missing people/groups short-circuit without calls where the snapshot
//!   already proves the grant cannot succeed
//! - simulate mode traverses the identical resolution logic and stops
//!   short of the grant call
//!
//! Throttling: fixed spacing between grant calls, plus a longer pause
//! after every batch. A rate-limited or transient grant waits the
//! authority-specified cooldown (never less than a floor) and retries
//! exactly once; the second failure is recorded and the run moves on.
//!
//! Cancellation is checked between assignments; the in-flight call
//! finishes, remaining work stops, and the partial summary is still
//! returned for flushing.

use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rollcall_common::model::{Assignment, ApplyOutcome, GroupId, RunMode, RunSummary};

use crate::authority::{Authority, GrantOutcome};
use crate::snapshot::AuthoritySnapshot;

/// Spacing between grant calls
const CALL_SPACING: Duration = Duration::from_secs(1);

/// Grants per batch before the longer pause
const BATCH_SIZE: usize = 10;

/// Pause after each full batch
const BATCH_PAUSE: Duration = Duration::from_secs(5);

/// Floor on the wait before the single retry
const MIN_RETRY_COOLDOWN: Duration = Duration::from_secs(1);

/// Throughput and retry policy for one apply run
#[derive(Debug, Clone)]
pub struct ApplyPolicy {
    pub call_spacing: Duration,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub min_retry_cooldown: Duration,
}

impl Default for ApplyPolicy {
    fn default() -> Self {
        Self {
            call_spacing: CALL_SPACING,
            batch_size: BATCH_SIZE,
            batch_pause: BATCH_PAUSE,
            min_retry_cooldown: MIN_RETRY_COOLDOWN,
        }
    }
}

/// Terminal outcome for one assignment, with failure detail when present
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentResult {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub outcome: ApplyOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub struct ApplyEngine<'a> {
    authority: &'a dyn Authority,
    snapshot: &'a AuthoritySnapshot,
    policy: ApplyPolicy,
    mode: RunMode,
    cancel: CancellationToken,
}

impl<'a> ApplyEngine<'a> {
    pub fn new(
        authority: &'a dyn Authority,
        snapshot: &'a AuthoritySnapshot,
        policy: ApplyPolicy,
        mode: RunMode,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            authority,
            snapshot,
            policy,
            mode,
            cancel,
        }
    }

    /// Process every assignment to a terminal outcome.
    ///
    /// Returns the run summary and per-assignment results; both are
    /// complete for the processed prefix even when the run is cancelled.
    pub async fn run(&self, assignments: Vec<Assignment>) -> (RunSummary, Vec<AssignmentResult>) {
        let started = Instant::now();
        let mut summary = RunSummary {
            timestamp: chrono::Utc::now(),
            scope_id: self.snapshot.scope_id,
            scope_name: self.snapshot.scope_name.clone(),
            mode: self.mode,
            total_assignments: assignments.len(),
            granted: 0,
            already_member: 0,
            person_not_found: 0,
            group_not_found: 0,
            denied: 0,
            transient_failures: 0,
            aborted: false,
            elapsed_seconds: 0.0,
        };
        let mut results = Vec::with_capacity(assignments.len());
        let mut last_call: Option<Instant> = None;
        let mut grants_made = 0usize;

        'outer: for (group_id, batch) in group_in_order(assignments) {
            let group_known = self.snapshot.roles.contains_key(&group_id);
            if !group_known {
                warn!(group = %group_id, count = batch.len(), "Group absent from snapshot; skipping its assignments");
            }

            for assignment in batch {
                if self.cancel.is_cancelled() {
                    summary.aborted = true;
                    info!(processed = summary.processed(), "Apply run cancelled; stopping");
                    break 'outer;
                }

                let (outcome, detail) = if !group_known {
                    (ApplyOutcome::GroupNotFound, None)
                } else {
                    self.resolve(&assignment, &mut last_call, &mut grants_made)
                        .await
                };

                summary.record(outcome);
                debug!(
                    person = %assignment.person_id,
                    group = %assignment.group_id,
                    outcome = %outcome,
                    "Assignment resolved"
                );
                results.push(AssignmentResult {
                    assignment,
                    outcome,
                    detail,
                });
            }
        }

        summary.elapsed_seconds = started.elapsed().as_secs_f64();
        info!(
            mode = %summary.mode,
            total = summary.total_assignments,
            granted = summary.granted,
            already_member = summary.already_member,
            failed = summary.denied + summary.transient_failures,
            aborted = summary.aborted,
            "Apply run complete"
        );
        (summary, results)
    }

    async fn resolve(
        &self,
        assignment: &Assignment,
        last_call: &mut Option<Instant>,
        grants_made: &mut usize,
    ) -> (ApplyOutcome, Option<String>) {
        let member = match self.snapshot.members.get(&assignment.person_id) {
            Some(m) => m,
            None => return (ApplyOutcome::PersonNotFound, None),
        };
        if member.roles.contains(&assignment.group_id) {
            return (ApplyOutcome::AlreadyMember, None);
        }
        if self.mode == RunMode::Simulate {
            return (ApplyOutcome::Granted, None);
        }

        let (outcome, detail) = self.grant_with_retry(assignment, last_call).await;
        if outcome == ApplyOutcome::Granted {
            *grants_made += 1;
            if self.policy.batch_size > 0 && *grants_made % self.policy.batch_size == 0 {
                debug!(grants = *grants_made, "Batch complete; pausing");
                sleep(self.policy.batch_pause).await;
            }
        }
        (outcome, detail)
    }

    /// One grant call, with exactly one retry after a cooldown when the
    /// authority throttles or fails transiently
    async fn grant_with_retry(
        &self,
        assignment: &Assignment,
        last_call: &mut Option<Instant>,
    ) -> (ApplyOutcome, Option<String>) {
        for attempt in 0..2 {
            self.pace(last_call).await;
            let outcome = self
                .authority
                .grant(
                    self.snapshot.scope_id,
                    assignment.person_id,
                    assignment.group_id,
                )
                .await;

            let (cooldown, reason) = match outcome {
                GrantOutcome::Granted => return (ApplyOutcome::Granted, None),
                GrantOutcome::PersonNotFound => return (ApplyOutcome::PersonNotFound, None),
                GrantOutcome::GroupNotFound => return (ApplyOutcome::GroupNotFound, None),
                GrantOutcome::Denied(reason) => {
                    warn!(person = %assignment.person_id, group = %assignment.group_id, %reason, "Grant denied");
                    return (ApplyOutcome::Denied, Some(reason));
                }
                GrantOutcome::RateLimited { retry_after } => {
                    (retry_after.max(self.policy.min_retry_cooldown), "rate limited".to_string())
                }
                GrantOutcome::Transient(reason) => (self.policy.min_retry_cooldown, reason),
            };

            if attempt == 0 {
                warn!(
                    person = %assignment.person_id,
                    group = %assignment.group_id,
                    cooldown_ms = cooldown.as_millis(),
                    %reason,
                    "Grant did not land; retrying once after cooldown"
                );
                sleep(cooldown).await;
            } else {
                return (ApplyOutcome::TransientFailure, Some(reason));
            }
        }
        unreachable!("loop returns on second attempt")
    }

    /// Keep grant calls at least `call_spacing` apart
    async fn pace(&self, last_call: &mut Option<Instant>) {
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.policy.call_spacing {
                sleep(self.policy.call_spacing - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

/// Group assignments by target group, preserving first-seen group order
/// and the in-group order
fn group_in_order(assignments: Vec<Assignment>) -> Vec<(GroupId, Vec<Assignment>)> {
    let mut groups: Vec<(GroupId, Vec<Assignment>)> = Vec::new();
    for assignment in assignments {
        match groups.iter_mut().find(|(id, _)| *id == assignment.group_id) {
            Some((_, batch)) => batch.push(assignment),
            None => groups.push((assignment.group_id, vec![assignment])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::MockAuthority;
    use crate::snapshot::test_support::snapshot_with;
    use rollcall_common::model::PersonId;

    fn fast_policy() -> ApplyPolicy {
        ApplyPolicy {
            call_spacing: Duration::from_millis(1),
            batch_size: 10,
            batch_pause: Duration::from_millis(1),
            min_retry_cooldown: Duration::from_millis(1),
        }
    }

    fn assignment(person: u64, group: u64) -> Assignment {
        let mut a = Assignment::new(PersonId(person), GroupId(group), "someone", "somegroup");
        a.add_evidence(rollcall_common::model::SourceKind::Attendance);
        a
    }

    #[tokio::test]
    async fn test_already_member_makes_no_calls() {
        let snap = snapshot_with(&[(7, "YOGA")], &[(101, "ada", None, &[7])]);
        let mock = MockAuthority::new(snap.clone());
        let engine = ApplyEngine::new(
            &mock,
            &snap,
            fast_policy(),
            RunMode::Commit,
            CancellationToken::new(),
        );
        let (summary, results) = engine.run(vec![assignment(101, 7)]).await;
        assert_eq!(summary.already_member, 1);
        assert_eq!(mock.call_count(), 0);
        assert_eq!(results[0].outcome, ApplyOutcome::AlreadyMember);
    }

    #[tokio::test]
    async fn test_simulate_grants_without_calls() {
        let snap = snapshot_with(&[(7, "YOGA")], &[(101, "ada", None, &[])]);
        let mock = MockAuthority::new(snap.clone());
        let engine = ApplyEngine::new(
            &mock,
            &snap,
            fast_policy(),
            RunMode::Simulate,
            CancellationToken::new(),
        );
        let (summary, _) = engine.run(vec![assignment(101, 7)]).await;
        assert_eq!(summary.granted, 1);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_grants_and_counts() {
        let snap = snapshot_with(
            &[(7, "YOGA")],
            &[(101, "ada", None, &[]), (102, "grace", None, &[])],
        );
        let mock = MockAuthority::new(snap.clone());
        let engine = ApplyEngine::new(
            &mock,
            &snap,
            fast_policy(),
            RunMode::Commit,
            CancellationToken::new(),
        );
        let (summary, _) = engine.run(vec![assignment(101, 7), assignment(102, 7)]).await;
        assert_eq!(summary.granted, 2);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(
            mock.calls(),
            vec![(PersonId(101), GroupId(7)), (PersonId(102), GroupId(7))]
        );
    }

    #[tokio::test]
    async fn test_missing_person_and_group_short_circuit() {
        let snap = snapshot_with(&[(7, "YOGA")], &[(101, "ada", None, &[])]);
        let mock = MockAuthority::new(snap.clone());
        let engine = ApplyEngine::new(
            &mock,
            &snap,
            fast_policy(),
            RunMode::Commit,
            CancellationToken::new(),
        );
        let (summary, _) = engine
            .run(vec![assignment(999, 7), assignment(101, 888)])
            .await;
        assert_eq!(summary.person_not_found, 1);
        assert_eq!(summary.group_not_found, 1);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_grant_retries_exactly_once() {
        let snap = snapshot_with(&[(7, "YOGA")], &[(101, "ada", None, &[])]);
        let mock = MockAuthority::new(snap.clone());
        mock.script_outcome(
            0,
            GrantOutcome::RateLimited {
                retry_after: Duration::from_millis(2),
            },
        );
        let engine = ApplyEngine::new(
            &mock,
            &snap,
            fast_policy(),
            RunMode::Commit,
            CancellationToken::new(),
        );
        let (summary, _) = engine.run(vec![assignment(101, 7)]).await;
        assert_eq!(summary.granted, 1);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_second_failure_is_terminal() {
        let snap = snapshot_with(&[(7, "YOGA")], &[(101, "ada", None, &[])]);
        let mock = MockAuthority::new(snap.clone());
        mock.script_outcome(0, GrantOutcome::Transient("boom".to_string()));
        mock.script_outcome(1, GrantOutcome::Transient("boom again".to_string()));
        let engine = ApplyEngine::new(
            &mock,
            &snap,
            fast_policy(),
            RunMode::Commit,
            CancellationToken::new(),
        );
        let (summary, results) = engine.run(vec![assignment(101, 7)]).await;
        assert_eq!(summary.transient_failures, 1);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(results[0].detail.as_deref(), Some("boom again"));
    }

    #[tokio::test]
    async fn test_denied_is_not_retried() {
        let snap = snapshot_with(&[(7, "YOGA")], &[(101, "ada", None, &[])]);
        let mock = MockAuthority::new(snap.clone());
        mock.script_outcome(0, GrantOutcome::Denied("role above bot".to_string()));
        let engine = ApplyEngine::new(
            &mock,
            &snap,
            fast_policy(),
            RunMode::Commit,
            CancellationToken::new(),
        );
        let (summary, _) = engine.run(vec![assignment(101, 7)]).await;
        assert_eq!(summary.denied, 1);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_assignments() {
        let snap = snapshot_with(&[(7, "YOGA")], &[(101, "ada", None, &[7])]);
        let mock = MockAuthority::new(snap.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = ApplyEngine::new(&mock, &snap, fast_policy(), RunMode::Commit, cancel);
        let (summary, results) = engine.run(vec![assignment(101, 7)]).await;
        assert!(summary.aborted);
        assert_eq!(summary.processed(), 0);
        assert!(results.is_empty());
        // Summary is still fully formed for flushing
        assert_eq!(summary.total_assignments, 1);
    }

    #[tokio::test]
    async fn test_reapply_is_idempotent() {
        // First run grants; a snapshot reflecting that run turns the same
        // assignment into already-member with zero calls.
        let before = snapshot_with(&[(7, "YOGA")], &[(101, "ada", None, &[])]);
        let mock = MockAuthority::new(before.clone());
        let engine = ApplyEngine::new(
            &mock,
            &before,
            fast_policy(),
            RunMode::Commit,
            CancellationToken::new(),
        );
        let (first, _) = engine.run(vec![assignment(101, 7)]).await;
        assert_eq!(first.granted, 1);

        let after = snapshot_with(&[(7, "YOGA")], &[(101, "ada", None, &[7])]);
        let mock2 = MockAuthority::new(after.clone());
        let engine2 = ApplyEngine::new(
            &mock2,
            &after,
            fast_policy(),
            RunMode::Commit,
            CancellationToken::new(),
        );
        let (second, _) = engine2.run(vec![assignment(101, 7)]).await;
        assert_eq!(second.granted, 0);
        assert_eq!(second.already_member, 1);
        assert_eq!(mock2.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throughput_policy_paces_and_pauses() {
        // 12 grants with default pacing: 1 s spacing between calls plus a
        // 5 s pause after the 10th grant.
        let members: Vec<(u64, String)> = (1..=12u64).map(|i| (i, format!("m{i}"))).collect();
        let member_rows: Vec<(u64, &str, Option<&str>, &[u64])> = members
            .iter()
            .map(|(id, name)| (*id, name.as_str(), None, &[][..]))
            .collect();
        let snap = snapshot_with(&[(7, "YOGA")], &member_rows);
        let mock = MockAuthority::new(snap.clone());
        let engine = ApplyEngine::new(
            &mock,
            &snap,
            ApplyPolicy::default(),
            RunMode::Commit,
            CancellationToken::new(),
        );

        let assignments: Vec<Assignment> = (1..=12u64).map(|i| assignment(i, 7)).collect();
        let started = tokio::time::Instant::now();
        let (summary, _) = engine.run(assignments).await;
        let elapsed = started.elapsed();

        assert_eq!(summary.granted, 12);
        assert_eq!(mock.call_count(), 12);
        // 11 spacing gaps plus one batch pause, with paused virtual time
        assert!(elapsed >= Duration::from_secs(16), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(18), "elapsed {elapsed:?}");
    }
}
