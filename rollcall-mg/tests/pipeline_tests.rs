//! End-to-end pipeline tests
//!
//! Exercise the full migration flow against temp-file exports and the
//! in-memory authority: extraction, mapping, reconciliation, the
//! canonical file round trip, and the apply engine's pacing, retry,
//! idempotency, and cancellation behavior.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use rollcall_common::model::{Assignment, GroupId, PersonId, RunMode, ScopeId, SourceKind};
use rollcall_common::table::{read_assignments, write_assignments};
use rollcall_mg::adapters::{attendance, manual, subscription};
use rollcall_mg::apply::{ApplyEngine, ApplyPolicy};
use rollcall_mg::authority::{GrantOutcome, MockAuthority};
use rollcall_mg::mapper::{annotate, EventGroupMap};
use rollcall_mg::reconcile::reconcile;
use rollcall_mg::snapshot::{AuthoritySnapshot, Member};

const SCOPE: u64 = 480695542155051010;
const YOGA_ROLE: u64 = 1392210566407524382;
const YOGA_FLOAT: &str = "1.3922105664075244e+18";
const WALTZ_ROLE: u64 = 900;

fn snapshot(members: &[(u64, &str, &[u64])]) -> AuthoritySnapshot {
    AuthoritySnapshot {
        scope_id: ScopeId(SCOPE),
        scope_name: "community".to_string(),
        roles: BTreeMap::from([
            (GroupId(YOGA_ROLE), "YOGA".to_string()),
            (GroupId(WALTZ_ROLE), "Waltz".to_string()),
        ]),
        members: members
            .iter()
            .map(|(id, name, held)| {
                (
                    PersonId(*id),
                    Member {
                        username: name.to_string(),
                        display_name: None,
                        roles: held.iter().map(|g| GroupId(*g)).collect::<BTreeSet<_>>(),
                    },
                )
            })
            .collect(),
        fetched_at: Utc::now(),
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    attendance: PathBuf,
    subscriptions: PathBuf,
    manual: PathBuf,
    mapping: PathBuf,
    out: PathBuf,
}

fn write_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = |name: &str| dir.path().join(name);

    // ada (101) attends yoga twice and subscribes once; grace (102)
    // attends waltz; one attendee id arrives float-corrupted.
    std::fs::write(
        path("attendance.csv"),
        format!(
            "event_title,start_time,attendee_ids,attendee_names\n\
             Yoga,2025-06-01T19:00:00Z,\"101,102\",\"ada,grace\"\n\
             Yoga,2025-06-08T19:00:00Z,\"101,{YOGA_FLOAT}\",\"ada,kay\"\n\
             Waltz Night,2025-06-10T20:00:00Z,\"102\",\"grace\"\n"
        ),
    )
    .unwrap();
    std::fs::write(
        path("subscriptions.csv"),
        "event_title,start_time,subscriber_ids\n\
         Yoga,2025-06-15T19:00:00Z,\"[101]\"\n",
    )
    .unwrap();
    std::fs::write(
        path("manual.csv"),
        "event_title,interested_names\n\
         Waltz Interest,\"ada, unknowable person\"\n",
    )
    .unwrap();
    std::fs::write(
        path("mapping.csv"),
        format!(
            "source_kind,event_title,group_id,group_name\n\
             attendance,Yoga,{YOGA_ROLE},YOGA\n\
             attendance,Waltz Night,{WALTZ_ROLE},Waltz\n\
             subscription,Yoga,{YOGA_ROLE},YOGA\n\
             manual-interest,Waltz Interest,{WALTZ_ROLE},Waltz\n"
        ),
    )
    .unwrap();

    Fixture {
        attendance: path("attendance.csv"),
        subscriptions: path("subscriptions.csv"),
        manual: path("manual.csv"),
        mapping: path("mapping.csv"),
        out: path("assignments.csv"),
        dir,
    }
}

fn run_pipeline(fixture: &Fixture, snap: &AuthoritySnapshot) -> Vec<Assignment> {
    let map = EventGroupMap::from_path(&fixture.mapping).unwrap();
    let lookup = snap.name_lookup();

    let mut records = Vec::new();
    let (mut r, _) = attendance::extract(&fixture.attendance).unwrap();
    records.append(&mut r);
    let (mut r, _) = subscription::extract(&fixture.subscriptions).unwrap();
    records.append(&mut r);
    let (mut r, _, _) = manual::extract(&fixture.manual, &lookup).unwrap();
    records.append(&mut r);

    let (tuples, _) = annotate(records, &map);
    let (assignments, _) = reconcile(tuples, snap);
    assignments
}

fn member_roster() -> AuthoritySnapshot {
    snapshot(&[
        (101, "ada", &[]),
        (102, "grace", &[]),
        (YOGA_ROLE, "kay", &[]),
    ])
}

#[test]
fn test_pipeline_produces_one_assignment_per_pair() {
    let fixture = write_fixture();
    let snap = member_roster();
    let assignments = run_pipeline(&fixture, &snap);

    let mut pairs: Vec<(PersonId, GroupId)> = assignments
        .iter()
        .map(|a| (a.person_id, a.group_id))
        .collect();
    let before = pairs.len();
    pairs.sort();
    pairs.dedup();
    assert_eq!(pairs.len(), before, "duplicate (person, group) pair");

    // ada: 2 yoga attendances + 1 subscription fold into one assignment
    let ada_yoga = assignments
        .iter()
        .find(|a| a.person_id == PersonId(101) && a.group_id == GroupId(YOGA_ROLE))
        .expect("ada's yoga assignment");
    assert_eq!(ada_yoga.attendance_events, 2);
    assert_eq!(ada_yoga.subscription_events, 1);
    assert_eq!(ada_yoga.count_for(SourceKind::ManualInterest), 0);

    // the float-corrupted attendee was repaired, not dropped
    assert!(assignments
        .iter()
        .any(|a| a.person_id == PersonId(YOGA_ROLE) && a.group_id == GroupId(YOGA_ROLE)));

    // manual interest flows through with its own source count
    let ada_waltz = assignments
        .iter()
        .find(|a| a.person_id == PersonId(101) && a.group_id == GroupId(WALTZ_ROLE))
        .expect("ada's waltz assignment");
    assert_eq!(ada_waltz.manual_events, 1);
}

#[test]
fn test_pipeline_is_deterministic() {
    let fixture = write_fixture();
    let snap = member_roster();
    let first = run_pipeline(&fixture, &snap);
    let second = run_pipeline(&fixture, &snap);
    assert_eq!(first, second);

    // Byte-identical output files on identical input
    let other = fixture.dir.path().join("assignments-2.csv");
    write_assignments(&fixture.out, &first).unwrap();
    write_assignments(&other, &second).unwrap();
    assert_eq!(
        std::fs::read_to_string(&fixture.out).unwrap(),
        std::fs::read_to_string(&other).unwrap()
    );
}

#[test]
fn test_canonical_file_round_trip_preserves_exact_ids() {
    let fixture = write_fixture();
    let snap = member_roster();
    let assignments = run_pipeline(&fixture, &snap);

    write_assignments(&fixture.out, &assignments).unwrap();
    let raw = std::fs::read_to_string(&fixture.out).unwrap();
    assert!(raw.contains(&YOGA_ROLE.to_string()));
    assert!(!raw.contains("e+"), "float-rendered id leaked into output");

    let back = read_assignments(&fixture.out).unwrap();
    assert_eq!(back, assignments);
}

fn fast_policy() -> ApplyPolicy {
    ApplyPolicy {
        call_spacing: Duration::from_millis(1),
        batch_size: 10,
        batch_pause: Duration::from_millis(1),
        min_retry_cooldown: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_apply_then_reapply_is_idempotent() {
    let fixture = write_fixture();
    let snap = member_roster();
    let assignments = run_pipeline(&fixture, &snap);

    let mock = MockAuthority::new(snap.clone());
    let engine = ApplyEngine::new(
        &mock,
        &snap,
        fast_policy(),
        RunMode::Commit,
        CancellationToken::new(),
    );
    let (first, _) = engine.run(assignments.clone()).await;
    assert_eq!(first.granted, assignments.len());
    assert_eq!(mock.call_count(), assignments.len());

    // Second run against a snapshot that reflects the first run
    let mut after = snap.clone();
    for a in &assignments {
        after
            .members
            .get_mut(&a.person_id)
            .unwrap()
            .roles
            .insert(a.group_id);
    }
    let mock2 = MockAuthority::new(after.clone());
    let engine2 = ApplyEngine::new(
        &mock2,
        &after,
        fast_policy(),
        RunMode::Commit,
        CancellationToken::new(),
    );
    let (second, _) = engine2.run(assignments.clone()).await;
    assert_eq!(second.granted, 0);
    assert_eq!(second.already_member, assignments.len());
    assert_eq!(mock2.call_count(), 0);
}

#[tokio::test]
async fn test_simulate_counts_everything_without_calls() {
    let fixture = write_fixture();
    let snap = member_roster();
    let assignments = run_pipeline(&fixture, &snap);

    let mock = MockAuthority::new(snap.clone());
    let engine = ApplyEngine::new(
        &mock,
        &snap,
        fast_policy(),
        RunMode::Simulate,
        CancellationToken::new(),
    );
    let (summary, _) = engine.run(assignments.clone()).await;
    assert_eq!(summary.processed(), assignments.len());
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_run_waits_and_retries_once() {
    // 12 pending grants with default pacing; the 6th call is throttled
    // with a 5 s cooldown. Expect 13 calls total and all 12 granted.
    let members: Vec<(u64, String)> = (1..=12u64).map(|i| (i, format!("m{i}"))).collect();
    let rows: Vec<(u64, &str, &[u64])> = members
        .iter()
        .map(|(id, name)| (*id, name.as_str(), &[][..]))
        .collect();
    let snap = snapshot(&rows);

    let mock = MockAuthority::new(snap.clone());
    mock.script_outcome(
        5,
        GrantOutcome::RateLimited {
            retry_after: Duration::from_secs(5),
        },
    );
    let engine = ApplyEngine::new(
        &mock,
        &snap,
        ApplyPolicy::default(),
        RunMode::Commit,
        CancellationToken::new(),
    );

    let assignments: Vec<Assignment> = (1..=12u64)
        .map(|i| Assignment::new(PersonId(i), GroupId(YOGA_ROLE), format!("m{i}"), "YOGA"))
        .collect();
    let (summary, _) = engine.run(assignments).await;

    assert_eq!(summary.granted, 12);
    assert_eq!(summary.transient_failures, 0);
    assert_eq!(mock.call_count(), 13);
}

#[tokio::test]
async fn test_cancelled_run_still_reports_the_processed_prefix() {
    let snap = member_roster();
    let mock = MockAuthority::new(snap.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let engine = ApplyEngine::new(&mock, &snap, fast_policy(), RunMode::Commit, cancel);

    let assignments = vec![Assignment::new(PersonId(101), GroupId(YOGA_ROLE), "ada", "YOGA")];
    let (summary, results) = engine.run(assignments).await;
    assert!(summary.aborted);
    assert_eq!(summary.total_assignments, 1);
    assert_eq!(summary.processed(), results.len());
}
