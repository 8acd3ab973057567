//! Membership migration CLI - Main entry point
//!
//! Three operations over one scope of the chat platform:
//! - `snapshot`  — fetch and cache the authority's role/member state
//! - `reconcile` — consolidate participation sources into canonical
//!   assignments (offline, works from a cached snapshot)
//! - `apply`     — drive assignments to terminal outcomes, simulated by
//!   default; `--commit` performs the grants

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rollcall_common::config::{resolve_authority_config, AuthorityConfig};
use rollcall_common::model::{RunMode, RunSummary, ScopeId};
use rollcall_common::table::{read_assignments, write_assignments};

use rollcall_mg::adapters::{attendance, manual, subscription, AdapterReport};
use rollcall_mg::adapters::manual::NameResolution;
use rollcall_mg::apply::{ApplyEngine, ApplyPolicy};
use rollcall_mg::authority::{Authority, RestAuthority};
use rollcall_mg::mapper::{annotate, EventGroupMap, MapperReport};
use rollcall_mg::reconcile::{reconcile, ReconcileReport};
use rollcall_mg::snapshot::AuthoritySnapshot;

/// Command-line arguments for rollcall-mg
#[derive(Parser, Debug)]
#[command(name = "rollcall-mg")]
#[command(about = "Migrate participation history into explicit group memberships")]
#[command(version)]
struct Cli {
    /// Bot token for the authority API
    #[arg(long, global = true, env = "ROLLCALL_BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Authority API base URL (overridable for tests)
    #[arg(long, global = true, env = "ROLLCALL_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the scope's roles and members and cache them to a JSON file
    Snapshot {
        /// Scope (server) id
        #[arg(long)]
        scope: ScopeId,
        /// Output snapshot file
        #[arg(long)]
        out: PathBuf,
    },

    /// Consolidate participation sources into a canonical assignment file
    Reconcile {
        /// Attendance export CSV
        #[arg(long)]
        attendance: Option<PathBuf>,
        /// Scheduled-event subscription export CSV
        #[arg(long)]
        subscriptions: Option<PathBuf>,
        /// Manual interest list CSV
        #[arg(long)]
        manual: Option<PathBuf>,
        /// Event→group mapping table CSV
        #[arg(long)]
        mapping: PathBuf,
        /// Cached authority snapshot (from the `snapshot` operation)
        #[arg(long)]
        snapshot: PathBuf,
        /// Output assignment CSV
        #[arg(long)]
        out: PathBuf,
        /// Optional JSON report with per-stage counts and audit samples
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Apply an assignment file against the authority
    Apply {
        /// Canonical assignment CSV (from `reconcile`)
        #[arg(long)]
        assignments: PathBuf,
        /// Scope (server) id
        #[arg(long)]
        scope: ScopeId,
        /// Perform the grants; without this flag the run is simulated
        #[arg(long)]
        commit: bool,
        /// Process only the first N assignments
        #[arg(long)]
        limit: Option<usize>,
        /// Run summary JSON path (default: timestamped file in the
        /// working directory)
        #[arg(long)]
        summary: Option<PathBuf>,
        /// Skip the interactive confirmation for unbounded commits
        #[arg(long)]
        yes: bool,
        /// Use a cached snapshot instead of fetching one
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rollcall_mg=info,rollcall_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = resolve_authority_config(cli.token, cli.api_url);

    match cli.command {
        Command::Snapshot { scope, out } => run_snapshot(&config, scope, &out).await,
        Command::Reconcile {
            attendance,
            subscriptions,
            manual,
            mapping,
            snapshot,
            out,
            report,
        } => run_reconcile(
            attendance.as_deref(),
            subscriptions.as_deref(),
            manual.as_deref(),
            &mapping,
            &snapshot,
            &out,
            report.as_deref(),
        ),
        Command::Apply {
            assignments,
            scope,
            commit,
            limit,
            summary,
            yes,
            snapshot,
        } => {
            run_apply(
                &config,
                &assignments,
                scope,
                commit,
                limit,
                summary,
                yes,
                snapshot.as_deref(),
            )
            .await
        }
    }
}

async fn run_snapshot(config: &AuthorityConfig, scope: ScopeId, out: &std::path::Path) -> Result<()> {
    let authority = RestAuthority::new(config)?;
    let snapshot = authority.fetch_snapshot(scope).await?;
    snapshot.save(out)?;
    info!(
        scope = %scope,
        roles = snapshot.roles.len(),
        members = snapshot.members.len(),
        path = %out.display(),
        "Snapshot cached"
    );
    Ok(())
}

/// Per-stage counts and audit samples for one reconcile run
#[derive(serde::Serialize)]
struct ReconcileRunReport {
    adapters: Vec<AdapterReport>,
    mapper: MapperReport,
    reconcile: ReconcileReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    manual_resolutions: Vec<NameResolution>,
}

fn run_reconcile(
    attendance: Option<&std::path::Path>,
    subscriptions: Option<&std::path::Path>,
    manual: Option<&std::path::Path>,
    mapping: &std::path::Path,
    snapshot_path: &std::path::Path,
    out: &std::path::Path,
    report_path: Option<&std::path::Path>,
) -> Result<()> {
    if attendance.is_none() && subscriptions.is_none() && manual.is_none() {
        bail!("no sources given; pass at least one of --attendance, --subscriptions, --manual");
    }

    let snapshot = AuthoritySnapshot::load(snapshot_path)
        .with_context(|| format!("loading snapshot {}", snapshot_path.display()))?;
    let map = EventGroupMap::from_path(mapping)
        .with_context(|| format!("loading mapping table {}", mapping.display()))?;

    let mut records = Vec::new();
    let mut adapter_reports = Vec::new();
    let mut manual_resolutions = Vec::new();

    if let Some(path) = attendance {
        let (mut r, report) = attendance::extract(path)
            .with_context(|| format!("reading attendance export {}", path.display()))?;
        records.append(&mut r);
        adapter_reports.push(report);
    }
    if let Some(path) = subscriptions {
        let (mut r, report) = subscription::extract(path)
            .with_context(|| format!("reading subscription export {}", path.display()))?;
        records.append(&mut r);
        adapter_reports.push(report);
    }
    if let Some(path) = manual {
        let lookup = snapshot.name_lookup();
        let (mut r, report, resolutions) = manual::extract(path, &lookup)
            .with_context(|| format!("reading manual interest list {}", path.display()))?;
        records.append(&mut r);
        adapter_reports.push(report);
        manual_resolutions = resolutions;
    }

    let (tuples, mapper_report) = annotate(records, &map);
    let (assignments, reconcile_report) = reconcile(tuples, &snapshot);

    write_assignments(out, &assignments)
        .with_context(|| format!("writing assignments to {}", out.display()))?;
    info!(
        assignments = assignments.len(),
        path = %out.display(),
        "Assignment file written"
    );

    let run_report = ReconcileRunReport {
        adapters: adapter_reports,
        mapper: mapper_report,
        reconcile: reconcile_report,
        manual_resolutions,
    };
    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&run_report)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "Reconciliation report written");
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_apply(
    config: &AuthorityConfig,
    assignments_path: &std::path::Path,
    scope: ScopeId,
    commit: bool,
    limit: Option<usize>,
    summary_path: Option<PathBuf>,
    yes: bool,
    snapshot_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut assignments = read_assignments(assignments_path)
        .with_context(|| format!("reading assignments from {}", assignments_path.display()))?;
    let total = assignments.len();
    if let Some(limit) = limit {
        assignments.truncate(limit);
        info!(total, limited_to = assignments.len(), "Applying a bounded prefix");
    }

    let mode = if commit { RunMode::Commit } else { RunMode::Simulate };
    if mode == RunMode::Commit && limit.is_none() && !yes {
        confirm_unbounded_commit(assignments.len())?;
    }

    let authority = RestAuthority::new(config)?;
    let snapshot = match snapshot_path {
        Some(path) => {
            let snap = AuthoritySnapshot::load(path)
                .with_context(|| format!("loading snapshot {}", path.display()))?;
            if snap.scope_id != scope {
                bail!(
                    "snapshot {} is for scope {}, not {}",
                    path.display(),
                    snap.scope_id,
                    scope
                );
            }
            snap
        }
        None => authority.fetch_snapshot(scope).await?,
    };

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the in-flight call and stopping");
            cancel_on_signal.cancel();
        }
    });

    let engine = ApplyEngine::new(&authority, &snapshot, ApplyPolicy::default(), mode, cancel);
    let (summary, _results) = engine.run(assignments).await;

    let summary_path = summary_path.unwrap_or_else(default_summary_path);
    flush_summary(&summary, &summary_path)?;

    if summary.aborted {
        bail!(
            "run aborted after {} of {} assignments; summary at {}",
            summary.processed(),
            summary.total_assignments,
            summary_path.display()
        );
    }
    Ok(())
}

/// Unbounded live runs require an explicit literal confirmation
fn confirm_unbounded_commit(count: usize) -> Result<()> {
    print!("About to grant memberships for {count} assignments with no --limit.\nType YES to proceed: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    if line.trim() != "YES" {
        bail!("confirmation not given; nothing was applied");
    }
    Ok(())
}

fn default_summary_path() -> PathBuf {
    PathBuf::from(format!(
        "apply-summary-{}.json",
        chrono::Utc::now().format("%Y%m%dT%H%M%SZ")
    ))
}

/// Always write the summary, including for interrupted runs
fn flush_summary(summary: &RunSummary, path: &std::path::Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)
        .with_context(|| format!("writing run summary to {}", path.display()))?;
    info!(
        path = %path.display(),
        granted = summary.granted,
        already_member = summary.already_member,
        failed = summary.denied + summary.transient_failures,
        "Run summary written"
    );
    Ok(())
}
