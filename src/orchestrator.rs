//! The Run Orchestrator: ties the Config Resolver, Sequence Scheduler,
//! Request Executor, and Artifact Writer together into the `run`/
//! `validate`/`resolve` operations the CLI exposes.

use crate::artifact::ArtifactWriter;
use crate::config::{self, ResolvedPlan};
use crate::error::Error;
use crate::executor::{self, Executor, RequestOutcome};
use crate::fs::FileSystem;
use crate::scheduler;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct RunSummary {
    pub run_dir: PathBuf,
    pub stash_name: String,
    pub outcomes: Vec<RequestOutcome>,
}

impl RunSummary {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(RequestOutcome::succeeded)
    }
}

fn read_document(fs: &dyn FileSystem, config_path: &Path) -> Result<String, Error> {
    fs.read_to_string(config_path)
        .map_err(|e| Error::validation(format!("failed to read {}: {e}", config_path.display())))
}

fn read_secrets(fs: &dyn FileSystem, secrets_path: Option<&Path>) -> Result<Option<HashMap<String, String>>, Error> {
    let Some(path) = secrets_path else { return Ok(None) };
    let content = fs
        .read_to_string(path)
        .map_err(|e| Error::validation(format!("failed to read secrets file {}: {e}", path.display())))?;
    Ok(Some(crate::secrets::parse_file(&content)))
}

fn slug(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// UTC run timestamp, filesystem-safe (`:` replaced with `-`).
fn run_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string()
}

/// The run directory is `<out-root>/<stash-name>/<run-timestamp>`, rooted
/// at `.` when the caller doesn't supply `--out`.
fn run_dir_for(out_root: Option<PathBuf>, stash_name: &str, timestamp: &str) -> PathBuf {
    out_root.unwrap_or_else(|| PathBuf::from(".")).join(slug(stash_name)).join(timestamp)
}

/// Run artifacts are named after the config file, not the stash, so two
/// stashes sharing a `Name` don't clobber each other's output.
fn config_basename(config_path: &Path) -> String {
    config_path.file_stem().and_then(|s| s.to_str()).unwrap_or("config").to_string()
}

/// Validates a document without resolving deferred request-time values or
/// sending anything. Secret references are checked for presence only when
/// a secrets file is supplied; otherwise every reference is treated as
/// redacted so `validate` works without one.
///
/// # Errors
/// Returns a `Validation` error describing the first schema violation found.
pub fn validate(fs: &dyn FileSystem, config_path: &Path, secrets_path: Option<&Path>) -> Result<ResolvedPlan, Error> {
    let raw = read_document(fs, config_path)?;
    let secrets = read_secrets(fs, secrets_path)?;
    let redact = secrets.is_none();
    config::resolve_document(&raw, secrets.as_ref(), redact)
}

/// Resolves a document and writes `<config-basename>-resolved.yml` under
/// `<out>/<stash-name>/<run-timestamp>/` without sending any requests.
///
/// # Errors
/// Returns a `Validation` error for a malformed document or an
/// `OutputWrite` error if the resolved document cannot be written.
pub fn resolve(
    fs: &dyn FileSystem,
    config_path: &Path,
    secrets_path: Option<&Path>,
    out_dir: Option<PathBuf>,
) -> Result<PathBuf, Error> {
    let plan = validate(fs, config_path, secrets_path)?;
    let run_dir = run_dir_for(out_dir, &plan.stash_name, &run_timestamp());
    let writer = ArtifactWriter::new(fs, run_dir)?;
    writer.write_resolved_document(&config_basename(config_path), &plan.resolved_document)
}

/// Resolves and sends every request in the document, archiving responses,
/// the resolved document, a results table, and a run log into the run
/// directory. `dry_run` stops after writing the resolved document.
///
/// # Errors
/// Returns a `Validation` error for a malformed document, or an
/// `OutputWrite` error if any artifact cannot be written. Individual
/// request failures are recorded in the results table, not surfaced here.
pub async fn run(
    fs: &dyn FileSystem,
    config_path: &Path,
    secrets_path: Option<&Path>,
    out_dir: Option<PathBuf>,
    dry_run: bool,
) -> Result<RunSummary, Error> {
    let raw = read_document(fs, config_path)?;
    let secrets = read_secrets(fs, secrets_path)?;
    let plan = config::resolve_document(&raw, secrets.as_ref(), false)?;
    let basename = config_basename(config_path);

    let run_dir = run_dir_for(out_dir, &plan.stash_name, &run_timestamp());
    let writer = ArtifactWriter::new(fs, run_dir.clone())?;
    writer.write_resolved_document(&basename, &plan.resolved_document)?;

    if dry_run {
        let outcomes = dry_run_outcomes(&plan);
        writer.write_results_csv(&basename, &outcomes)?;
        writer.write_log(&basename, &log_lines(&outcomes, true))?;
        return Ok(RunSummary {
            run_dir,
            stash_name: plan.stash_name,
            outcomes,
        });
    }

    let executor = Executor::new(plan.dynamics.clone(), secrets, false)?;
    let outcomes = scheduler::run(&plan, &executor).await;

    for outcome in &outcomes {
        writer.write_response_body(outcome)?;
    }
    writer.write_results_csv(&basename, &outcomes)?;
    writer.write_log(&basename, &log_lines(&outcomes, false))?;

    Ok(RunSummary {
        run_dir,
        stash_name: plan.stash_name,
        outcomes,
    })
}

/// Synthesizes one `RequestOutcome` per planned request for `--dry-run`,
/// so the results CSV and log still reflect the plan without sending
/// anything. Per-request status is `0` (not a real HTTP status) with zero
/// attempts, distinguishing a dry-run row from a genuine response.
fn dry_run_outcomes(plan: &ResolvedPlan) -> Vec<RequestOutcome> {
    let now = Utc::now();
    plan.requests
        .iter()
        .map(|r| RequestOutcome {
            sequence_name: r.sequence_name.clone(),
            sequence_index: r.sequence_index,
            request_key: r.request_key.clone(),
            request_index: r.request_index,
            method: r.method,
            url: executor::preview_url(r),
            started_at: now,
            status: Some(0),
            content_type: None,
            body: Vec::new(),
            elapsed: Duration::from_secs(0),
            attempts: 0,
            error: None,
        })
        .collect()
}

fn log_lines(outcomes: &[RequestOutcome], dry_run: bool) -> Vec<String> {
    let mut sorted: Vec<&RequestOutcome> = outcomes.iter().collect();
    sorted.sort_by_key(|o| (o.sequence_index, o.request_index));

    let mut lines = if dry_run {
        vec![format!("dry run: {} request(s) planned, nothing sent", sorted.len())]
    } else {
        let succeeded = sorted.iter().filter(|o| o.succeeded()).count();
        vec![format!("{succeeded}/{} requests succeeded", sorted.len())]
    };

    for o in sorted {
        if dry_run {
            lines.push(format!(
                "[{}.{}] {} {}",
                o.sequence_index, o.request_index, o.method.as_str(), o.url
            ));
        } else {
            let status = o.status.map_or_else(|| "error".to_string(), |s| s.to_string());
            let detail = o.error.as_deref().unwrap_or("");
            lines.push(format!(
                "[{}.{}] {} {} -> {} ({} attempt(s)) {detail}",
                o.sequence_index, o.request_index, o.method.as_str(), o.url, status, o.attempts
            ));
        }
    }
    lines
}
