//! Run orchestration.
//!
//! Ties the corpus, scheduler, executor, workspaces, and verification
//! together: preflight, the per-job pipeline, deterministic result ordering,
//! summary computation, and artifact persistence. A single job failing never
//! aborts the scheduler loop — every early exit stamps its error class and
//! leaves a complete record behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::config::{RunConfig, load_run_config};
use crate::executor::{CommandRunner, ExecutionRequest, ExecutionResult};
use crate::io::{ensure_dir, write_json_stable};
use crate::results::{
    Artifacts, ErrorClass, LatestRunPointer, Preflight, RunResult, TaskRunResult, ToolchainStatus,
    build_summary, sort_results,
};
use crate::scheduler::{Job, run_jobs};
use crate::task::{Mode, Task, load_tasks};
use crate::verify::verify_task;
use crate::workspace::{prepare_workspace, safe_cleanup};

/// Binary name of the external agent CLI that baseline-mode tasks invoke.
pub const AGENT_BIN: &str = "agent";

const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct HarnessOptions<'a> {
    pub root_dir: PathBuf,
    pub config_path: Option<PathBuf>,
    pub run_id: Option<String>,
    pub runner: &'a dyn CommandRunner,
}

/// Execute one full benchmark run and persist its artifacts.
#[instrument(skip_all, fields(root = %options.root_dir.display()))]
pub fn run_harness(options: &HarnessOptions<'_>) -> Result<RunResult> {
    let root_dir = options.root_dir.as_path();
    let config_path = options
        .config_path
        .clone()
        .unwrap_or_else(|| root_dir.join("benchmarks").join("run-config.json"));

    let config = load_run_config(&config_path)?;
    let tasks = load_tasks(&config.task_glob, root_dir)?;
    let preflight = run_preflight(&tasks, &config, root_dir, options.runner);

    let run_id = options
        .run_id
        .clone()
        .unwrap_or_else(|| create_run_id(&config.seed, Utc::now()));
    let output_root = root_dir.join(&config.output_dir);
    let run_dir = output_root.join(&run_id);
    let artifacts_dir = run_dir.join("artifacts");
    let workspaces_root = run_dir.join("workspaces");
    ensure_dir(&artifacts_dir)?;
    ensure_dir(&workspaces_root)?;

    let started_at = Utc::now();
    let jobs = build_jobs(&tasks, &config.modes);
    info!(run_id, jobs = jobs.len(), workers = config.max_parallel, "run started");

    let ctx = JobContext {
        root_dir,
        artifacts_dir: &artifacts_dir,
        workspaces_root: &workspaces_root,
        runner: options.runner,
        harness_bin: harness_bin(),
    };
    let mut results = run_jobs(&jobs, config.max_parallel, config.fail_fast, |job| {
        run_single_job(&ctx, job)
    });
    sort_results(&mut results);
    let ended_at = Utc::now();
    let summary = build_summary(&results);

    let result = RunResult {
        run_id: run_id.clone(),
        seed: config.seed.clone(),
        started_at: started_at.to_rfc3339(),
        ended_at: ended_at.to_rfc3339(),
        preflight: preflight.clone(),
        results,
        summary,
    };

    let results_path = run_dir.join("results.json");
    write_json_stable(&run_dir.join("preflight.json"), &preflight)?;
    write_json_stable(&results_path, &result)?;
    write_json_stable(
        &output_root.join("latest-run.json"),
        &LatestRunPointer {
            run_id: run_id.clone(),
            results_path: results_path.display().to_string(),
            updated_at: ended_at.to_rfc3339(),
        },
    )?;

    info!(
        run_id,
        total = result.summary.total,
        passed = result.summary.passed,
        failed = result.summary.failed,
        "run complete"
    );
    Ok(result)
}

/// Probe the agent CLI once when a baseline task will invoke it. Problems
/// here are warnings, never fatal: if the CLI truly is required and missing,
/// the affected jobs surface their own `infra_error`.
fn run_preflight(
    tasks: &[Task],
    config: &RunConfig,
    root_dir: &Path,
    runner: &dyn CommandRunner,
) -> Preflight {
    let needs_agent = config.modes.contains(&Mode::Baseline)
        && tasks.iter().any(|task| {
            task.resolve_mode_command(Mode::Baseline)
                .and_then(|command| command.first())
                .is_some_and(|binary| binary.trim().eq_ignore_ascii_case(AGENT_BIN))
        });

    if !needs_agent {
        return Preflight {
            agent_cli: ToolchainStatus::NotRequired,
            warnings: Vec::new(),
        };
    }

    let probe = runner.run(&ExecutionRequest::new(
        vec![AGENT_BIN.to_string(), "--version".to_string()],
        root_dir.to_path_buf(),
        PREFLIGHT_TIMEOUT,
    ));
    if probe.ok {
        return Preflight {
            agent_cli: ToolchainStatus::Available,
            warnings: Vec::new(),
        };
    }

    let warning = format!(
        "{AGENT_BIN} CLI was not available during preflight for baseline mode. \
         Baseline task runs may report infra_error."
    );
    warn!("{warning}");
    Preflight {
        agent_cli: ToolchainStatus::Missing,
        warnings: vec![warning],
    }
}

/// Cross product of tasks and configured modes, in corpus order.
pub fn build_jobs(tasks: &[Task], modes: &[Mode]) -> Vec<Job> {
    let mut jobs = Vec::with_capacity(tasks.len() * modes.len());
    for task in tasks {
        for &mode in modes {
            jobs.push(Job {
                task: task.clone(),
                mode,
            });
        }
    }
    jobs
}

struct JobContext<'a> {
    root_dir: &'a Path,
    artifacts_dir: &'a Path,
    workspaces_root: &'a Path,
    runner: &'a dyn CommandRunner,
    harness_bin: String,
}

/// Literal placeholders resolved once per string, order-independent.
struct TokenContext {
    root: String,
    workspace: String,
    prompt: String,
    harness_bin: String,
}

impl TokenContext {
    fn expand(&self, value: &str) -> String {
        value
            .replace("{REPO_ROOT}", &self.root)
            .replace("{WORKSPACE}", &self.workspace)
            .replace("{TASK_PROMPT}", &self.prompt)
            .replace("{HARNESS_BIN}", &self.harness_bin)
    }

    fn expand_all(&self, command: &[String]) -> Vec<String> {
        command.iter().map(|value| self.expand(value)).collect()
    }
}

struct JobOutcome {
    exit_code: Option<i32>,
    pass: bool,
    verification_pass: bool,
    error_class: Option<ErrorClass>,
    command: Vec<String>,
}

impl JobOutcome {
    fn failed(exit_code: Option<i32>, error_class: ErrorClass, command: Vec<String>) -> Self {
        JobOutcome {
            exit_code,
            pass: false,
            verification_pass: false,
            error_class: Some(error_class),
            command,
        }
    }
}

/// Centralized failure classification for executed commands.
fn classify_execution(result: &ExecutionResult) -> ErrorClass {
    if result.timed_out {
        ErrorClass::Timeout
    } else if result.error_message.is_some() {
        ErrorClass::InfraError
    } else {
        ErrorClass::CliError
    }
}

/// Run one job end to end. Never panics and never returns early without a
/// complete record: every exit path stamps its error class, the log and
/// result artifacts are written at the single tail, and workspace cleanup is
/// always attempted.
#[instrument(skip_all, fields(task_id = %job.task.id, mode = %job.mode))]
fn run_single_job(ctx: &JobContext<'_>, job: &Job) -> TaskRunResult {
    let started_at = Utc::now();
    let safe_task_id = sanitize_name(&job.task.id);
    let job_dir = ctx.artifacts_dir.join(&safe_task_id).join(job.mode.as_str());
    let log_path = job_dir.join("run.log");
    let result_path = job_dir.join("result.json");

    let mut logs: Vec<String> = Vec::new();
    let (outcome, workspace) = execute_job(ctx, job, &safe_task_id, &mut logs);
    let ended_at = Utc::now();

    let result = TaskRunResult {
        task_id: job.task.id.clone(),
        mode: job.mode,
        started_at: started_at.to_rfc3339(),
        ended_at: ended_at.to_rfc3339(),
        duration_ms: duration_ms(started_at, ended_at),
        exit_code: outcome.exit_code,
        pass: outcome.pass,
        verification_pass: outcome.verification_pass,
        artifacts: Artifacts {
            logs_path: log_path.display().to_string(),
        },
        error_class: outcome.error_class,
        command: outcome.command,
    };

    persist_job_artifacts(&job_dir, &log_path, &result_path, &logs, &result);
    if let Some(workspace) = workspace
        && let Err(err) = safe_cleanup(&workspace)
    {
        warn!(workspace = %workspace.display(), error = %err, "workspace cleanup failed");
    }

    debug!(pass = result.pass, error_class = ?result.error_class, "job finished");
    result
}

fn execute_job(
    ctx: &JobContext<'_>,
    job: &Job,
    safe_task_id: &str,
    logs: &mut Vec<String>,
) -> (JobOutcome, Option<PathBuf>) {
    let fixture_path = ctx.root_dir.join(&job.task.repo_fixture);
    let workspace = match prepare_workspace(
        &fixture_path,
        ctx.workspaces_root,
        safe_task_id,
        job.mode,
    ) {
        Ok(workspace) => workspace,
        Err(err) => {
            logs.push(format!("{err:#}"));
            return (
                JobOutcome::failed(None, ErrorClass::InfraError, Vec::new()),
                None,
            );
        }
    };

    logs.push(format!("Task: {}", job.task.id));
    logs.push(format!("Mode: {}", job.mode));
    logs.push(format!("Workspace: {}", workspace.display()));

    let tokens = TokenContext {
        root: ctx.root_dir.display().to_string(),
        workspace: workspace.display().to_string(),
        prompt: job.task.prompt.clone(),
        harness_bin: ctx.harness_bin.clone(),
    };
    let timeout = Duration::from_secs(job.task.timeout_seconds);

    for setup_command in &job.task.setup_cmds {
        let expanded = tokens.expand_all(setup_command);
        logs.push(format!("Setup: {}", expanded.join(" ")));
        let setup_result = ctx
            .runner
            .run(&ExecutionRequest::new(expanded.clone(), workspace.clone(), timeout));
        logs.push(setup_result.stdout.clone());
        logs.push(setup_result.stderr.clone());

        if !setup_result.ok {
            let class = classify_execution(&setup_result);
            return (
                JobOutcome::failed(setup_result.exit_code, class, expanded),
                Some(workspace),
            );
        }
    }

    let Some(command) = job.task.resolve_mode_command(job.mode) else {
        logs.push("No run command configured for mode.".to_string());
        return (
            JobOutcome::failed(None, ErrorClass::InfraError, Vec::new()),
            Some(workspace),
        );
    };

    let expanded = tokens.expand_all(command);
    logs.push(format!("Run: {}", expanded.join(" ")));
    let command_result = ctx
        .runner
        .run(&ExecutionRequest::new(expanded.clone(), workspace.clone(), timeout));
    logs.push(command_result.stdout.clone());
    logs.push(command_result.stderr.clone());

    if !command_result.ok {
        let class = classify_execution(&command_result);
        return (
            JobOutcome::failed(command_result.exit_code, class, expanded),
            Some(workspace),
        );
    }

    let verification = verify_task(
        &job.task,
        &workspace,
        timeout,
        &|value| tokens.expand(value),
        ctx.runner,
    );
    logs.push(format!(
        "Verification: {}",
        if verification.pass { "pass" } else { "fail" }
    ));
    logs.extend(verification.messages.iter().cloned());

    let outcome = JobOutcome {
        exit_code: command_result.exit_code,
        pass: verification.pass,
        verification_pass: verification.pass,
        error_class: (!verification.pass).then_some(ErrorClass::VerifyFail),
        command: expanded,
    };
    (outcome, Some(workspace))
}

/// Artifact write failures degrade to warnings; a job must never unwind out
/// of its worker over them.
fn persist_job_artifacts(
    job_dir: &Path,
    log_path: &Path,
    result_path: &Path,
    logs: &[String],
    result: &TaskRunResult,
) {
    if let Err(err) = ensure_dir(job_dir) {
        warn!(dir = %job_dir.display(), error = %err, "create job artifact dir failed");
        return;
    }
    let contents: Vec<&str> = logs
        .iter()
        .map(String::as_str)
        .filter(|line| !line.trim().is_empty())
        .collect();
    if let Err(err) = fs::write(log_path, format!("{}\n", contents.join("\n"))) {
        warn!(path = %log_path.display(), error = %err, "write job log failed");
    }
    if let Err(err) = write_json_stable(result_path, result) {
        warn!(path = %result_path.display(), error = %err, "write job result failed");
    }
}

fn duration_ms(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> u64 {
    (ended_at - started_at).num_milliseconds().max(0) as u64
}

fn harness_bin() -> String {
    std::env::current_exe()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string())
}

/// Run id from the sanitized seed and a compact UTC timestamp.
pub fn create_run_id(seed: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", now.format("%Y%m%dT%H%M%S%3fZ"), sanitize_name(seed))
}

/// Lowercase, collapse non-alphanumeric runs to single dashes, trim dashes.
fn sanitize_name(value: &str) -> String {
    let mut sanitized = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !sanitized.is_empty() {
                sanitized.push('-');
            }
            pending_dash = false;
            sanitized.push(ch);
        } else {
            pending_dash = true;
        }
    }
    sanitized
}
