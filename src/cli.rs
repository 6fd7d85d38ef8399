//! Command implementations behind the clap surface.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};

use crate::config::load_thresholds;
use crate::executor::ProcessRunner;
use crate::harness::{HarnessOptions, run_harness};
use crate::io::{ensure_dir, read_json_file, write_json_stable};
use crate::results::{LatestRunPointer, RunResult};
use crate::scorecard::{
    ScorecardReport, compute_scorecard, format_scorecard_markdown, to_percent, to_signed_percent,
};
use crate::tune::{TuneOptions, tune_thresholds};

#[derive(Parser)]
#[command(
    name = "benchgate",
    version,
    about = "Benchmark harness comparing baseline and augmented agent toolchains"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the benchmark corpus across the configured modes.
    Run(RunArgs),
    /// Compute and persist the scorecard for a finished run.
    Scorecard(ScorecardArgs),
    /// Recommend threshold updates from historical scorecards.
    Tune(TuneArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Run configuration file (default: benchmarks/run-config.json).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Repository root containing fixtures and benchmark files.
    #[arg(long)]
    pub root: Option<PathBuf>,
    /// Override the generated run id.
    #[arg(long)]
    pub run_id: Option<String>,
}

#[derive(Args)]
pub struct ScorecardArgs {
    /// Results document to score (default: the latest run).
    #[arg(long)]
    pub input: Option<PathBuf>,
    /// Results directory holding latest-run.json (default: benchmarks/results).
    #[arg(long)]
    pub results_dir: Option<PathBuf>,
    /// Thresholds file (default: benchmarks/thresholds.json).
    #[arg(long)]
    pub thresholds: Option<PathBuf>,
    /// Exit non-zero when the overall threshold verdict fails.
    #[arg(long)]
    pub enforce_thresholds: bool,
}

#[derive(Args)]
pub struct TuneArgs {
    /// Results directory to scan for scorecards (default: benchmarks/results).
    #[arg(long)]
    pub results_dir: Option<PathBuf>,
    /// Thresholds file to read and optionally update.
    #[arg(long)]
    pub thresholds: Option<PathBuf>,
    /// Persist the recommended thresholds.
    #[arg(long)]
    pub write: bool,
    /// Allow recommendations weaker than the current thresholds.
    #[arg(long)]
    pub allow_loosen: bool,
    /// Only consider the last N scorecards.
    #[arg(long)]
    pub last: Option<usize>,
}

pub fn cmd_run(args: &RunArgs) -> Result<()> {
    let root_dir = resolve_root(args.root.as_deref())?;
    let options = HarnessOptions {
        root_dir,
        config_path: args.config.clone(),
        run_id: args.run_id.clone(),
        runner: &ProcessRunner,
    };
    let result = run_harness(&options)?;

    println!("Run id: {}", result.run_id);
    println!(
        "Total: {} Passed: {} Failed: {}",
        result.summary.total, result.summary.passed, result.summary.failed
    );
    for warning in &result.preflight.warnings {
        println!("Warning: {warning}");
    }
    Ok(())
}

/// Returns the overall threshold verdict so the caller can map it to the
/// process exit code when enforcement is requested.
pub fn cmd_scorecard(args: &ScorecardArgs) -> Result<bool> {
    let root_dir = env::current_dir().context("resolve current directory")?;
    let results_path = resolve_results_path(args, &root_dir)?;
    let run_result: RunResult = read_json_file(&results_path)?;
    let thresholds_path = resolve_against(
        &root_dir,
        args.thresholds.as_deref(),
        Path::new("benchmarks/thresholds.json"),
    );
    let thresholds = load_thresholds(&thresholds_path)?;

    let report = ScorecardReport {
        run_id: run_result.run_id.clone(),
        created_at: Utc::now().to_rfc3339(),
        preflight: Some(run_result.preflight.clone()),
        scorecard: compute_scorecard(&run_result, &thresholds),
    };

    let run_dir = results_path
        .parent()
        .with_context(|| format!("resolve run dir of {}", results_path.display()))?;
    let results_dir = run_dir
        .parent()
        .with_context(|| format!("resolve results dir of {}", run_dir.display()))?;
    ensure_dir(results_dir)?;
    write_json_stable(&run_dir.join("scorecard.json"), &report)?;
    write_json_stable(&results_dir.join("latest-scorecard.json"), &report)?;
    let markdown_path = results_dir.join("latest.md");
    fs::write(&markdown_path, format_scorecard_markdown(&report))
        .with_context(|| format!("write {}", markdown_path.display()))?;

    println!("Run id: {}", report.run_id);
    println!(
        "Success delta: {}",
        to_percent(report.scorecard.success_rate_delta)
    );
    println!(
        "Median time delta: {}",
        to_signed_percent(report.scorecard.median_time_delta_pct)
    );
    println!(
        "Regression rate: {}",
        to_percent(report.scorecard.regression_rate)
    );
    let overall = report.scorecard.thresholds_met.overall;
    println!(
        "Overall thresholds: {}",
        if overall { "pass" } else { "fail" }
    );
    Ok(overall)
}

pub fn cmd_tune(args: &TuneArgs) -> Result<()> {
    let root_dir = env::current_dir().context("resolve current directory")?;
    let options = TuneOptions {
        results_dir: resolve_against(
            &root_dir,
            args.results_dir.as_deref(),
            Path::new("benchmarks/results"),
        ),
        thresholds_path: resolve_against(
            &root_dir,
            args.thresholds.as_deref(),
            Path::new("benchmarks/thresholds.json"),
        ),
        write: args.write,
        allow_loosen: args.allow_loosen,
        last: args.last,
    };
    let tuned = tune_thresholds(&options)?;

    println!("Runs analyzed: {}", tuned.based_on_runs);
    for warning in &tuned.warnings {
        println!("Warning: {warning}");
    }
    println!(
        "Current success_rate_delta_min: {}",
        tuned.current.success_rate_delta_min
    );
    println!(
        "Current median_time_delta_pct_max: {}",
        tuned.current.median_time_delta_pct_max
    );
    println!(
        "Current regression_rate_max: {}",
        tuned.current.regression_rate_max
    );
    println!(
        "Recommended success_rate_delta_min: {}",
        tuned.recommended.success_rate_delta_min
    );
    println!(
        "Recommended median_time_delta_pct_max: {}",
        tuned.recommended.median_time_delta_pct_max
    );
    println!(
        "Recommended regression_rate_max: {}",
        tuned.recommended.regression_rate_max
    );
    if args.write {
        println!("Thresholds updated.");
    } else {
        println!("Dry run only. Use --write to persist.");
    }
    Ok(())
}

fn resolve_root(root: Option<&Path>) -> Result<PathBuf> {
    match root {
        Some(path) => Ok(path.to_path_buf()),
        None => env::current_dir().context("resolve current directory"),
    }
}

fn resolve_against(root_dir: &Path, explicit: Option<&Path>, default: &Path) -> PathBuf {
    let path = explicit.unwrap_or(default);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root_dir.join(path)
    }
}

/// Explicit `--input` wins; otherwise follow the latest-run pointer in the
/// results directory.
fn resolve_results_path(args: &ScorecardArgs, root_dir: &Path) -> Result<PathBuf> {
    if let Some(input) = &args.input {
        return Ok(if input.is_absolute() {
            input.clone()
        } else {
            root_dir.join(input)
        });
    }

    let results_dir = resolve_against(
        root_dir,
        args.results_dir.as_deref(),
        Path::new("benchmarks/results"),
    );
    let latest_run_path = results_dir.join("latest-run.json");
    let latest: LatestRunPointer = read_json_file(&latest_run_path)?;
    if latest.results_path.trim().is_empty() {
        bail!("Invalid latest-run metadata at {}.", latest_run_path.display());
    }
    Ok(PathBuf::from(latest.results_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_against_prefers_explicit_absolute() {
        let root = Path::new("/repo");
        let explicit = Path::new("/elsewhere/thresholds.json");
        assert_eq!(
            resolve_against(root, Some(explicit), Path::new("benchmarks/thresholds.json")),
            PathBuf::from("/elsewhere/thresholds.json")
        );
    }

    #[test]
    fn resolve_against_joins_relative_to_root() {
        let root = Path::new("/repo");
        assert_eq!(
            resolve_against(root, None, Path::new("benchmarks/results")),
            PathBuf::from("/repo/benchmarks/results")
        );
        assert_eq!(
            resolve_against(root, Some(Path::new("custom/results")), Path::new("x")),
            PathBuf::from("/repo/custom/results")
        );
    }
}
