//! Aggregate comparison statistics over a finished run.
//!
//! `compute_scorecard` is a pure function of a run result and a thresholds
//! object. All persistence and path resolution lives in the CLI layer so the
//! statistics stay trivially testable.

use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::results::{Preflight, RunResult, TaskRunResult};
use crate::stats::median;
use crate::task::{ByMode, Mode};

/// One boolean verdict per gate plus their conjunction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdVerdicts {
    pub success_rate_delta: bool,
    pub median_time_delta: bool,
    pub regression_rate: bool,
    pub overall: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub success_rate: ByMode<f64>,
    pub success_rate_delta: f64,
    pub median_duration_ms: ByMode<f64>,
    pub median_time_delta_pct: f64,
    pub regression_rate: f64,
    pub paired_tasks: usize,
    pub thresholds: Thresholds,
    pub thresholds_met: ThresholdVerdicts,
}

/// The persisted per-run scorecard artifact. Derived, never a source of
/// truth: always recomputable from the RunResult and a Thresholds object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorecardReport {
    pub run_id: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preflight: Option<Preflight>,
    pub scorecard: Scorecard,
}

#[derive(Debug, Default)]
struct ModeStats {
    total: usize,
    passed: usize,
    durations: Vec<f64>,
}

impl ModeStats {
    fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }
}

pub fn compute_scorecard(run_result: &RunResult, thresholds: &Thresholds) -> Scorecard {
    let mut stats: ByMode<ModeStats> = ByMode::default();
    for result in &run_result.results {
        let bucket = stats.get_mut(result.mode);
        bucket.total += 1;
        if result.pass {
            bucket.passed += 1;
        }
        bucket.durations.push(result.duration_ms as f64);
    }

    let success_rate = ByMode {
        baseline: stats.baseline.success_rate(),
        augmented: stats.augmented.success_rate(),
    };
    let median_duration_ms = ByMode {
        baseline: median(&stats.baseline.durations),
        augmented: median(&stats.augmented.durations),
    };

    let paired = collect_paired_results(&run_result.results);
    let paired_tasks = paired.len();
    let regression_count = paired
        .iter()
        .filter(|(baseline, augmented)| baseline.pass && !augmented.pass)
        .count();

    let success_rate_delta = success_rate.augmented - success_rate.baseline;
    let median_time_delta_pct = if median_duration_ms.baseline > 0.0 {
        (median_duration_ms.augmented - median_duration_ms.baseline) / median_duration_ms.baseline
            * 100.0
    } else {
        0.0
    };
    let regression_rate = if paired_tasks > 0 {
        regression_count as f64 / paired_tasks as f64
    } else {
        0.0
    };

    let success_met = success_rate_delta >= thresholds.success_rate_delta_min;
    let median_met = median_time_delta_pct <= thresholds.median_time_delta_pct_max;
    let regression_met = regression_rate <= thresholds.regression_rate_max;
    let thresholds_met = ThresholdVerdicts {
        success_rate_delta: success_met,
        median_time_delta: median_met,
        regression_rate: regression_met,
        overall: success_met && median_met && regression_met,
    };

    Scorecard {
        success_rate,
        success_rate_delta,
        median_duration_ms,
        median_time_delta_pct,
        regression_rate,
        paired_tasks,
        thresholds: *thresholds,
        thresholds_met,
    }
}

/// Tasks with a result in both modes, as (baseline, augmented) pairs.
fn collect_paired_results(
    results: &[TaskRunResult],
) -> Vec<(&TaskRunResult, &TaskRunResult)> {
    let mut by_task: Vec<(&str, ByMode<Option<&TaskRunResult>>)> = Vec::new();
    for result in results {
        match by_task.iter_mut().find(|(id, _)| *id == result.task_id) {
            Some((_, modes)) => *modes.get_mut(result.mode) = Some(result),
            None => {
                let mut modes: ByMode<Option<&TaskRunResult>> = ByMode::default();
                *modes.get_mut(result.mode) = Some(result);
                by_task.push((&result.task_id, modes));
            }
        }
    }

    by_task
        .into_iter()
        .filter_map(|(_, modes)| Some((modes.baseline?, modes.augmented?)))
        .collect()
}

pub fn to_percent(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

pub fn to_signed_percent(value: f64) -> String {
    let sign = if value > 0.0 { "+" } else { "" };
    format!("{sign}{value:.2}%")
}

/// Human-readable summary placed next to the JSON artifacts.
pub fn format_scorecard_markdown(report: &ScorecardReport) -> String {
    let score = &report.scorecard;
    let success_threshold = to_percent(score.thresholds.success_rate_delta_min);
    let median_threshold = format!("{:.2}%", score.thresholds.median_time_delta_pct_max);
    let regression_threshold = to_percent(score.thresholds.regression_rate_max);

    let mut lines = vec![
        "# Benchmark Scorecard".to_string(),
        String::new(),
        format!("Run id: `{}`", report.run_id),
        format!("Generated: {}", report.created_at),
        String::new(),
        "| Metric | Value | Threshold | Pass |".to_string(),
        "|---|---:|---:|:---:|".to_string(),
        format!(
            "| Success rate ({}) | {} | - | - |",
            Mode::Baseline,
            to_percent(score.success_rate.baseline)
        ),
        format!(
            "| Success rate ({}) | {} | - | - |",
            Mode::Augmented,
            to_percent(score.success_rate.augmented)
        ),
        format!(
            "| Success rate delta | {} | >= {} | {} |",
            to_percent(score.success_rate_delta),
            success_threshold,
            yes_no(score.thresholds_met.success_rate_delta)
        ),
        format!(
            "| Median duration ({}) | {:.0} ms | - | - |",
            Mode::Baseline,
            score.median_duration_ms.baseline
        ),
        format!(
            "| Median duration ({}) | {:.0} ms | - | - |",
            Mode::Augmented,
            score.median_duration_ms.augmented
        ),
        format!(
            "| Median time delta | {} | <= {} | {} |",
            to_signed_percent(score.median_time_delta_pct),
            median_threshold,
            yes_no(score.thresholds_met.median_time_delta)
        ),
        format!(
            "| Regression rate | {} | <= {} | {} |",
            to_percent(score.regression_rate),
            regression_threshold,
            yes_no(score.thresholds_met.regression_rate)
        ),
        format!("| Paired tasks | {} | - | - |", score.paired_tasks),
        String::new(),
        format!(
            "Overall: **{}**",
            if score.thresholds_met.overall { "PASS" } else { "FAIL" }
        ),
    ];

    if let Some(preflight) = &report.preflight {
        lines.push(String::new());
        lines.push(format!("Preflight agent_cli: `{}`", preflight.agent_cli.as_str()));
        for warning in &preflight.warnings {
            lines.push(format!("- Warning: {warning}"));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{Artifacts, Preflight, RunSummary, ToolchainStatus, build_summary};

    fn run_entry(task_id: &str, mode: Mode, pass: bool, duration_ms: u64) -> TaskRunResult {
        TaskRunResult {
            task_id: task_id.to_string(),
            mode,
            started_at: "2026-08-28T00:00:00Z".to_string(),
            ended_at: "2026-08-28T00:00:01Z".to_string(),
            duration_ms,
            exit_code: Some(if pass { 0 } else { 1 }),
            pass,
            verification_pass: pass,
            artifacts: Artifacts {
                logs_path: format!("artifacts/{task_id}/{mode}/run.log"),
            },
            error_class: None,
            command: vec!["tool".to_string()],
        }
    }

    fn run_result(results: Vec<TaskRunResult>) -> RunResult {
        let summary: RunSummary = build_summary(&results);
        RunResult {
            run_id: "run-test".to_string(),
            seed: "seed".to_string(),
            started_at: "2026-08-28T00:00:00Z".to_string(),
            ended_at: "2026-08-28T00:01:00Z".to_string(),
            preflight: Preflight {
                agent_cli: ToolchainStatus::NotRequired,
                warnings: Vec::new(),
            },
            results,
            summary,
        }
    }

    #[test]
    fn worked_example_matches_expected_statistics() {
        // t1 passes in both modes, t2 regresses under augmented.
        let run = run_result(vec![
            run_entry("t1", Mode::Baseline, true, 1000),
            run_entry("t1", Mode::Augmented, true, 700),
            run_entry("t2", Mode::Baseline, true, 1000),
            run_entry("t2", Mode::Augmented, false, 1300),
        ]);
        let score = compute_scorecard(&run, &Thresholds::default());

        assert_eq!(score.success_rate.baseline, 1.0);
        assert_eq!(score.success_rate.augmented, 0.5);
        assert_eq!(score.success_rate_delta, -0.5);
        assert_eq!(score.median_duration_ms.baseline, 1000.0);
        assert_eq!(score.median_duration_ms.augmented, 1000.0);
        assert_eq!(score.median_time_delta_pct, 0.0);
        assert_eq!(score.paired_tasks, 2);
        assert_eq!(score.regression_rate, 0.5);
        assert!(!score.thresholds_met.success_rate_delta);
        assert!(!score.thresholds_met.median_time_delta);
        assert!(!score.thresholds_met.regression_rate);
        assert!(!score.thresholds_met.overall);
    }

    #[test]
    fn regression_counts_only_pass_to_fail_pairs() {
        let run = run_result(vec![
            run_entry("a", Mode::Baseline, true, 100),
            run_entry("a", Mode::Augmented, true, 100),
            run_entry("b", Mode::Baseline, true, 100),
            run_entry("b", Mode::Augmented, false, 100),
            run_entry("c", Mode::Baseline, false, 100),
            run_entry("c", Mode::Augmented, true, 100),
        ]);
        let score = compute_scorecard(&run, &Thresholds::default());
        assert_eq!(score.paired_tasks, 3);
        assert!((score.regression_rate - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn unpaired_tasks_do_not_enter_regression_rate() {
        let run = run_result(vec![
            run_entry("a", Mode::Baseline, true, 100),
            run_entry("b", Mode::Augmented, true, 100),
        ]);
        let score = compute_scorecard(&run, &Thresholds::default());
        assert_eq!(score.paired_tasks, 0);
        assert_eq!(score.regression_rate, 0.0);
    }

    #[test]
    fn empty_run_yields_zero_rates() {
        let score = compute_scorecard(&run_result(Vec::new()), &Thresholds::default());
        assert_eq!(score.success_rate.baseline, 0.0);
        assert_eq!(score.success_rate.augmented, 0.0);
        assert_eq!(score.median_duration_ms.baseline, 0.0);
        assert_eq!(score.median_time_delta_pct, 0.0);
    }

    #[test]
    fn passing_thresholds_produce_overall_pass() {
        // Augmented passes everything and is faster.
        let run = run_result(vec![
            run_entry("a", Mode::Baseline, false, 1000),
            run_entry("a", Mode::Augmented, true, 500),
            run_entry("b", Mode::Baseline, true, 1000),
            run_entry("b", Mode::Augmented, true, 600),
        ]);
        let score = compute_scorecard(&run, &Thresholds::default());
        assert_eq!(score.success_rate_delta, 0.5);
        assert_eq!(score.median_time_delta_pct, -45.0);
        assert_eq!(score.regression_rate, 0.0);
        assert!(score.thresholds_met.overall);
    }

    #[test]
    fn markdown_report_carries_verdict_and_warnings() {
        let run = run_result(vec![
            run_entry("a", Mode::Baseline, true, 1000),
            run_entry("a", Mode::Augmented, true, 500),
        ]);
        let report = ScorecardReport {
            run_id: run.run_id.clone(),
            created_at: "2026-08-28T00:02:00Z".to_string(),
            preflight: Some(Preflight {
                agent_cli: ToolchainStatus::Missing,
                warnings: vec!["agent CLI missing".to_string()],
            }),
            scorecard: compute_scorecard(&run, &Thresholds::default()),
        };
        let markdown = format_scorecard_markdown(&report);
        assert!(markdown.contains("# Benchmark Scorecard"));
        assert!(markdown.contains("Run id: `run-test`"));
        assert!(markdown.contains("| Median time delta | -50.00% |"));
        assert!(markdown.contains("- Warning: agent CLI missing"));
        assert!(markdown.ends_with('\n'));
    }

    #[test]
    fn percent_formatting() {
        assert_eq!(to_percent(0.5), "50.00%");
        assert_eq!(to_signed_percent(12.5), "+12.50%");
        assert_eq!(to_signed_percent(-25.0), "-25.00%");
    }
}
