//! Threshold tuning from historical scorecards.
//!
//! Proposes new gates from the quantiles of observed metrics across past
//! runs. Below three historical runs the tuner refuses to guess and returns
//! the current thresholds with a warning. Unless loosening is explicitly
//! allowed, proposals are clamped so the minimum only rises and the maxima
//! only fall.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument};

use crate::config::{Thresholds, load_thresholds};
use crate::io::write_json_stable;
use crate::scorecard::ScorecardReport;
use crate::stats::{quantile, round_to};

pub struct TuneOptions {
    pub results_dir: PathBuf,
    pub thresholds_path: PathBuf,
    pub write: bool,
    pub allow_loosen: bool,
    pub last: Option<usize>,
}

#[derive(Debug, PartialEq)]
pub struct TuneOutcome {
    pub recommended: Thresholds,
    pub current: Thresholds,
    pub based_on_runs: usize,
    pub warnings: Vec<String>,
}

#[instrument(skip_all, fields(results_dir = %options.results_dir.display()))]
pub fn tune_thresholds(options: &TuneOptions) -> Result<TuneOutcome> {
    let current = load_thresholds(&options.thresholds_path)?;
    let reports = load_scorecard_reports(&options.results_dir)?;
    if reports.is_empty() {
        bail!("Need at least 1 benchmark scorecard to tune thresholds (found 0).");
    }

    let mut warnings = Vec::new();
    let low_confidence = reports.len() < 3;
    if low_confidence {
        warnings.push(format!(
            "Only {} scorecard run(s) found. Threshold recommendations are \
             low-confidence until at least 3 runs exist.",
            reports.len()
        ));
    }

    let limited: &[ScorecardReport] = match options.last {
        Some(last) if last > 0 && last < reports.len() => &reports[reports.len() - last..],
        _ => &reports,
    };

    let proposed = if low_confidence {
        current
    } else {
        let success_deltas: Vec<f64> = limited
            .iter()
            .map(|report| report.scorecard.success_rate_delta)
            .collect();
        let time_deltas: Vec<f64> = limited
            .iter()
            .map(|report| report.scorecard.median_time_delta_pct)
            .collect();
        let regression_rates: Vec<f64> = limited
            .iter()
            .map(|report| report.scorecard.regression_rate)
            .collect();
        Thresholds {
            success_rate_delta_min: round_to(quantile(&success_deltas, 0.25), 4),
            median_time_delta_pct_max: round_to(quantile(&time_deltas, 0.75), 2),
            regression_rate_max: round_to(quantile(&regression_rates, 0.75), 4),
        }
    };

    let recommended = if options.allow_loosen {
        proposed
    } else {
        clamp_against_current(&current, &proposed)
    };

    if options.write {
        write_json_stable(&options.thresholds_path, &recommended)?;
        debug!(path = %options.thresholds_path.display(), "thresholds written");
    }

    Ok(TuneOutcome {
        recommended,
        current,
        based_on_runs: limited.len(),
        warnings,
    })
}

/// The minimum can only increase, the two maxima can only decrease.
fn clamp_against_current(current: &Thresholds, proposed: &Thresholds) -> Thresholds {
    Thresholds {
        success_rate_delta_min: current
            .success_rate_delta_min
            .max(proposed.success_rate_delta_min),
        median_time_delta_pct_max: current
            .median_time_delta_pct_max
            .min(proposed.median_time_delta_pct_max),
        regression_rate_max: current.regression_rate_max.min(proposed.regression_rate_max),
    }
}

/// Scorecards from every run directory, in lexicographic run-id order. Run
/// directories without a scorecard are skipped: partial or failed runs must
/// not poison tuning.
fn load_scorecard_reports(results_dir: &Path) -> Result<Vec<ScorecardReport>> {
    let mut run_dirs = Vec::new();
    for entry in fs::read_dir(results_dir)
        .with_context(|| format!("read results dir {}", results_dir.display()))?
    {
        let path = entry.context("read results dir entry")?.path();
        if path.is_dir() {
            run_dirs.push(path);
        }
    }
    run_dirs.sort();

    let mut reports = Vec::new();
    for run_dir in run_dirs {
        let scorecard_path = run_dir.join("scorecard.json");
        if !scorecard_path.is_file() {
            debug!(run_dir = %run_dir.display(), "no scorecard, skipping");
            continue;
        }
        match crate::io::read_json_file::<ScorecardReport>(&scorecard_path) {
            Ok(report) => reports.push(report),
            Err(err) => {
                debug!(path = %scorecard_path.display(), error = %err, "unreadable scorecard, skipping");
            }
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::scorecard::{Scorecard, ThresholdVerdicts};
    use crate::task::ByMode;

    fn report(success_delta: f64, time_delta: f64, regression: f64) -> ScorecardReport {
        ScorecardReport {
            run_id: "run".to_string(),
            created_at: "2026-08-28T00:00:00Z".to_string(),
            preflight: None,
            scorecard: Scorecard {
                success_rate: ByMode {
                    baseline: 0.5,
                    augmented: 0.5 + success_delta,
                },
                success_rate_delta: success_delta,
                median_duration_ms: ByMode {
                    baseline: 1000.0,
                    augmented: 1000.0 + 10.0 * time_delta,
                },
                median_time_delta_pct: time_delta,
                regression_rate: regression,
                paired_tasks: 4,
                thresholds: Thresholds::default(),
                thresholds_met: ThresholdVerdicts {
                    success_rate_delta: false,
                    median_time_delta: false,
                    regression_rate: false,
                    overall: false,
                },
            },
        }
    }

    fn write_run(results_dir: &Path, name: &str, report: Option<&ScorecardReport>) {
        let run_dir = results_dir.join(name);
        fs::create_dir_all(&run_dir).expect("run dir");
        if let Some(report) = report {
            write_json_stable(&run_dir.join("scorecard.json"), report).expect("scorecard");
        }
    }

    fn setup(thresholds: &Thresholds) -> (tempfile::TempDir, TuneOptions) {
        let temp = tempdir().expect("tempdir");
        let results_dir = temp.path().join("results");
        fs::create_dir_all(&results_dir).expect("results dir");
        let thresholds_path = temp.path().join("thresholds.json");
        write_json_stable(&thresholds_path, thresholds).expect("thresholds");
        let options = TuneOptions {
            results_dir,
            thresholds_path,
            write: false,
            allow_loosen: false,
            last: None,
        };
        (temp, options)
    }

    #[test]
    fn errors_with_no_scorecards() {
        let (_temp, options) = setup(&Thresholds::default());
        let err = tune_thresholds(&options).expect_err("no scorecards");
        assert!(err.to_string().contains("found 0"));
    }

    #[test]
    fn two_runs_is_low_confidence() {
        let (_temp, options) = setup(&Thresholds::default());
        write_run(&options.results_dir, "run-a", Some(&report(0.1, -10.0, 0.0)));
        write_run(&options.results_dir, "run-b", Some(&report(0.2, -20.0, 0.0)));

        let outcome = tune_thresholds(&options).expect("tune");
        assert_eq!(outcome.recommended, outcome.current);
        assert_eq!(outcome.based_on_runs, 2);
        assert!(!outcome.warnings.is_empty());
        assert!(outcome.warnings[0].contains("low-confidence"));
    }

    #[test]
    fn three_runs_recommend_clamped_quantiles() {
        let current = Thresholds {
            success_rate_delta_min: 0.15,
            median_time_delta_pct_max: -25.0,
            regression_rate_max: 0.05,
        };
        let (_temp, options) = setup(&current);
        write_run(&options.results_dir, "run-a", Some(&report(0.2, -40.0, 0.0)));
        write_run(&options.results_dir, "run-b", Some(&report(0.3, -35.0, 0.0)));
        write_run(&options.results_dir, "run-c", Some(&report(0.4, -30.0, 0.0)));

        let outcome = tune_thresholds(&options).expect("tune");
        assert_eq!(outcome.based_on_runs, 3);
        assert!(outcome.warnings.is_empty());
        // p25 of deltas = 0.25, above the current minimum.
        assert_eq!(outcome.recommended.success_rate_delta_min, 0.25);
        // p75 of time deltas = -32.5, below the current maximum.
        assert_eq!(outcome.recommended.median_time_delta_pct_max, -32.5);
        assert_eq!(outcome.recommended.regression_rate_max, 0.0);
    }

    #[test]
    fn clamp_refuses_to_loosen_by_default() {
        let current = Thresholds {
            success_rate_delta_min: 0.5,
            median_time_delta_pct_max: -50.0,
            regression_rate_max: 0.01,
        };
        let (_temp, options) = setup(&current);
        write_run(&options.results_dir, "run-a", Some(&report(0.1, -10.0, 0.2)));
        write_run(&options.results_dir, "run-b", Some(&report(0.1, -10.0, 0.2)));
        write_run(&options.results_dir, "run-c", Some(&report(0.1, -10.0, 0.2)));

        let outcome = tune_thresholds(&options).expect("tune");
        assert_eq!(outcome.recommended, current);
    }

    #[test]
    fn allow_loosen_accepts_weaker_proposal() {
        let current = Thresholds {
            success_rate_delta_min: 0.5,
            median_time_delta_pct_max: -50.0,
            regression_rate_max: 0.01,
        };
        let (_temp, mut options) = setup(&current);
        options.allow_loosen = true;
        write_run(&options.results_dir, "run-a", Some(&report(0.1, -10.0, 0.2)));
        write_run(&options.results_dir, "run-b", Some(&report(0.1, -10.0, 0.2)));
        write_run(&options.results_dir, "run-c", Some(&report(0.1, -10.0, 0.2)));

        let outcome = tune_thresholds(&options).expect("tune");
        assert_eq!(outcome.recommended.success_rate_delta_min, 0.1);
        assert_eq!(outcome.recommended.median_time_delta_pct_max, -10.0);
        assert_eq!(outcome.recommended.regression_rate_max, 0.2);
    }

    #[test]
    fn skips_run_dirs_without_scorecards() {
        let (_temp, options) = setup(&Thresholds::default());
        write_run(&options.results_dir, "run-a", Some(&report(0.2, -30.0, 0.0)));
        write_run(&options.results_dir, "run-partial", None);
        write_run(&options.results_dir, "run-b", Some(&report(0.2, -30.0, 0.0)));

        let outcome = tune_thresholds(&options).expect("tune");
        assert_eq!(outcome.based_on_runs, 2);
        assert!(!outcome.warnings.is_empty());
    }

    #[test]
    fn skips_corrupt_scorecards_without_failing() {
        let (_temp, options) = setup(&Thresholds::default());
        write_run(&options.results_dir, "run-a", Some(&report(0.2, -30.0, 0.0)));
        write_run(&options.results_dir, "run-b", Some(&report(0.2, -30.0, 0.0)));
        write_run(&options.results_dir, "run-c", Some(&report(0.2, -30.0, 0.0)));
        write_run(&options.results_dir, "run-crashed", None);
        fs::write(
            options.results_dir.join("run-crashed/scorecard.json"),
            "{ \"run_id\": ",
        )
        .expect("truncated scorecard");

        let outcome = tune_thresholds(&options).expect("tune");
        assert_eq!(outcome.based_on_runs, 3);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn last_n_restricts_the_window_after_confidence_check() {
        let (_temp, mut options) = setup(&Thresholds::default());
        options.last = Some(2);
        options.allow_loosen = true;
        write_run(&options.results_dir, "run-a", Some(&report(0.9, -90.0, 0.0)));
        write_run(&options.results_dir, "run-b", Some(&report(0.2, -30.0, 0.1)));
        write_run(&options.results_dir, "run-c", Some(&report(0.2, -30.0, 0.1)));

        let outcome = tune_thresholds(&options).expect("tune");
        // Confidence counts all three runs; quantiles only the last two.
        assert_eq!(outcome.based_on_runs, 2);
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.recommended.success_rate_delta_min, 0.2);
        assert_eq!(outcome.recommended.median_time_delta_pct_max, -30.0);
        assert_eq!(outcome.recommended.regression_rate_max, 0.1);
    }

    #[test]
    fn write_persists_recommended_thresholds() {
        let (_temp, mut options) = setup(&Thresholds::default());
        options.write = true;
        options.allow_loosen = true;
        write_run(&options.results_dir, "run-a", Some(&report(0.3, -40.0, 0.0)));
        write_run(&options.results_dir, "run-b", Some(&report(0.3, -40.0, 0.0)));
        write_run(&options.results_dir, "run-c", Some(&report(0.3, -40.0, 0.0)));

        let outcome = tune_thresholds(&options).expect("tune");
        let persisted = load_thresholds(&options.thresholds_path).expect("reload");
        assert_eq!(persisted, outcome.recommended);
    }
}
