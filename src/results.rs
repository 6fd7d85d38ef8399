//! Persisted run records.
//!
//! `TaskRunResult` is created once per job and immutable after the job
//! completes; `RunResult` is the run's canonical artifact. All of these
//! round-trip through JSON so the scorecard engine can recompute from disk.

use serde::{Deserialize, Serialize};

use crate::task::{ByMode, Mode};

/// Mutually exclusive failure taxonomy, stamped exactly once per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    CliError,
    VerifyFail,
    InfraError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    pub logs_path: String,
}

/// The per-job record, written to disk exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunResult {
    pub task_id: String,
    pub mode: Mode,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub pass: bool,
    pub verification_pass: bool,
    pub artifacts: Artifacts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeTally {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub by_mode: ByMode<ModeTally>,
}

/// Availability of the external agent CLI, probed once before any job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolchainStatus {
    Available,
    Missing,
    NotRequired,
}

impl ToolchainStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolchainStatus::Available => "available",
            ToolchainStatus::Missing => "missing",
            ToolchainStatus::NotRequired => "not_required",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preflight {
    pub agent_cli: ToolchainStatus,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub seed: String,
    pub started_at: String,
    pub ended_at: String,
    pub preflight: Preflight,
    pub results: Vec<TaskRunResult>,
    pub summary: RunSummary,
}

/// Pointer to the most recent run, kept at the results root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestRunPointer {
    pub run_id: String,
    pub results_path: String,
    pub updated_at: String,
}

/// Deterministic ordering: (task id, mode name). Arrival order under
/// concurrency is meaningless; callers must only rely on this sort.
pub fn sort_results(results: &mut [TaskRunResult]) {
    results.sort_by(|left, right| {
        left.task_id
            .cmp(&right.task_id)
            .then_with(|| left.mode.as_str().cmp(right.mode.as_str()))
    });
}

pub fn build_summary(results: &[TaskRunResult]) -> RunSummary {
    let mut by_mode = ByMode::<ModeTally>::default();
    for result in results {
        let tally = by_mode.get_mut(result.mode);
        tally.total += 1;
        if result.pass {
            tally.passed += 1;
        } else {
            tally.failed += 1;
        }
    }

    let total = results.len();
    let passed = results.iter().filter(|result| result.pass).count();
    RunSummary {
        total,
        passed,
        failed: total - passed,
        by_mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(task_id: &str, mode: Mode, pass: bool, duration_ms: u64) -> TaskRunResult {
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
            error_class: if pass { None } else { Some(ErrorClass::CliError) },
            command: vec!["echo".to_string()],
        }
    }

    #[test]
    fn sorts_by_task_id_then_mode_name() {
        let mut results = vec![
            result("t2", Mode::Baseline, true, 1),
            result("t1", Mode::Baseline, true, 1),
            result("t1", Mode::Augmented, true, 1),
        ];
        sort_results(&mut results);
        let order: Vec<(String, Mode)> = results
            .iter()
            .map(|r| (r.task_id.clone(), r.mode))
            .collect();
        assert_eq!(
            order,
            vec![
                ("t1".to_string(), Mode::Augmented),
                ("t1".to_string(), Mode::Baseline),
                ("t2".to_string(), Mode::Baseline),
            ]
        );
    }

    #[test]
    fn summary_tallies_per_mode() {
        let results = vec![
            result("t1", Mode::Baseline, true, 1),
            result("t1", Mode::Augmented, false, 1),
            result("t2", Mode::Baseline, true, 1),
        ];
        let summary = build_summary(&results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.by_mode.baseline.passed, 2);
        assert_eq!(summary.by_mode.augmented.failed, 1);
    }

    #[test]
    fn summaries_with_identical_tallies_compare_equal() {
        fn assert_full_eq<T: Eq>(left: &T, right: &T) -> bool {
            left == right
        }

        let results = vec![
            result("t1", Mode::Baseline, true, 1),
            result("t1", Mode::Augmented, false, 1),
        ];
        assert!(assert_full_eq(
            &build_summary(&results),
            &build_summary(&results)
        ));
    }

    #[test]
    fn error_class_is_omitted_on_success() {
        let passed = result("t1", Mode::Baseline, true, 1);
        let rendered = serde_json::to_string(&passed).expect("json");
        assert!(!rendered.contains("error_class"));

        let failed = result("t1", Mode::Baseline, false, 1);
        let rendered = serde_json::to_string(&failed).expect("json");
        assert!(rendered.contains("\"error_class\":\"cli_error\""));
    }
}
