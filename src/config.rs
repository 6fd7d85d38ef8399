//! Run configuration and threshold files.
//!
//! Both are JSON objects validated with the same accumulate-all-errors
//! discipline as task files; a bad config is fatal before any job executes.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::io::read_json_file;
use crate::task::{Mode, boolean, non_empty_string, positive_integer};

/// Process-wide input for one benchmark invocation. Loaded once, never
/// mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub seed: String,
    pub max_parallel: usize,
    pub modes: Vec<Mode>,
    pub task_glob: String,
    pub output_dir: String,
    pub fail_fast: bool,
}

#[derive(Debug)]
pub struct ConfigValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub config: Option<RunConfig>,
}

pub fn validate_run_config(value: &Value) -> ConfigValidation {
    let Some(object) = value.as_object() else {
        return ConfigValidation {
            valid: false,
            errors: vec!["Run config must be an object.".to_string()],
            config: None,
        };
    };

    let mut errors = Vec::new();
    let seed = non_empty_string(object.get("seed"), "seed", &mut errors);
    let task_glob = non_empty_string(object.get("task_glob"), "task_glob", &mut errors);
    let output_dir = non_empty_string(object.get("output_dir"), "output_dir", &mut errors);
    let max_parallel = positive_integer(object.get("max_parallel"), "max_parallel", &mut errors);
    let fail_fast = boolean(object.get("fail_fast"), "fail_fast", &mut errors);

    let mut modes: Vec<Mode> = Vec::new();
    match object.get("modes").and_then(Value::as_array) {
        Some(entries) if !entries.is_empty() => {
            for entry in entries {
                let Some(mode) = entry.as_str().and_then(Mode::parse) else {
                    errors.push(format!("Unsupported mode \"{entry}\"."));
                    continue;
                };
                if !modes.contains(&mode) {
                    modes.push(mode);
                }
            }
        }
        _ => errors.push("modes must be a non-empty array.".to_string()),
    }

    if !errors.is_empty() {
        return ConfigValidation {
            valid: false,
            errors,
            config: None,
        };
    }

    let config = match (seed, task_glob, output_dir, max_parallel, fail_fast) {
        (Some(seed), Some(task_glob), Some(output_dir), Some(max_parallel), Some(fail_fast)) => {
            Some(RunConfig {
                seed,
                max_parallel: max_parallel as usize,
                modes,
                task_glob,
                output_dir,
                fail_fast,
            })
        }
        _ => None,
    };

    ConfigValidation {
        valid: config.is_some(),
        errors,
        config,
    }
}

pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let raw: Value = read_json_file(path)?;
    let validation = validate_run_config(&raw);
    match validation.config {
        Some(config) => Ok(config),
        None => bail!(
            "Invalid run config at {}: {}",
            path.display(),
            validation.errors.join(" ")
        ),
    }
}

/// The three numeric gates a scorecard is judged against. Mutated only by
/// the tuner or an explicit operator edit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum acceptable success-rate delta (augmented minus baseline).
    pub success_rate_delta_min: f64,
    /// Maximum acceptable median-time delta percent; negative means the
    /// augmented mode must be faster.
    pub median_time_delta_pct_max: f64,
    /// Maximum acceptable pass-to-fail regression rate over paired tasks.
    pub regression_rate_max: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            success_rate_delta_min: 0.15,
            median_time_delta_pct_max: -25.0,
            regression_rate_max: 0.05,
        }
    }
}

#[derive(Debug)]
pub struct ThresholdsValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub thresholds: Option<Thresholds>,
}

pub fn validate_thresholds(value: &Value) -> ThresholdsValidation {
    let Some(object) = value.as_object() else {
        return ThresholdsValidation {
            valid: false,
            errors: vec!["Thresholds must be an object.".to_string()],
            thresholds: None,
        };
    };

    let mut errors = Vec::new();
    let success = finite_number(object.get("success_rate_delta_min"), "success_rate_delta_min", &mut errors);
    let median = finite_number(
        object.get("median_time_delta_pct_max"),
        "median_time_delta_pct_max",
        &mut errors,
    );
    let regression =
        finite_number(object.get("regression_rate_max"), "regression_rate_max", &mut errors);

    let thresholds = match (success, median, regression) {
        (Some(success), Some(median), Some(regression)) => Some(Thresholds {
            success_rate_delta_min: success,
            median_time_delta_pct_max: median,
            regression_rate_max: regression,
        }),
        _ => None,
    };

    ThresholdsValidation {
        valid: thresholds.is_some(),
        errors,
        thresholds,
    }
}

pub fn load_thresholds(path: &Path) -> Result<Thresholds> {
    let raw: Value = read_json_file(path)
        .with_context(|| format!("load thresholds from {}", path.display()))?;
    let validation = validate_thresholds(&raw);
    match validation.thresholds {
        Some(thresholds) => Ok(thresholds),
        None => bail!(
            "Invalid thresholds at {}: {}",
            path.display(),
            validation.errors.join(" ")
        ),
    }
}

fn finite_number(value: Option<&Value>, field: &str, errors: &mut Vec<String>) -> Option<f64> {
    match value.and_then(Value::as_f64) {
        Some(parsed) if parsed.is_finite() => Some(parsed),
        _ => {
            errors.push(format!("{field} must be a finite number."));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_valid_config_and_dedupes_modes() {
        let raw = json!({
            "seed": "nightly",
            "max_parallel": 4,
            "modes": ["baseline", "augmented", "baseline"],
            "task_glob": "benchmarks/tasks",
            "output_dir": "benchmarks/results",
            "fail_fast": false
        });
        let validation = validate_run_config(&raw);
        assert!(validation.valid, "errors: {:?}", validation.errors);
        let config = validation.config.expect("config");
        assert_eq!(config.modes, vec![Mode::Baseline, Mode::Augmented]);
        assert_eq!(config.max_parallel, 4);
    }

    #[test]
    fn accumulates_config_errors() {
        let raw = json!({
            "seed": "",
            "max_parallel": 0,
            "modes": ["warp"],
            "task_glob": "tasks",
            "output_dir": "out",
            "fail_fast": "yes"
        });
        let validation = validate_run_config(&raw);
        assert!(!validation.valid);
        assert!(validation.errors.iter().any(|e| e.contains("seed")));
        assert!(validation.errors.iter().any(|e| e.contains("max_parallel")));
        assert!(validation.errors.iter().any(|e| e.contains("Unsupported mode")));
        assert!(validation.errors.iter().any(|e| e.contains("fail_fast")));
    }

    #[test]
    fn rejects_empty_modes() {
        let raw = json!({
            "seed": "s",
            "max_parallel": 1,
            "modes": [],
            "task_glob": "tasks",
            "output_dir": "out",
            "fail_fast": true
        });
        let validation = validate_run_config(&raw);
        assert!(!validation.valid);
        assert!(validation.errors.iter().any(|e| e.contains("modes")));
    }

    #[test]
    fn thresholds_require_finite_numbers() {
        let raw = json!({
            "success_rate_delta_min": 0.1,
            "median_time_delta_pct_max": "fast",
            "regression_rate_max": 0.05
        });
        let validation = validate_thresholds(&raw);
        assert!(!validation.valid);
        assert!(
            validation
                .errors
                .iter()
                .any(|e| e.contains("median_time_delta_pct_max"))
        );
    }

    #[test]
    fn default_thresholds_match_gate_policy() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.success_rate_delta_min, 0.15);
        assert_eq!(thresholds.median_time_delta_pct_max, -25.0);
        assert_eq!(thresholds.regression_rate_max, 0.05);
    }
}
