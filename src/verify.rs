//! Verification strategies for completed runs.
//!
//! Selected by the task's verify kind: file assertions, or a command (the
//! `tests` kind is a command with a friendlier name) run inside the
//! workspace under the job's timeout. Targets go through token expansion
//! before use.

use std::path::Path;
use std::time::Duration;

use crate::executor::{CommandRunner, ExecutionRequest};
use crate::task::{Task, VerifyKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub pass: bool,
    pub messages: Vec<String>,
}

impl VerificationResult {
    fn fail(message: String) -> Self {
        VerificationResult {
            pass: false,
            messages: vec![message],
        }
    }
}

/// Apply the task's verification strategy inside the workspace.
pub fn verify_task(
    task: &Task,
    workspace: &Path,
    timeout: Duration,
    expand: &dyn Fn(&str) -> String,
    runner: &dyn CommandRunner,
) -> VerificationResult {
    let targets: Vec<String> = task.verify.targets.iter().map(|t| expand(t)).collect();

    match &task.verify.kind {
        VerifyKind::FileAssert => {
            let mut missing = Vec::new();
            for target in &targets {
                let absolute = if Path::new(target).is_absolute() {
                    Path::new(target).to_path_buf()
                } else {
                    workspace.join(target)
                };
                if !absolute.exists() {
                    missing.push(target.clone());
                }
            }
            if missing.is_empty() {
                VerificationResult {
                    pass: true,
                    messages: vec!["All file assertions passed.".to_string()],
                }
            } else {
                VerificationResult::fail(format!("Missing files: {}", missing.join(", ")))
            }
        }
        VerifyKind::Command | VerifyKind::Tests => {
            let result = runner.run(&ExecutionRequest::new(
                targets,
                workspace.to_path_buf(),
                timeout,
            ));

            if result.timed_out {
                return VerificationResult::fail("Verification command timed out.".to_string());
            }
            if result.ok {
                return VerificationResult {
                    pass: true,
                    messages: vec!["Verification command passed.".to_string()],
                };
            }

            let exit_code = result
                .exit_code
                .map_or_else(|| "none".to_string(), |code| code.to_string());
            let mut messages = vec![format!(
                "Verification command failed with exit code {exit_code}."
            )];
            let stderr = result.stderr.trim();
            if !stderr.is_empty() {
                messages.push(stderr.to_string());
            }
            VerificationResult {
                pass: false,
                messages,
            }
        }
        // Unknown kinds are rejected at load time; if one reaches here it
        // must fail loudly, never count as a pass.
        VerifyKind::Other(name) => {
            VerificationResult::fail(format!("Unsupported verification type \"{name}\"."))
        }
    }
}
