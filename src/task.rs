//! Task descriptors and corpus loading.
//!
//! Task files are JSON, one object per file. Validation never stops at the
//! first problem: every field is checked independently so a bad file reports
//! all of its violations in one pass. A corpus load fails as a whole on any
//! invalid file or duplicate id, before any job runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Execution mode under comparison. `baseline` is the plain agent toolchain,
/// `augmented` is the wrapped toolchain being evaluated against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Baseline,
    Augmented,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Baseline, Mode::Augmented];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Baseline => "baseline",
            Mode::Augmented => "augmented",
        }
    }

    pub fn parse(value: &str) -> Option<Mode> {
        match value {
            "baseline" => Some(Mode::Baseline),
            "augmented" => Some(Mode::Augmented),
            _ => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value per mode, serialized under the mode names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByMode<T> {
    pub baseline: T,
    pub augmented: T,
}

impl<T> ByMode<T> {
    pub fn get(&self, mode: Mode) -> &T {
        match mode {
            Mode::Baseline => &self.baseline,
            Mode::Augmented => &self.augmented,
        }
    }

    pub fn get_mut(&mut self, mode: Mode) -> &mut T {
        match mode {
            Mode::Baseline => &mut self.baseline,
            Mode::Augmented => &mut self.augmented,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Bugfix,
    Feature,
    Refactor,
    Migration,
    Review,
    Debug,
}

impl Category {
    fn parse(value: &str) -> Option<Category> {
        match value {
            "bugfix" => Some(Category::Bugfix),
            "feature" => Some(Category::Feature),
            "refactor" => Some(Category::Refactor),
            "migration" => Some(Category::Migration),
            "review" => Some(Category::Review),
            "debug" => Some(Category::Debug),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn parse(value: &str) -> Option<RiskLevel> {
        match value {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// Verification strategy kind. The validator only admits the three known
/// kinds; `Other` stays representable so the verification engine can fail an
/// unexpected kind by name instead of treating it as a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyKind {
    Tests,
    Command,
    FileAssert,
    Other(String),
}

impl VerifyKind {
    fn parse(value: &str) -> VerifyKind {
        match value {
            "tests" => VerifyKind::Tests,
            "command" => VerifyKind::Command,
            "file_assert" => VerifyKind::FileAssert,
            other => VerifyKind::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VerifyKind::Tests => "tests",
            VerifyKind::Command => "command",
            VerifyKind::FileAssert => "file_assert",
            VerifyKind::Other(name) => name,
        }
    }
}

/// Verification spec: a kind plus one or more targets (file paths for
/// `file_assert`, a command vector otherwise). Targets are normalized to a
/// non-empty list at validation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifySpec {
    pub kind: VerifyKind,
    pub targets: Vec<String>,
}

/// A validated benchmark task. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub repo_fixture: String,
    pub prompt: String,
    pub setup_cmds: Vec<Vec<String>>,
    pub run_cmd: Option<Vec<String>>,
    pub mode_cmds: BTreeMap<Mode, Vec<String>>,
    pub verify: VerifySpec,
    pub timeout_seconds: u64,
    pub tags: Vec<String>,
    pub risk_level: Option<RiskLevel>,
}

impl Task {
    /// Resolve the run command for a mode: the per-mode entry wins, the
    /// task-wide `run_cmd` is the fallback.
    pub fn resolve_mode_command(&self, mode: Mode) -> Option<&[String]> {
        if let Some(command) = self.mode_cmds.get(&mode)
            && !command.is_empty()
        {
            return Some(command);
        }
        match &self.run_cmd {
            Some(command) if !command.is_empty() => Some(command),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct TaskValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub task: Option<Task>,
}

/// Validate a raw JSON value as a task, accumulating every violation.
pub fn validate_task(value: &Value) -> TaskValidation {
    let Some(object) = value.as_object() else {
        return TaskValidation {
            valid: false,
            errors: vec!["Task must be an object.".to_string()],
            task: None,
        };
    };

    let mut errors = Vec::new();
    let id = non_empty_string(object.get("id"), "id", &mut errors);
    let title = non_empty_string(object.get("title"), "title", &mut errors);
    let category_raw = non_empty_string(object.get("category"), "category", &mut errors);
    let repo_fixture = non_empty_string(object.get("repo_fixture"), "repo_fixture", &mut errors);
    let prompt = non_empty_string(object.get("prompt"), "prompt", &mut errors);
    let timeout_seconds =
        positive_integer(object.get("timeout_seconds"), "timeout_seconds", &mut errors);

    let category = category_raw.as_deref().and_then(|raw| {
        let parsed = Category::parse(raw);
        if parsed.is_none() {
            errors.push(format!("Unsupported category \"{raw}\"."));
        }
        parsed
    });

    let verify = parse_verify(object.get("verify"), &mut errors);
    let run_cmd = command_vec(object.get("run_cmd"), "run_cmd", &mut errors);
    let setup_cmds = parse_setup_cmds(object.get("setup_cmds"), &mut errors);
    let mode_cmds = parse_mode_cmds(object.get("mode_cmds"), &mut errors);
    let tags = optional_string_array(object.get("tags"), "tags", &mut errors);

    let risk_level = match object.get("risk_level").and_then(Value::as_str) {
        Some(raw) if !raw.trim().is_empty() => {
            let parsed = RiskLevel::parse(raw.trim());
            if parsed.is_none() {
                errors.push(format!("Unsupported risk_level \"{}\".", raw.trim()));
            }
            parsed
        }
        _ => None,
    };

    if run_cmd.is_none() && mode_cmds.is_empty() {
        errors.push("Task must define run_cmd or mode_cmds.".to_string());
    }

    if !errors.is_empty() {
        return TaskValidation {
            valid: false,
            errors,
            task: None,
        };
    }

    let task = match (id, title, category, repo_fixture, prompt, timeout_seconds, verify) {
        (
            Some(id),
            Some(title),
            Some(category),
            Some(repo_fixture),
            Some(prompt),
            Some(timeout_seconds),
            Some(verify),
        ) => Some(Task {
            id,
            title,
            category,
            repo_fixture,
            prompt,
            setup_cmds,
            run_cmd,
            mode_cmds,
            verify,
            timeout_seconds,
            tags,
            risk_level,
        }),
        _ => None,
    };

    TaskValidation {
        valid: task.is_some(),
        errors,
        task,
    }
}

fn parse_verify(value: Option<&Value>, errors: &mut Vec<String>) -> Option<VerifySpec> {
    let Some(object) = value.and_then(Value::as_object) else {
        errors.push("verify must be an object.".to_string());
        return None;
    };

    let kind = match object.get("type").and_then(Value::as_str) {
        Some(raw) if !raw.trim().is_empty() => VerifyKind::parse(raw.trim()),
        _ => {
            errors.push("verify.type must be a non-empty string.".to_string());
            return None;
        }
    };
    if let VerifyKind::Other(name) = &kind {
        errors.push(format!("Unsupported verify.type \"{name}\"."));
        return None;
    }

    let targets = match object.get("target") {
        Some(Value::String(target)) if !target.trim().is_empty() => vec![target.clone()],
        Some(Value::Array(entries)) if !entries.is_empty() => {
            let targets: Vec<String> = entries
                .iter()
                .filter_map(Value::as_str)
                .filter(|entry| !entry.trim().is_empty())
                .map(str::to_string)
                .collect();
            if targets.len() != entries.len() {
                errors.push("verify.target must be a string or string array.".to_string());
                return None;
            }
            targets
        }
        _ => {
            errors.push("verify.target must be a string or string array.".to_string());
            return None;
        }
    };

    Some(VerifySpec { kind, targets })
}

fn parse_mode_cmds(value: Option<&Value>, errors: &mut Vec<String>) -> BTreeMap<Mode, Vec<String>> {
    let Some(value) = value else {
        return BTreeMap::new();
    };
    let Some(object) = value.as_object() else {
        errors.push("mode_cmds must be an object.".to_string());
        return BTreeMap::new();
    };

    let mut mapped = BTreeMap::new();
    for mode in Mode::ALL {
        if let Some(command) =
            command_vec(object.get(mode.as_str()), &format!("mode_cmds.{mode}"), errors)
        {
            mapped.insert(mode, command);
        }
    }
    for key in object.keys() {
        if Mode::parse(key).is_none() {
            errors.push(format!("Unsupported mode_cmds key \"{key}\"."));
        }
    }
    mapped
}

fn parse_setup_cmds(value: Option<&Value>, errors: &mut Vec<String>) -> Vec<Vec<String>> {
    let Some(value) = value else {
        return Vec::new();
    };
    let Some(entries) = value.as_array() else {
        errors.push("setup_cmds must be an array of command arrays.".to_string());
        return Vec::new();
    };

    let mut commands = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        match command_vec(Some(entry), &format!("setup_cmds[{index}]"), errors) {
            Some(command) => commands.push(command),
            None => continue,
        }
    }
    commands
}

/// A non-empty array of non-empty strings, or `None` (absent or invalid;
/// invalid pushes an error).
pub(crate) fn command_vec(
    value: Option<&Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<Vec<String>> {
    let value = match value {
        None | Some(Value::Null) => return None,
        Some(value) => value,
    };
    let Some(entries) = value.as_array() else {
        errors.push(format!("{field} must be a non-empty string array."));
        return None;
    };
    if entries.is_empty() {
        errors.push(format!("{field} must be a non-empty string array."));
        return None;
    }
    let strings: Vec<String> = entries
        .iter()
        .filter_map(Value::as_str)
        .filter(|entry| !entry.trim().is_empty())
        .map(str::to_string)
        .collect();
    if strings.len() != entries.len() {
        errors.push(format!("{field} must only contain non-empty strings."));
        return None;
    }
    Some(strings)
}

fn optional_string_array(
    value: Option<&Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Vec<String> {
    let value = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(value) => value,
    };
    let Some(entries) = value.as_array() else {
        errors.push(format!("{field} must be an array."));
        return Vec::new();
    };
    let strings: Vec<String> = entries
        .iter()
        .filter_map(Value::as_str)
        .filter(|entry| !entry.trim().is_empty())
        .map(str::to_string)
        .collect();
    if strings.len() != entries.len() {
        errors.push(format!("{field} must only contain non-empty strings."));
    }
    strings
}

pub(crate) fn non_empty_string(
    value: Option<&Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    match value.and_then(Value::as_str) {
        Some(raw) if !raw.trim().is_empty() => Some(raw.trim().to_string()),
        _ => {
            errors.push(format!("{field} must be a non-empty string."));
            None
        }
    }
}

pub(crate) fn positive_integer(
    value: Option<&Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<u64> {
    match value.and_then(Value::as_u64) {
        Some(parsed) if parsed > 0 => Some(parsed),
        _ => {
            errors.push(format!("{field} must be a positive integer."));
            None
        }
    }
}

pub(crate) fn boolean(value: Option<&Value>, field: &str, errors: &mut Vec<String>) -> Option<bool> {
    match value.and_then(Value::as_bool) {
        Some(parsed) => Some(parsed),
        None => {
            errors.push(format!("{field} must be a boolean."));
            None
        }
    }
}

/// Load a corpus: resolve the glob to a sorted path list, validate every
/// file, reject the load on any invalid task or duplicate id. Tasks come
/// back sorted by id regardless of filesystem enumeration order.
pub fn load_tasks(task_glob: &str, root_dir: &Path) -> Result<Vec<Task>> {
    let task_paths = resolve_task_paths(task_glob, root_dir)?;
    if task_paths.is_empty() {
        bail!("No benchmark task files matched \"{task_glob}\".");
    }

    let mut tasks = Vec::new();
    let mut seen = BTreeSet::new();
    for task_path in task_paths {
        let raw: Value = crate::io::read_json_file(&task_path)?;
        let validation = validate_task(&raw);
        let Some(task) = validation.task else {
            bail!(
                "Invalid task file \"{}\": {}",
                task_path.display(),
                validation.errors.join(" ")
            );
        };
        if !seen.insert(task.id.clone()) {
            bail!(
                "Duplicate benchmark task id \"{}\" in \"{}\".",
                task.id,
                task_path.display()
            );
        }
        tasks.push(task);
    }

    tasks.sort_by(|left, right| left.id.cmp(&right.id));
    debug!(count = tasks.len(), "tasks loaded");
    Ok(tasks)
}

/// Resolve a path, directory, or wildcard pattern to a sorted file list.
fn resolve_task_paths(task_glob: &str, root_dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = task_glob.replace('\\', "/");
    let absolute = if Path::new(&pattern).is_absolute() {
        PathBuf::from(&pattern)
    } else {
        root_dir.join(&pattern)
    };
    let absolute_str = absolute.to_string_lossy().to_string();

    if !absolute_str.contains('*') {
        if absolute.is_dir() {
            let mut files = Vec::new();
            for entry in fs::read_dir(&absolute)
                .with_context(|| format!("read task dir {}", absolute.display()))?
            {
                let path = entry.context("read task dir entry")?.path();
                if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                    files.push(path);
                }
            }
            files.sort();
            return Ok(files);
        }
        return Ok(vec![absolute]);
    }

    if let Some((base, _)) = absolute_str.split_once("**") {
        let base_dir = base.trim_end_matches('/');
        let base_dir = if base_dir.is_empty() {
            root_dir.to_path_buf()
        } else {
            PathBuf::from(base_dir)
        };
        let mut files = walk_files(&base_dir)?;
        files.retain(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"));
        files.sort();
        return Ok(files);
    }

    let directory = absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root_dir.to_path_buf());
    let file_pattern = absolute
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let matcher = wildcard_to_regex(&file_pattern)?;

    let mut files = Vec::new();
    for entry in fs::read_dir(&directory)
        .with_context(|| format!("read task dir {}", directory.display()))?
    {
        let path = entry.context("read task dir entry")?.path();
        if let Some(name) = path.file_name().and_then(|name| name.to_str())
            && matcher.is_match(name)
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let anchored = format!("^{}$", regex::escape(pattern).replace("\\*", ".*"));
    Regex::new(&anchored).with_context(|| format!("compile task pattern \"{pattern}\""))
}

fn walk_files(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in
        fs::read_dir(directory).with_context(|| format!("read {}", directory.display()))?
    {
        let path = entry.context("read dir entry")?.path();
        if path.is_dir() {
            files.extend(walk_files(&path)?);
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}
