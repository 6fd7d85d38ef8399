//! Per-job workspace isolation.
//!
//! Every (task, mode) job gets a private copy of its fixture tree in a
//! uniquely named directory under the run's workspaces root, so jobs never
//! need file-level coordination. Cleanup is destructive and therefore
//! guarded: it only ever runs against paths provably inside the system temp
//! dir or a `workspaces` segment.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use crate::task::Mode;

/// Copy the fixture into a fresh, uniquely named workspace under
/// `workspaces_root`. The fixture must exist and be a directory; anything
/// else is an infrastructure error reported to the caller, never a panic.
pub fn prepare_workspace(
    fixture_path: &Path,
    workspaces_root: &Path,
    task_id: &str,
    mode: Mode,
) -> Result<PathBuf> {
    if !fixture_path.exists() {
        bail!("Fixture path not found: {}", fixture_path.display());
    }
    if !fixture_path.is_dir() {
        bail!("Fixture path must be a directory: {}", fixture_path.display());
    }

    fs::create_dir_all(workspaces_root)
        .with_context(|| format!("create workspaces root {}", workspaces_root.display()))?;

    let workspace = tempfile::Builder::new()
        .prefix(&format!("{task_id}-{mode}-"))
        .tempdir_in(workspaces_root)
        .with_context(|| format!("create workspace under {}", workspaces_root.display()))?
        .keep();

    copy_dir_recursive(fixture_path, &workspace)
        .with_context(|| format!("copy fixture {}", fixture_path.display()))?;

    debug!(workspace = %workspace.display(), "workspace prepared");
    Ok(workspace)
}

/// Recursively delete a workspace, but only when the path is inside the
/// system temp directory or contains a `workspaces` segment. Returns whether
/// anything was removed; a refused path is reported and left alone.
pub fn safe_cleanup(workspace: &Path) -> Result<bool> {
    if !cleanup_allowed(workspace) {
        warn!(path = %workspace.display(), "cleanup refused: path outside workspace area");
        return Ok(false);
    }
    if !workspace.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(workspace)
        .with_context(|| format!("remove workspace {}", workspace.display()))?;
    Ok(true)
}

fn cleanup_allowed(path: &Path) -> bool {
    if path.starts_with(std::env::temp_dir()) {
        return true;
    }
    // The `workspaces` segment must be interior: a path that merely ends in
    // `workspaces` is the workspaces root, not a workspace.
    let mut components = path.components().peekable();
    while let Some(component) = components.next() {
        if matches!(component, Component::Normal(name) if name == "workspaces")
            && components.peek().is_some()
        {
            return true;
        }
    }
    false
}

/// Recursive, overwrite-forcing copy of a directory tree.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read {}", src.display()))? {
        let entry = entry.context("read entry")?;
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            fs::copy(&path, &target)
                .with_context(|| format!("copy {}", path.display()))?;
        }
    }
    Ok(())
}
