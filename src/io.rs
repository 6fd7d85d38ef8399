//! JSON artifact I/O.
//!
//! Every persisted artifact goes through [`write_json_stable`] so that runs
//! with identical inputs produce byte-identical files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create dir {}", path.display()))?;
    Ok(())
}

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Write a value as pretty JSON with lexicographically sorted object keys.
///
/// Round-tripping through `serde_json::Value` sorts keys since its object
/// representation is a `BTreeMap`. Arrays keep their semantic order.
pub fn write_json_stable<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let sorted = serde_json::to_value(value).context("serialize value")?;
    let contents = serde_json::to_string_pretty(&sorted).context("render json")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
