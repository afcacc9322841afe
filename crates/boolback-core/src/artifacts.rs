use crate::error::{BoolbackError, Result};
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";
pub const LOCK_FILE: &str = "running.lock";
pub const RESULTS_DIR: &str = "results";

pub fn outputs_path(results_dir: &Path, epoch: u32) -> PathBuf {
    results_dir.join(format!("outputs_epoch_{}.json", epoch))
}

pub fn keyword_score_path(results_dir: &Path, epoch: u32) -> PathBuf {
    results_dir.join(format!("score_epoch_{}_keyword.json", epoch))
}

pub fn defense_result_path(results_dir: &Path, defense: &str, epoch: u32) -> PathBuf {
    results_dir.join(format!("defense_{}_epoch_{}.json", defense, epoch))
}

/// Parses the epoch out of a `score_epoch_<n>_keyword.json` file name.
pub fn parse_keyword_score_epoch(file_name: &str) -> Option<u32> {
    let digits = file_name
        .strip_prefix("score_epoch_")?
        .strip_suffix("_keyword.json")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| BoolbackError::io(path, e))
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Reads a JSON document. A missing file yields `Ok(None)`; unreadable or
/// unparsable content is an error naming the path.
pub fn read_json(path: &Path) -> Result<Option<Value>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BoolbackError::io(path, e)),
    };
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| BoolbackError::malformed(path, format!("invalid JSON: {}", e)))?;
    Ok(Some(value))
}

/// Reads a JSON document that must exist and be an object.
pub fn read_json_object(path: &Path) -> Result<serde_json::Map<String, Value>> {
    match read_json(path)? {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(BoolbackError::malformed(path, "expected a JSON object")),
        None => Err(BoolbackError::NotFound(format!(
            "file not found: {}",
            path.display()
        ))),
    }
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp).map_err(|e| BoolbackError::io(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| BoolbackError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| BoolbackError::io(path, e))?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

pub fn atomic_write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| BoolbackError::malformed(path, format!("failed to serialize: {}", e)))?;
    atomic_write_bytes(path, &bytes)
}

pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Renders a path relative to the project root when it lives under it.
pub fn path_for_response(path: &Path, project_root: &Path) -> String {
    let path = normalize_path(path);
    let root = normalize_path(project_root);
    match path.strip_prefix(&root) {
        Ok(rel) => rel.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}

#[cfg(test)]
pub(crate) fn scratch_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "boolback_{}_{}_{}",
        label,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    ensure_dir(&dir).expect("scratch dir");
    dir
}
