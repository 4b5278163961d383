//! Small helpers for JSON documents persisted on disk.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sync_core::error::{Result, SyncError};

/// Read and parse `path`.
///
/// Returns `Ok(None)` when the file is absent or blank.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|source| SyncError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&content)?))
}

/// Atomically write `value` to `path`, creating parent directories if needed.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let wrap = |source| SyncError::FileWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(wrap)?;
    }

    // Write to a temp file then rename for atomicity.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(wrap)?;
    std::fs::rename(&tmp, path).map_err(wrap)?;
    Ok(())
}

/// Delete `path` if it exists.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|source| SyncError::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Of the candidates that exist, return the most recently modified one.
///
/// Ties go to the earlier candidate.
pub fn newest_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    let mut best: Option<(&PathBuf, SystemTime)> = None;
    for path in candidates {
        let Ok(meta) = std::fs::metadata(path) else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        match best {
            Some((_, t)) if modified <= t => {}
            _ => best = Some((path, modified)),
        }
    }
    best.map(|(p, _)| p.clone())
}
