//! Per-authority JSON blobs kept beside the database under `<workspace>/userdata/`.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::validate_authority;

const DIR: &str = "userdata";

pub fn dir(workspace: &Path) -> PathBuf {
    workspace.join(DIR)
}

fn blob_path(workspace: &Path, authority: &str) -> Result<PathBuf> {
    validate_authority("authority", authority)?;
    Ok(dir(workspace).join(format!("{}.json", authority.trim())))
}

/// A missing or unreadable blob reads as absent.
pub fn read(workspace: &Path, authority: &str) -> Result<Option<serde_json::Value>> {
    let path = blob_path(workspace, authority)?;
    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&text) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::warn!(authority, error = %e, "ignoring corrupt user data blob");
            Ok(None)
        }
    }
}

pub fn write(workspace: &Path, authority: &str, blob: &serde_json::Value) -> Result<()> {
    let path = blob_path(workspace, authority)?;
    std::fs::create_dir_all(dir(workspace))?;
    let tmp = path.with_extension("json.writing");
    std::fs::write(&tmp, serde_json::to_vec_pretty(blob)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// Returns whether a blob existed.
pub fn delete(workspace: &Path, authority: &str) -> Result<bool> {
    let path = blob_path(workspace, authority)?;
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Removes the blob owned by `authority` and any interrupted write of it.
pub fn remove_scoped(workspace: &Path, authority: &str) -> std::io::Result<usize> {
    let d = dir(workspace);
    let authority = authority.trim();
    let mut removed = 0;
    for name in [format!("{}.json", authority), format!("{}.json.writing", authority)] {
        match std::fs::remove_file(d.join(&name)) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}
