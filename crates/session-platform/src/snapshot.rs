//! Persisted session metadata used by host startup/session restore flow.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Non-secret session metadata remembered between app launches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Backend endpoint the session was established against.
    pub endpoint: String,
    /// Stable subject identifier of the authenticated account.
    pub subject_id: String,
    /// Role discriminator recorded at sign-in (`student`, `counselor`, ...).
    pub profile_kind: String,
    /// Whether session restore should be attempted on startup.
    pub resume: bool,
}

/// Load snapshot JSON from disk when available.
pub fn load_snapshot(path: &Path) -> Result<Option<SessionSnapshot>, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(format!(
                "failed reading session snapshot {}: {err}",
                path.display()
            ));
        }
    };

    let snapshot = serde_json::from_str::<SessionSnapshot>(&raw)
        .map_err(|err| format!("failed parsing session snapshot {}: {err}", path.display()))?;
    Ok(Some(snapshot))
}

/// Persist snapshot JSON to disk, creating parent directories when needed.
pub fn save_snapshot(path: &Path, snapshot: &SessionSnapshot) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "failed creating session snapshot directory {}: {err}",
                parent.display()
            )
        })?;
    }

    let encoded = serde_json::to_vec(snapshot).map_err(|err| err.to_string())?;
    let temp_path = snapshot_temp_path(path);
    fs::write(&temp_path, encoded).map_err(|err| {
        format!(
            "failed writing temp session snapshot {}: {err}",
            temp_path.display()
        )
    })?;

    if let Err(rename_err) = fs::rename(&temp_path, path) {
        // Windows does not allow replacing existing files via rename.
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                return Err(format!(
                    "failed replacing session snapshot {} after rename error ({rename_err}): {err}",
                    path.display()
                ));
            }
        }
        fs::rename(&temp_path, path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            format!(
                "failed writing session snapshot {} after temp write: {err}",
                path.display()
            )
        })?;
    }

    Ok(())
}

fn snapshot_temp_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("session-snapshot.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}

/// Remove snapshot JSON from disk.
pub fn clear_snapshot(path: &Path) -> Result<(), String> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(format!(
            "failed deleting session snapshot {}: {err}",
            path.display()
        )),
    }
}
