//! Snapshot persistence.
//!
//! One JSON document per repository at `<output>/<owner>/<name>/data.json`.
//! Loading is forgiving: a missing, unreadable, malformed, or
//! version-mismatched file all degrade to "no cache" and the run starts
//! cold. Saving replaces the whole file atomically through a sibling temp
//! file, so a crash mid-write leaves the prior snapshot authoritative.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::domain::{Snapshot, SNAPSHOT_VERSION};

/// Where the snapshot for `owner/name` lives under the output directory.
pub fn snapshot_path(output_dir: &Path, owner: &str, name: &str) -> PathBuf {
    output_dir.join(owner).join(name).join("data.json")
}

/// Load a usable snapshot, or `None` when the run must start cold.
pub fn load(path: &Path) -> Option<Snapshot> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("no snapshot at {}", path.display());
            return None;
        }
        Err(err) => {
            warn!("snapshot at {} is unreadable ({}), starting cold", path.display(), err);
            return None;
        }
    };
    let snapshot: Snapshot = match serde_json::from_str(&raw) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!("snapshot at {} is malformed ({}), starting cold", path.display(), err);
            return None;
        }
    };
    if snapshot.version != SNAPSHOT_VERSION {
        warn!(
            "snapshot at {} carries schema version {}, current is {}, starting cold",
            path.display(),
            snapshot.version,
            SNAPSHOT_VERSION
        );
        return None;
    }
    Some(snapshot)
}

/// Write the snapshot, replacing any existing file in one rename.
pub fn save(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating snapshot directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(snapshot).context("serializing snapshot")?;
    let staged = path.with_extension("json.tmp");
    fs::write(&staged, json)
        .with_context(|| format!("writing staged snapshot {}", staged.display()))?;
    fs::rename(&staged, path)
        .with_context(|| format!("replacing snapshot {}", path.display()))?;
    Ok(())
}
