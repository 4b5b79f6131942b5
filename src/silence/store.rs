//! Crash-safe silence state file
//!
//! The file is a JSON object mapping external ids to label maps. Writes go
//! to a hidden temporary file next to the target which is synced and then
//! renamed over it, followed by a sync of the directory, so a crash leaves
//! either the old or the new file and never a torn one.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// External id to label map, sorted so encoding is deterministic
pub type SilenceLabels = BTreeMap<String, BTreeMap<String, String>>;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Persisted mapping of silence ids to label sets
#[derive(Debug, Clone)]
pub struct SilenceStore {
    path: PathBuf,
}

impl SilenceStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state file; a missing file is an empty state
    pub fn load(&self) -> Result<SilenceLabels, StoreError> {
        if !self.path.exists() {
            return Ok(SilenceLabels::new());
        }

        let data = fs::read(&self.path)?;
        serde_json::from_slice(&data).map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    /// Atomically replace the state file with `data`
    pub fn store(&self, data: &SilenceLabels) -> Result<(), StoreError> {
        let mut encoded =
            serde_json::to_vec(data).map_err(|e| StoreError::Serialization(e.to_string()))?;
        encoded.push(b'\n');

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let base = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StoreError::InvalidPath(self.path.clone()))?;

        let tmp_path = dir.join(format!(
            ".{}-{}-{}.json",
            base,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let result = write_synced(&tmp_path, &encoded)
            .and_then(|_| fs::rename(&tmp_path, &self.path))
            .and_then(|_| sync_dir(&dir));

        if result.is_err() {
            // The target is untouched; only the temporary file may be left
            let _ = fs::remove_file(&tmp_path);
        }

        result.map_err(StoreError::from)
    }
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(data)?;
    file.flush()?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid state file path: {0}")]
    InvalidPath(PathBuf),
}
