use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;

use strand_core::error::{Result, StrandError};

/// Write atomically: the target either keeps its old contents or holds all
/// of `contents`, never a prefix.
///
/// Data goes to a hidden temp file in the same directory, is flushed to disk
/// with `sync_all`, then renamed over the target.
pub fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StrandError::Storage(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(parent)?;

    let temp_path = temp_path_in(parent);
    let written = (|| -> std::io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(contents.as_ref())?;
        file.sync_all()
    })();
    if let Err(e) = written {
        fs::remove_file(&temp_path).ok();
        return Err(StrandError::Storage(format!(
            "Failed to write temporary file {}: {}",
            temp_path.display(),
            e
        )));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        fs::remove_file(&temp_path).ok();
        StrandError::Storage(format!("Failed to move file into {}: {}", path.display(), e))
    })
}

/// Read and parse a JSON file, or `None` if it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StrandError::Storage(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Reject ids that would escape their directory once used as a file name.
pub fn checked_id(id: &str) -> Result<&str> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.starts_with('.');
    if bad {
        return Err(StrandError::Storage(format!("Invalid storage id: {:?}", id)));
    }
    Ok(id)
}

fn temp_path_in(dir: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    dir.join(format!(".tmp_{}_{}", std::process::id(), nanos))
}
