//! Atomic file writes
//!
//! Artifacts consumed by other tools (score mapping, TOML config, cookie cache)
//! are written to a sibling temp file first and then renamed over the target,
//! so a reader never observes a truncated file.

use crate::Result;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Temp file used while writing `target`
pub fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Write `contents` to `target` via temp file + rename
///
/// Parent directories are created if missing. On failure the temp file is
/// removed and `target` keeps its previous contents.
pub fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp = temp_path_for(target);
    let outcome = (|| -> Result<()> {
        let mut file = std::fs::File::create(&temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        std::fs::rename(&temp, target)?;
        Ok(())
    })();

    if outcome.is_err() {
        let _ = std::fs::remove_file(&temp);
    }
    outcome
}

/// Restrict a file to owner read/write (Unix only, no-op elsewhere)
pub fn set_owner_only(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
