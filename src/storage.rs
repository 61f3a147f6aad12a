//! Whole-directory replacement for the persisted index.
//!
//! A rebuild never clears the live storage directory first. The new index is
//! written into a sibling staging directory and swapped in with renames:
//!
//! ```text
//! .storage.staging-<id>   ← build writes here
//! storage                 → .storage.old-<id>
//! .storage.staging-<id>   → storage
//! .storage.old-<id>       ← removed
//! ```
//!
//! If the build fails, the staging directory is discarded and `storage` is
//! untouched. Between the two renames `storage` is briefly absent, which
//! readers observe as "no index" rather than a half-written one.
//!
//! Staging and backup directories left by an interrupted swap are swept on
//! the next swap once they are older than [`LEFTOVER_MIN_AGE`]. Younger ones
//! may belong to a rebuild running in another process and are left alone.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RagError, Result};

/// Minimum age before a staging or backup directory counts as abandoned.
pub const LEFTOVER_MIN_AGE: Duration = Duration::from_secs(6 * 60 * 60);

/// Replace `target` with a directory populated by `build`.
///
/// `build` receives an empty staging directory on the same filesystem.
/// Abandoned leftovers from interrupted earlier swaps are removed first.
pub fn replace_dir_atomically<F>(target: &Path, build: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let (parent, name) = split_target(target)?;
    std::fs::create_dir_all(&parent)?;
    remove_leftovers(&parent, &name, LEFTOVER_MIN_AGE);

    let id = Uuid::new_v4().simple().to_string();
    let staging = parent.join(format!(".{}.staging-{}", name, id));
    std::fs::create_dir(&staging)?;

    if let Err(e) = build(&staging) {
        discard(&staging);
        return Err(e);
    }

    let backup = if target.exists() {
        let backup = parent.join(format!(".{}.old-{}", name, id));
        if let Err(e) = std::fs::rename(target, &backup) {
            discard(&staging);
            return Err(e.into());
        }
        Some(backup)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(&staging, target) {
        if let Some(backup) = &backup {
            if let Err(restore) = std::fs::rename(backup, target) {
                warn!(error = %restore, "failed to restore previous index after swap error");
            }
        }
        discard(&staging);
        return Err(e.into());
    }

    if let Some(backup) = backup {
        discard(&backup);
    }
    debug!(target = %target.display(), "storage directory replaced");
    Ok(())
}

/// Remove everything in `target`, leaving an empty directory.
pub fn clear_dir(target: &Path) -> Result<()> {
    if target.exists() {
        std::fs::remove_dir_all(target)?;
    }
    std::fs::create_dir_all(target)?;
    Ok(())
}

/// True when `path` is a directory with at least one entry.
pub fn dir_has_contents(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn split_target(target: &Path) -> Result<(PathBuf, String)> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            RagError::Configuration(format!(
                "storage path '{}' has no directory name",
                target.display()
            ))
        })?;
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((parent, name))
}

fn remove_leftovers(parent: &Path, name: &str, min_age: Duration) {
    let staging_prefix = format!(".{}.staging-", name);
    let old_prefix = format!(".{}.old-", name);
    let Ok(entries) = std::fs::read_dir(parent) else {
        return;
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name().to_string_lossy().to_string();
        if !file_name.starts_with(&staging_prefix) && !file_name.starts_with(&old_prefix) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok());
        match age {
            Some(age) if age >= min_age => {
                debug!(path = %entry.path().display(), "removing leftover from interrupted rebuild");
                discard(&entry.path());
            }
            _ => debug!(path = %entry.path().display(), "keeping recent leftover"),
        }
    }
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        warn!(path = %path.display(), error = %e, "failed to remove directory");
    }
}
