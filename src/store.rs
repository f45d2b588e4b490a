//! Operations on the active log file and its backups that happen outside the
//! writer: reset ("truncate"), enumeration, and opening the active file for
//! download.

use crate::policy::{BackupFile, BackupPattern};
use log::{debug, warn};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Empty the active log file in place and delete its backups.
///
/// The active file is truncated to zero length without being renamed, so
/// it keeps its identity and any open tail sessions observe the reset as a
/// write that shrinks the file. A missing active file is not an error.
///
/// Every backup in the active file's directory is removed: any
/// `<stem>-*<ext>.gz`, and `<stem>-<timestamp><ext>` when the marker is a
/// rotation timestamp (see [`BackupPattern::matches`]). The cleanup is
/// best-effort: a failure on one file does not stop the others from being
/// attempted, and the first error encountered is returned.
///
/// # Errors
///
/// Returns the first I/O error from truncation, listing the directory, or
/// removing a backup.
pub fn reset(path: &Path) -> io::Result<()> {
    let mut first_err: Option<io::Error> = None;

    match OpenOptions::new().write(true).open(path) {
        Ok(file) => {
            if let Err(e) = file.set_len(0) {
                warn!("failed to truncate {}: {e}", path.display());
                first_err.get_or_insert(e);
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!("failed to open {} for truncation: {e}", path.display());
            first_err.get_or_insert(e);
        }
    }

    match matching_backups(path) {
        Ok(backups) => {
            for backup in backups {
                match fs::remove_file(&backup) {
                    Ok(()) => debug!("removed backup {}", backup.display()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!("failed to remove backup {}: {e}", backup.display());
                        first_err.get_or_insert(e);
                    }
                }
            }
        }
        Err(e) => {
            first_err.get_or_insert(e);
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Backups of `path` with well-formed rotation timestamps, newest first.
pub fn backups(path: &Path) -> io::Result<Vec<BackupFile>> {
    let pattern = BackupPattern::for_active(path);
    let mut backups = crate::writer::list_backups(&pattern)?;
    backups.sort_by(|a, b| b.rotated_at.cmp(&a.rotated_at));
    Ok(backups)
}

/// Open the active log file for a streamed, whole-file read.
pub async fn open_active(path: &Path) -> io::Result<tokio::fs::File> {
    tokio::fs::File::open(path).await
}

/// Every directory entry matching the backup naming pattern of `path`.
fn matching_backups(path: &Path) -> io::Result<Vec<PathBuf>> {
    let pattern = BackupPattern::for_active(path);
    let entries = match fs::read_dir(pattern.dir()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut matches = Vec::new();
    for entry in entries {
        let entry = entry?;
        if pattern.matches(&entry.file_name()) {
            matches.push(entry.path());
        }
    }
    matches.sort();
    Ok(matches)
}
