//! Rotation policy and backup naming for the active log file.

use chrono::{Duration, NaiveDateTime};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

/// Timestamp layout embedded in backup file names (millisecond precision,
/// no characters that are awkward in file names).
pub const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// Extension appended to a backup once it has been gzip-compressed.
pub const COMPRESSED_SUFFIX: &str = ".gz";

const MEGABYTE: u64 = 1024 * 1024;

/// When the active log file is rotated and how long its backups live.
///
/// The policy itself is pure configuration; [`RotatingFile`](crate::RotatingFile)
/// is the component that enforces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Size in bytes that, once exceeded by an append, triggers rotation.
    pub max_size_bytes: u64,

    /// Number of backups to retain. `0` keeps all of them.
    pub max_backups: usize,

    /// Maximum backup age in days. `0` disables age-based removal.
    pub max_age_days: u32,

    /// Whether backups are gzip-compressed after rotation.
    pub compress_backups: bool,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        RotationPolicy {
            max_size_bytes: 10 * MEGABYTE,
            max_backups: 5,
            max_age_days: 30,
            compress_backups: true,
        }
    }
}

impl RotationPolicy {
    /// Check the policy invariants.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `max_size_bytes` is zero.
    pub fn validate(&self) -> io::Result<()> {
        if self.max_size_bytes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "rotation max size must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Whether an active file of `size` bytes must be rotated.
    pub fn should_rotate(&self, size: u64) -> bool {
        size > self.max_size_bytes
    }

    /// Select the backups that retention removes.
    ///
    /// `backups` may be in any order. The newest `max_backups` survive the
    /// count limit; anything rotated more than `max_age_days` before `now`
    /// is removed regardless of count.
    pub fn expired<'a>(&self, backups: &'a [BackupFile], now: NaiveDateTime) -> Vec<&'a BackupFile> {
        let mut newest_first: Vec<&BackupFile> = backups.iter().collect();
        newest_first.sort_by(|a, b| b.rotated_at.cmp(&a.rotated_at));

        let cutoff = (self.max_age_days > 0)
            .then(|| now - Duration::days(i64::from(self.max_age_days)));

        newest_first
            .into_iter()
            .enumerate()
            .filter(|(rank, backup)| {
                let over_count = self.max_backups > 0 && *rank >= self.max_backups;
                let too_old = cutoff.is_some_and(|cutoff| backup.rotated_at < cutoff);
                over_count || too_old
            })
            .map(|(_, backup)| backup)
            .collect()
    }
}

/// A rotated, historical copy of the active log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    pub path: PathBuf,
    pub rotated_at: NaiveDateTime,
    pub compressed: bool,
}

/// Naming scheme shared by the active file and its backups.
///
/// For an active file `controlserver.log` the stem is `controlserver` and the
/// extension `.log`; backups are `controlserver-<timestamp>.log`, or
/// `controlserver-<timestamp>.log.gz` once compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPattern {
    dir: PathBuf,
    stem: String,
    ext: String,
}

impl BackupPattern {
    /// Derive the pattern from the active file's path.
    pub fn for_active(active: &Path) -> Self {
        let dir = match active.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stem = active
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = active
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        BackupPattern { dir, stem, ext }
    }

    /// Directory the active file and its backups live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the backup for a rotation at `rotated_at`.
    pub fn backup_path(&self, rotated_at: NaiveDateTime) -> PathBuf {
        self.dir.join(format!(
            "{}-{}{}",
            self.stem,
            rotated_at.format(BACKUP_TIME_FORMAT),
            self.ext
        ))
    }

    /// Whether `name` is a backup of the active file.
    ///
    /// Compressed names (`<stem>-*<ext>.gz`) match on shape alone. An
    /// uncompressed `<stem>-*<ext>` only matches when its marker is a
    /// rotation timestamp, so neighbours such as `<stem>-audit<ext>` are
    /// never mistaken for backups.
    pub fn matches(&self, name: &OsStr) -> bool {
        match self.split(name) {
            Some((_, true)) => true,
            Some((marker, false)) => parse_marker(marker).is_some(),
            None => false,
        }
    }

    /// Parse a directory entry name into a backup, if it is one with a
    /// well-formed rotation timestamp.
    pub fn parse(&self, name: &OsStr) -> Option<BackupFile> {
        let (marker, compressed) = self.split(name)?;
        let rotated_at = parse_marker(marker)?;
        Some(BackupFile {
            path: self.dir.join(name),
            rotated_at,
            compressed,
        })
    }

    /// Split a backup name into its rotation marker and compression flag.
    fn split<'a>(&self, name: &'a OsStr) -> Option<(&'a str, bool)> {
        let name = name.to_str()?;
        let rest = name.strip_prefix(&self.stem)?.strip_prefix('-')?;
        let (rest, compressed) = match rest.strip_suffix(COMPRESSED_SUFFIX) {
            Some(rest) => (rest, true),
            None => (rest, false),
        };
        let marker = rest.strip_suffix(self.ext.as_str())?;
        Some((marker, compressed))
    }
}

fn parse_marker(marker: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(marker, BACKUP_TIME_FORMAT).ok()
}
