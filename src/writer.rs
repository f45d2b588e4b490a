//! The process-side owner of the active log file.
//!
//! [`RotatingFile`] appends to the active file, rotates it once it grows
//! past the policy's size threshold, compresses the rotated copy and prunes
//! old backups. Tail sessions never write; they only observe the renames and
//! truncations this module (and [`store::reset`](crate::store::reset))
//! produce on disk.
//!
//! The writer never logs. It is the file half of the process logger, so a
//! log call from here would re-enter the logger that is driving it. What it
//! did is queued as [`RotationEvent`]s for the owner to report.

use crate::policy::{BackupFile, BackupPattern, COMPRESSED_SUFFIX, RotationPolicy};
use chrono::{Duration, Local, NaiveDateTime};
use flate2::Compression;
use flate2::write::GzEncoder;
use fs2::FileExt;
use log::Level;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Undrained events beyond this are dropped, oldest first.
const MAX_PENDING_EVENTS: usize = 64;

/// Something the writer did on its own while appending.
#[derive(Debug)]
pub enum RotationEvent {
    /// The active file was renamed to `backup`.
    Rotated { active: PathBuf, backup: PathBuf },
    /// Retention removed a backup.
    Removed { backup: PathBuf },
    /// Compression or retention failed after a successful rotation.
    MaintenanceFailed { active: PathBuf, error: io::Error },
    /// A size-triggered rotation failed. The append itself succeeded.
    RotationFailed { active: PathBuf, error: io::Error },
}

impl RotationEvent {
    /// Level the event deserves when reported through `log`.
    pub fn level(&self) -> Level {
        match self {
            RotationEvent::Rotated { .. } | RotationEvent::Removed { .. } => Level::Debug,
            RotationEvent::MaintenanceFailed { .. } | RotationEvent::RotationFailed { .. } => {
                Level::Warn
            }
        }
    }
}

impl fmt::Display for RotationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationEvent::Rotated { active, backup } => {
                write!(f, "rotated {} to {}", active.display(), backup.display())
            }
            RotationEvent::Removed { backup } => {
                write!(f, "removed expired backup {}", backup.display())
            }
            RotationEvent::MaintenanceFailed { active, error } => {
                write!(f, "backup maintenance for {} failed: {error}", active.display())
            }
            RotationEvent::RotationFailed { active, error } => {
                write!(f, "rotating {} failed: {error}", active.display())
            }
        }
    }
}

/// Builder for a [`RotatingFile`].
///
/// ```no_run
/// use logtail::RotatingFile;
///
/// let mut file = RotatingFile::builder("/var/log/controlserver.log")
///     .max_size_bytes(1024 * 1024)
///     .max_backups(3)
///     .compress_backups(false)
///     .open()?;
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct RotatingFileBuilder {
    path: PathBuf,
    policy: RotationPolicy,
}

impl RotatingFileBuilder {
    /// Set the rotation threshold in bytes.
    pub fn max_size_bytes(mut self, bytes: u64) -> Self {
        self.policy.max_size_bytes = bytes;
        self
    }

    /// Set how many backups are retained (`0` = all).
    pub fn max_backups(mut self, count: usize) -> Self {
        self.policy.max_backups = count;
        self
    }

    /// Set the backup age limit in days (`0` = no limit).
    pub fn max_age_days(mut self, days: u32) -> Self {
        self.policy.max_age_days = days;
        self
    }

    /// Enable or disable gzip compression of backups.
    pub fn compress_backups(mut self, compress: bool) -> Self {
        self.policy.compress_backups = compress;
        self
    }

    /// Replace the whole policy.
    pub fn policy(mut self, policy: RotationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Validate the policy, take the writer lock and open the active file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an invalid policy, `AlreadyExists` if
    /// another writer holds the lock, or any I/O error from creating the
    /// directory or opening the file.
    pub fn open(self) -> io::Result<RotatingFile> {
        self.policy.validate()?;

        let pattern = BackupPattern::for_active(&self.path);
        fs::create_dir_all(pattern.dir())?;

        let lock_path = lock_path_for(&self.path);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive().map_err(|_| {
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!(
                    "another writer holds the lock on {}",
                    self.path.display()
                ),
            )
        })?;

        let mut file = RotatingFile {
            path: self.path,
            pattern,
            policy: self.policy,
            file: None,
            size: 0,
            events: VecDeque::new(),
            _lock: lock,
        };
        file.open_active()?;
        Ok(file)
    }
}

/// A size-rotated append-only log file.
///
/// Implements [`io::Write`]. Each `write` appends to the active file; when
/// the append leaves the file larger than the policy's threshold, the file
/// is renamed to a timestamped backup and a fresh empty file takes its
/// place at the same path.
///
/// A failed size-triggered rotation does not fail the `write` that
/// triggered it, since the bytes are already on disk; it is queued as a
/// [`RotationEvent::RotationFailed`] and retried on the next write.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    pattern: BackupPattern,
    policy: RotationPolicy,
    file: Option<File>,
    size: u64,
    events: VecDeque<RotationEvent>,
    _lock: File,
}

impl RotatingFile {
    /// Start building a rotating file at `path` with the default policy.
    pub fn builder(path: impl AsRef<Path>) -> RotatingFileBuilder {
        RotatingFileBuilder {
            path: path.as_ref().to_path_buf(),
            policy: RotationPolicy::default(),
        }
    }

    /// Open with an explicit policy.
    pub fn open(path: impl AsRef<Path>, policy: RotationPolicy) -> io::Result<Self> {
        Self::builder(path).policy(policy).open()
    }

    /// Path of the active file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The policy this file enforces.
    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Bytes this writer believes the active file holds.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Rotate now, regardless of size.
    ///
    /// Renames the active file to a backup, opens a fresh active file, then
    /// compresses and prunes backups per the policy. Maintenance failures
    /// after the rename are queued as events and do not fail the rotation.
    pub fn rotate(&mut self) -> io::Result<()> {
        self.close()?;

        if self.path.exists() {
            let backup = self.next_backup_path(Local::now().naive_local());
            fs::rename(&self.path, &backup)?;
            self.push_event(RotationEvent::Rotated {
                active: self.path.clone(),
                backup,
            });
        }

        self.open_active()?;

        if let Err(error) = self.maintain_backups(Local::now().naive_local()) {
            self.push_event(RotationEvent::MaintenanceFailed {
                active: self.path.clone(),
                error,
            });
        }
        Ok(())
    }

    /// Take every event queued since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<RotationEvent> {
        self.events.drain(..).collect()
    }

    /// Flush and release the active file handle.
    ///
    /// A later write reopens the file.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_data()?;
        }
        Ok(())
    }

    /// All backups of this file with well-formed names.
    pub fn backups(&self) -> io::Result<Vec<BackupFile>> {
        list_backups(&self.pattern)
    }

    fn open_active(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.size = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    /// Backup names carry millisecond timestamps; two rotations inside the
    /// same millisecond bump the later one forward.
    fn next_backup_path(&self, mut at: NaiveDateTime) -> PathBuf {
        loop {
            let candidate = self.pattern.backup_path(at);
            let mut compressed = candidate.clone().into_os_string();
            compressed.push(COMPRESSED_SUFFIX);
            if !candidate.exists() && !Path::new(&compressed).exists() {
                return candidate;
            }
            at += Duration::milliseconds(1);
        }
    }

    fn push_event(&mut self, event: RotationEvent) {
        if self.events.len() == MAX_PENDING_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn maintain_backups(&mut self, now: NaiveDateTime) -> io::Result<()> {
        let mut backups = list_backups(&self.pattern)?;

        if self.policy.compress_backups {
            for backup in backups.iter_mut().filter(|b| !b.compressed) {
                backup.path = compress_backup(&backup.path)?;
                backup.compressed = true;
            }
        }

        let expired: Vec<PathBuf> = self
            .policy
            .expired(&backups, now)
            .into_iter()
            .map(|b| b.path.clone())
            .collect();
        for backup in expired {
            fs::remove_file(&backup)?;
            self.push_event(RotationEvent::Removed { backup });
        }
        Ok(())
    }

    fn rotate_if_needed(&mut self) -> io::Result<()> {
        if !self.policy.should_rotate(self.size) {
            return Ok(());
        }
        // The file may have been reset underneath us since the counter was
        // last refreshed.
        if let Some(file) = &self.file {
            self.size = file.metadata()?.len();
        }
        if self.policy.should_rotate(self.size) {
            self.rotate()?;
        }
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.file.is_none() {
            self.open_active()?;
        }
        let written = match self.file.as_mut() {
            Some(file) => file.write(buf)?,
            None => return Err(io::Error::other("active log file is not open")),
        };
        self.size += written as u64;
        if let Err(error) = self.rotate_if_needed() {
            self.push_event(RotationEvent::RotationFailed {
                active: self.path.clone(),
                error,
            });
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Enumerate backups next to the active file, in directory order.
pub(crate) fn list_backups(pattern: &BackupPattern) -> io::Result<Vec<BackupFile>> {
    let mut backups = Vec::new();
    for entry in fs::read_dir(pattern.dir())? {
        let entry = entry?;
        if let Some(backup) = pattern.parse(&entry.file_name()) {
            backups.push(backup);
        }
    }
    Ok(backups)
}

/// Gzip `path` into `<path>.gz` and delete the original.
///
/// The compressed copy is synced before the original is removed, so a crash
/// leaves at worst both copies on disk.
fn compress_backup(path: &Path) -> io::Result<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(COMPRESSED_SUFFIX);
    let target = PathBuf::from(target);

    let mut source = File::open(path)?;
    let out = File::create(&target)?;
    let mut encoder = GzEncoder::new(out, Compression::default());
    io::copy(&mut source, &mut encoder)?;
    let out = encoder.finish()?;
    out.sync_data()?;
    drop(source);

    fs::remove_file(path)?;
    Ok(target)
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("log"));
    name.push(".lock");
    path.with_file_name(name)
}
