//! Live tailing of the active log file.
//!
//! A [`TailSession`] owns one read handle ([`TailCursor`]) and one filesystem
//! watch on the active path. It wakes only on watcher events, so cancellation
//! is never stuck behind a blocking read.
//!
//! Event handling hinges on an asymmetry in how the file changes:
//!
//! - a reset truncates in place, so the session sees a write that leaves the
//!   file shorter than the cursor and rewinds to the start;
//! - a rotation renames the file away, so the session sees a remove/rename
//!   (or a write after which the path names a different file) and reopens
//!   the path, reading the replacement from its start.
//!
//! The file being tailed is usually the server's own log, so nothing here
//! logs per event, and the attach message is written before the cursor is
//! positioned.

use crate::error::TailError;
use log::{debug, trace};
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::{self, File, Metadata};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type WatchEvent = notify::Result<notify::Event>;

/// Read position in the active file.
///
/// Only complete, newline-terminated lines are handed out. Bytes of a
/// trailing partial line are held back until the rest of the line arrives;
/// they count towards [`offset`](TailCursor::offset) because they have been
/// consumed from the file.
#[derive(Debug)]
pub struct TailCursor {
    reader: BufReader<File>,
    offset: u64,
    pending: Vec<u8>,
}

impl TailCursor {
    /// Open `path` positioned at its current end.
    pub fn open_at_end(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let offset = file.seek(SeekFrom::End(0))?;
        Ok(TailCursor {
            reader: BufReader::new(file),
            offset,
            pending: Vec::new(),
        })
    }

    /// Open `path` positioned at its start.
    pub fn open_at_start(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(TailCursor {
            reader: BufReader::new(file),
            offset: 0,
            pending: Vec::new(),
        })
    }

    /// Bytes consumed from the file so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes of an incomplete trailing line read but not yet emitted.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Metadata of the open handle (not of whatever the path points to now).
    pub fn metadata(&self) -> io::Result<Metadata> {
        self.reader.get_ref().metadata()
    }

    /// Rewind to the start if the file shrank below the cursor.
    ///
    /// Returns `true` when a truncation was detected.
    pub fn check_truncation(&mut self) -> io::Result<bool> {
        let size = self.metadata()?.len();
        if size >= self.offset {
            return Ok(false);
        }
        self.reader.seek(SeekFrom::Start(0))?;
        self.offset = 0;
        self.pending.clear();
        Ok(true)
    }

    /// Read every complete line currently available, in file order.
    ///
    /// Each returned line keeps its trailing `\n`. Invalid UTF-8 is replaced
    /// rather than rejected.
    pub fn read_lines(&mut self) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let n = self.reader.read_until(b'\n', &mut self.pending)?;
            if n == 0 {
                break;
            }
            self.offset += n as u64;
            if self.pending.last() == Some(&b'\n') {
                lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                self.pending.clear();
            }
        }
        Ok(lines)
    }

    /// Handle a write notification: truncation check, then read.
    pub fn poll(&mut self) -> io::Result<Vec<String>> {
        self.check_truncation()?;
        self.read_lines()
    }
}

/// Lifecycle of a [`TailSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Streaming,
    Reopening,
    Closed,
}

/// What a filesystem event means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    /// Content may have changed: re-stat and read.
    Write,
    /// The path was removed or renamed away from the open file.
    Rotate,
    Ignore,
}

pub(crate) fn classify(kind: &EventKind) -> Change {
    match kind {
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => Change::Rotate,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            Change::Write
        }
        EventKind::Access(_) => Change::Ignore,
    }
}

/// Streams lines appended to one log file to one consumer.
///
/// Created with [`TailSession::open`] and driven to completion by
/// [`TailSession::run`]. Dropping the session releases the file handle and
/// the watch.
pub struct TailSession {
    path: PathBuf,
    cursor: TailCursor,
    watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<WatchEvent>,
    state: SessionState,
}

impl std::fmt::Debug for TailSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailSession")
            .field("path", &self.path)
            .field("offset", &self.cursor.offset())
            .field("state", &self.state)
            .finish()
    }
}

impl TailSession {
    /// Open the file at its end and start watching its path.
    ///
    /// A newly opened session never replays existing content.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::Open`] if the file cannot be opened and
    /// [`TailError::Register`] if the watch cannot be set up.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TailError> {
        let path = path.as_ref().to_path_buf();
        debug!("tailing {}", path.display());
        let cursor = open_cursor(&path)?;

        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: WatchEvent| {
            // The receiver is gone once the session ends.
            let _ = tx.send(res);
        })
        .map_err(|source| TailError::Register {
            path: path.clone(),
            source,
        })?;
        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|source| TailError::Register {
                path: path.clone(),
                source,
            })?;

        Ok(TailSession {
            path,
            cursor,
            watcher,
            events,
            state: SessionState::Opening,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current cursor offset into the open file.
    pub fn offset(&self) -> u64 {
        self.cursor.offset()
    }

    /// Stream lines into `lines` until cancelled or failed.
    ///
    /// The session stops cleanly when `cancel` fires or when the receiving
    /// end of `lines` is dropped. Any error is terminal and ends the session.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        lines: mpsc::Sender<String>,
    ) -> Result<(), TailError> {
        self.transition(SessionState::Streaming);
        let result = self.stream(&cancel, &lines).await;
        self.transition(SessionState::Closed);
        result
    }

    async fn stream(
        &mut self,
        cancel: &CancellationToken,
        lines: &mpsc::Sender<String>,
    ) -> Result<(), TailError> {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = lines.closed() => return Ok(()),
                event = self.events.recv() => event,
            };

            let event = match event {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(TailError::Watch(e)),
                None => return Err(TailError::WatchClosed),
            };

            match classify(&event.kind) {
                Change::Ignore => continue,
                Change::Write => {
                    if !self.forward(cancel, lines).await? {
                        return Ok(());
                    }
                    // An unlink or a rename onto the path only shows up as
                    // a write (attribute change) on the open file.
                    if self.path_status() != PathStatus::Replaced {
                        continue;
                    }
                }
                Change::Rotate => {
                    // Queued from an inode this session already left behind.
                    if self.path_status() == PathStatus::Current {
                        continue;
                    }
                }
            }

            self.reopen()?;
            if !self.forward(cancel, lines).await? {
                return Ok(());
            }
        }
    }

    /// Send every available line. Returns `false` if the consumer went away
    /// or the session was cancelled mid-send.
    async fn forward(
        &mut self,
        cancel: &CancellationToken,
        lines: &mpsc::Sender<String>,
    ) -> Result<bool, TailError> {
        if self.cursor.check_truncation().map_err(TailError::Read)? {
            debug!("{} was truncated, reading from start", self.path.display());
        }

        for line in self.cursor.read_lines().map_err(TailError::Read)? {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(false),
                sent = lines.send(line) => {
                    if sent.is_err() {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// Swap to whatever file the path names now.
    ///
    /// The replacement is read from its start: a rotation creates it empty,
    /// so anything already in it was written after the rotation.
    fn reopen(&mut self) -> Result<(), TailError> {
        self.transition(SessionState::Reopening);

        if let Err(e) = self.watcher.unwatch(&self.path) {
            trace!("unwatch {} during reopen: {e}", self.path.display());
        }
        self.cursor = TailCursor::open_at_start(&self.path).map_err(|source| TailError::Open {
            path: self.path.clone(),
            source,
        })?;
        self.watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|source| TailError::Register {
                path: self.path.clone(),
                source,
            })?;

        debug!("reopened {} after rotation", self.path.display());
        self.transition(SessionState::Streaming);
        Ok(())
    }

    fn path_status(&self) -> PathStatus {
        let at_path = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(_) => return PathStatus::Replaced,
        };
        match self.cursor.metadata().map(|open| same_file(&at_path, &open)) {
            Ok(Some(true)) => PathStatus::Current,
            Ok(Some(false)) => PathStatus::Replaced,
            _ => PathStatus::Unknown,
        }
    }

    fn transition(&mut self, next: SessionState) {
        self.state = next;
    }
}

/// Relation between the watched path and the open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathStatus {
    /// The path names the open file.
    Current,
    /// The path is gone or names another file.
    Replaced,
    /// File identity is not available on this platform.
    Unknown,
}

fn open_cursor(path: &Path) -> Result<TailCursor, TailError> {
    TailCursor::open_at_end(path).map_err(|source| TailError::Open {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> Option<bool> {
    use std::os::unix::fs::MetadataExt;
    Some(a.dev() == b.dev() && a.ino() == b.ino())
}

#[cfg(not(unix))]
fn same_file(_: &Metadata, _: &Metadata) -> Option<bool> {
    None
}
