use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Terminal failure of a tail session.
///
/// Every variant ends the session that produced it and only that session.
#[derive(Debug, Error)]
pub enum TailError {
    /// The active file could not be opened or positioned.
    #[error("error opening log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The filesystem watch on the active file could not be registered.
    #[error("error watching log file {}: {source}", path.display())]
    Register {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Reading from the open handle failed mid-stream.
    #[error("error reading log file: {0}")]
    Read(#[source] io::Error),

    /// The watcher reported a delivery failure.
    #[error("file watcher error: {0}")]
    Watch(#[source] notify::Error),

    /// The watcher's event channel shut down underneath the session.
    #[error("file watcher event channel closed")]
    WatchClosed,
}

/// Coarse classification of a [`TailError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailErrorKind {
    /// The file could not be opened or watched, initially or on reopen.
    Open,
    /// A read from an open handle failed.
    Read,
    /// The watch delivery path failed.
    Watch,
}

impl TailError {
    pub fn kind(&self) -> TailErrorKind {
        match self {
            TailError::Open { .. } | TailError::Register { .. } => TailErrorKind::Open,
            TailError::Read(_) => TailErrorKind::Read,
            TailError::Watch(_) | TailError::WatchClosed => TailErrorKind::Watch,
        }
    }
}
