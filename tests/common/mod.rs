#![allow(dead_code)]

use futures::StreamExt;
use futures::stream::BoxStream;
use logtail::{StreamMessage, TailError, TailSession};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a test waits for an expected line before failing.
pub const LINE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a test waits to conclude nothing more is coming.
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

/// Time given to the watcher to deliver and the session to process events
/// that must be observed before the next filesystem change.
pub const SETTLE: Duration = Duration::from_millis(200);

pub fn log_path(dir: &Path) -> PathBuf {
    dir.join("controlserver.log")
}

pub fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
}

pub fn truncate(path: &Path) {
    OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap()
        .set_len(0)
        .unwrap();
}

/// Rename the active file away and create a fresh empty one in its place,
/// the way a rotating writer does.
pub fn rotate_by_hand(path: &Path, backup: &Path) {
    fs::rename(path, backup).unwrap();
    fs::File::create(path).unwrap();
}

pub async fn settle() {
    tokio::time::sleep(SETTLE).await;
}

/// A running tail session with its consuming end.
pub struct Tail {
    pub lines: mpsc::Receiver<String>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<Result<(), TailError>>,
}

impl Tail {
    pub fn start(path: &Path) -> Tail {
        let session = TailSession::open(path).unwrap();
        let (tx, lines) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(session.run(cancel.clone(), tx));
        Tail {
            lines,
            cancel,
            handle,
        }
    }

    pub async fn next_line(&mut self) -> String {
        tokio::time::timeout(LINE_TIMEOUT, self.lines.recv())
            .await
            .expect("timed out waiting for a line")
            .expect("session ended while a line was expected")
    }

    pub async fn assert_quiet(&mut self) {
        if let Ok(Some(line)) = tokio::time::timeout(QUIET_PERIOD, self.lines.recv()).await {
            panic!("unexpected line {line:?}");
        }
    }

    /// Wait for the session to end and return its outcome.
    pub async fn finish(self) -> Result<(), TailError> {
        tokio::time::timeout(LINE_TIMEOUT, self.handle)
            .await
            .expect("session did not end")
            .expect("session task panicked")
    }
}

pub async fn next_message(stream: &mut BoxStream<'static, StreamMessage>) -> Option<StreamMessage> {
    tokio::time::timeout(LINE_TIMEOUT, stream.next())
        .await
        .expect("timed out waiting for a stream message")
}

pub fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
