//! Bridges a [`TailSession`] to a single push connection.
//!
//! Each client gets its own session, spawned as its own task. The session's
//! lines arrive as [`StreamMessage::Log`]; a terminal failure arrives once as
//! [`StreamMessage::Error`] after every line that preceded it, and then the
//! stream ends. Dropping the stream (client disconnect) closes the line
//! channel, which the session observes as cancellation.

use crate::tail::TailSession;
use axum::response::sse::Event;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, warn};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Lines buffered between a session and a slow client before the session
/// waits.
const LINE_BUFFER: usize = 256;

/// One message on the push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// One line of the log, including its trailing newline.
    Log(String),
    /// Terminal error description. Always the last message.
    Error(String),
}

impl StreamMessage {
    /// Event name on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamMessage::Log(_) => "log",
            StreamMessage::Error(_) => "error",
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            StreamMessage::Log(payload) | StreamMessage::Error(payload) => payload,
        }
    }

    /// Encode as a server-sent event.
    ///
    /// SSE cannot carry carriage returns, so they are dropped from the
    /// payload; `\n` is preserved and split across `data:` fields.
    pub fn into_sse(self) -> Event {
        let name = self.event_name();
        let payload = match self {
            StreamMessage::Log(payload) | StreamMessage::Error(payload) => payload,
        };
        let payload = if payload.contains('\r') {
            payload.replace('\r', "")
        } else {
            payload
        };
        Event::default().event(name).data(payload)
    }
}

/// Start tailing `path` for one client.
///
/// The file is opened immediately; if that fails the stream yields a single
/// error message. Otherwise the session runs on its own task until `cancel`
/// fires, the returned stream is dropped, or the session fails.
pub fn tail_messages(path: &Path, cancel: CancellationToken) -> BoxStream<'static, StreamMessage> {
    let session = match TailSession::open(path) {
        Ok(session) => session,
        Err(e) => {
            warn!("tail of {} failed to start: {e}", path.display());
            return stream::once(future::ready(StreamMessage::Error(e.to_string()))).boxed();
        }
    };

    let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);
    let (done_tx, done_rx) = oneshot::channel();
    let display = path.display().to_string();

    tokio::spawn(async move {
        let result = session.run(cancel, line_tx).await;
        match &result {
            Ok(()) => debug!("tail of {display} ended"),
            Err(e) => warn!("tail of {display} failed: {e}"),
        }
        let _ = done_tx.send(result);
    });

    // The line stream only ends once the session has returned and dropped
    // its sender, so the outcome is always read after the last line.
    let lines = ReceiverStream::new(line_rx).map(StreamMessage::Log);
    let outcome = stream::once(done_rx).filter_map(|result| {
        future::ready(match result {
            Ok(Err(e)) => Some(StreamMessage::Error(e.to_string())),
            _ => None,
        })
    });

    lines.chain(outcome).boxed()
}
