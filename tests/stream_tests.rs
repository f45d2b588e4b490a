mod common;

use common::{append, log_path, next_message};
use logtail::{StreamMessage, tail_messages};
use std::fs;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_lines_become_log_messages() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    append(&path, "already there\n");

    let cancel = CancellationToken::new();
    let mut stream = tail_messages(&path, cancel.clone());
    append(&path, "first\nsecond\n");

    assert_eq!(
        next_message(&mut stream).await,
        Some(StreamMessage::Log("first\n".into()))
    );
    assert_eq!(
        next_message(&mut stream).await,
        Some(StreamMessage::Log("second\n".into()))
    );

    cancel.cancel();
    assert_eq!(next_message(&mut stream).await, None);
}

#[tokio::test]
async fn test_missing_file_yields_single_error() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());

    let mut stream = tail_messages(&path, CancellationToken::new());

    match next_message(&mut stream).await {
        Some(StreamMessage::Error(message)) => {
            assert!(message.contains("controlserver.log"), "{message}");
        }
        other => panic!("expected an error message, got {other:?}"),
    }
    assert_eq!(next_message(&mut stream).await, None);
}

#[tokio::test]
async fn test_session_failure_arrives_after_its_lines() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    append(&path, "");

    let mut stream = tail_messages(&path, CancellationToken::new());
    append(&path, "last words\n");
    assert_eq!(
        next_message(&mut stream).await,
        Some(StreamMessage::Log("last words\n".into()))
    );

    fs::remove_file(&path).unwrap();

    let message = next_message(&mut stream).await;
    assert!(
        matches!(message, Some(StreamMessage::Error(_))),
        "got {message:?}"
    );
    assert_eq!(next_message(&mut stream).await, None);
}

#[tokio::test]
async fn test_cancelled_parent_ends_stream() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    append(&path, "");

    let parent = CancellationToken::new();
    let mut stream = tail_messages(&path, parent.child_token());
    parent.cancel();

    assert_eq!(next_message(&mut stream).await, None);
}
