mod common;

use common::{Tail, log_path, names, settle};
use flate2::read::GzDecoder;
use logtail::{BackupPattern, RotatingFile, RotationEvent, RotationPolicy, store};
use std::fs;
use std::io::{Read, Write};
use tempfile::tempdir;

fn small_file(path: &std::path::Path) -> RotatingFile {
    RotatingFile::builder(path)
        .max_size_bytes(16)
        .max_backups(0)
        .max_age_days(0)
        .compress_backups(false)
        .open()
        .unwrap()
}

#[test]
fn test_no_rotation_below_threshold() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    let mut file = small_file(&path);

    file.write_all(b"0123456789abcde\n").unwrap();

    assert_eq!(fs::read(&path).unwrap(), b"0123456789abcde\n");
    assert!(file.backups().unwrap().is_empty());
    assert_eq!(file.size(), 16);
}

#[test]
fn test_exceeding_threshold_rotates_after_append() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    let mut file = small_file(&path);

    file.write_all(b"first line\n").unwrap();
    file.write_all(b"second line\n").unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    assert_eq!(file.size(), 0);

    let backups = file.backups().unwrap();
    assert_eq!(backups.len(), 1);
    assert!(!backups[0].compressed);
    assert_eq!(
        fs::read(&backups[0].path).unwrap(),
        b"first line\nsecond line\n"
    );

    let pattern = BackupPattern::for_active(&path);
    assert!(pattern.matches(backups[0].path.file_name().unwrap()));
}

#[test]
fn test_writes_continue_in_fresh_file() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    let mut file = small_file(&path);

    file.write_all(b"this line is long enough\n").unwrap();
    file.write_all(b"next\n").unwrap();

    assert_eq!(fs::read(&path).unwrap(), b"next\n");
}

#[test]
fn test_compressed_backup_holds_rotated_content() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    let mut file = RotatingFile::builder(&path)
        .max_size_bytes(8)
        .compress_backups(true)
        .open()
        .unwrap();

    file.write_all(b"compress me please\n").unwrap();

    let backups = file.backups().unwrap();
    assert_eq!(backups.len(), 1);
    assert!(backups[0].compressed);
    assert!(
        backups[0]
            .path
            .to_string_lossy()
            .ends_with(".log.gz")
    );

    let mut decoded = String::new();
    GzDecoder::new(fs::File::open(&backups[0].path).unwrap())
        .read_to_string(&mut decoded)
        .unwrap();
    assert_eq!(decoded, "compress me please\n");
}

#[test]
fn test_max_backups_keeps_newest() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    let mut file = RotatingFile::builder(&path)
        .max_size_bytes(4)
        .max_backups(2)
        .max_age_days(0)
        .compress_backups(false)
        .open()
        .unwrap();

    // One write call per line; formatted writes could split a line across
    // several calls and rotate between them.
    for i in 0..5 {
        file.write_all(format!("rotation {i}\n").as_bytes()).unwrap();
    }

    let backups = store::backups(&path).unwrap();
    assert_eq!(backups.len(), 2);
    assert_eq!(fs::read(&backups[0].path).unwrap(), b"rotation 4\n");
    assert_eq!(fs::read(&backups[1].path).unwrap(), b"rotation 3\n");
}

#[test]
fn test_max_age_removes_old_backups() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    let ancient = dir.path().join("controlserver-2001-01-01T00-00-00.000.log");
    fs::write(&ancient, "old\n").unwrap();

    let mut file = RotatingFile::builder(&path)
        .max_size_bytes(4)
        .max_backups(0)
        .max_age_days(7)
        .compress_backups(false)
        .open()
        .unwrap();
    file.write_all(b"trigger\n").unwrap();

    assert!(!ancient.exists());
    assert_eq!(file.backups().unwrap().len(), 1);
}

#[test]
fn test_manual_rotate() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    let mut file = RotatingFile::open(&path, RotationPolicy::default()).unwrap();

    file.write_all(b"before\n").unwrap();
    file.rotate().unwrap();
    file.write_all(b"after\n").unwrap();

    assert_eq!(fs::read(&path).unwrap(), b"after\n");
    assert_eq!(file.backups().unwrap().len(), 1);
}

#[test]
fn test_reset_does_not_cause_spurious_rotation() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    let mut file = small_file(&path);

    file.write_all(b"0123456789\n").unwrap();
    store::reset(&path).unwrap();
    file.write_all(b"abcdefghij\n").unwrap();

    assert!(file.backups().unwrap().is_empty());
    assert_eq!(fs::read(&path).unwrap(), b"abcdefghij\n");
}

#[test]
fn test_write_after_close_reopens() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    let mut file = small_file(&path);

    file.write_all(b"one\n").unwrap();
    file.close().unwrap();
    file.write_all(b"two\n").unwrap();

    assert_eq!(fs::read(&path).unwrap(), b"one\ntwo\n");
}

#[test]
fn test_rotation_is_queued_as_event() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    let mut file = small_file(&path);

    file.write_all(b"long enough to rotate\n").unwrap();

    let events = file.take_events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        RotationEvent::Rotated { active, backup } => {
            assert_eq!(active, &path);
            assert_eq!(backup, &file.backups().unwrap()[0].path);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(events[0].level(), log::Level::Debug);
    assert!(file.take_events().is_empty());
}

#[test]
fn test_failed_rotation_does_not_fail_write() {
    let dir = tempdir().unwrap();
    let logs = dir.path().join("logs");
    let path = log_path(&logs);
    let mut file = small_file(&path);
    // With the directory gone the append lands in the unlinked inode but
    // the fresh active file cannot be created.
    fs::remove_dir_all(&logs).unwrap();

    let written = file.write(b"long enough to rotate\n").unwrap();
    assert_eq!(written, 22);

    let events = file.take_events();
    assert_eq!(events.len(), 1);
    assert!(
        matches!(&events[0], RotationEvent::RotationFailed { active, .. } if active == &path),
        "{events:?}"
    );
    assert_eq!(events[0].level(), log::Level::Warn);
    assert!(events[0].to_string().starts_with("rotating "));
}

#[test]
fn test_zero_max_size_rejected() {
    let dir = tempdir().unwrap();
    let err = RotatingFile::builder(log_path(dir.path()))
        .max_size_bytes(0)
        .open()
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn test_second_writer_fails() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    let _first = small_file(&path);

    let err = RotatingFile::builder(&path).open().unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
    assert!(err.to_string().contains("controlserver.log"));
}

#[test]
fn test_lock_released_on_drop() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    {
        let _first = small_file(&path);
    }
    let _second = small_file(&path);
}

#[tokio::test]
async fn test_tail_follows_size_triggered_rotation() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path());
    let mut file = RotatingFile::builder(&path)
        .max_size_bytes(32)
        .max_backups(0)
        .max_age_days(0)
        .compress_backups(false)
        .open()
        .unwrap();
    file.write_all(b"written before anyone watched\n").unwrap();

    let mut tail = Tail::start(&path);

    file.write_all(b"pushes the file over\n").unwrap();
    assert_eq!(tail.next_line().await, "pushes the file over\n");

    let backups = file.backups().unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    settle().await;

    file.write_all(b"after rotation\n").unwrap();
    assert_eq!(tail.next_line().await, "after rotation\n");
    tail.assert_quiet().await;

    assert_eq!(
        names(dir.path()).len(),
        3,
        "active file, its lock and one backup"
    );
}
