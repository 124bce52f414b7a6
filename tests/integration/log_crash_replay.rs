#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use burrow::primitives::stream::{BufferedStream, CommitStage};
use burrow::primitives::wal::{self, file_path, Log, LogOptions, COMMIT_MARKER, LOG_FILE_NAME};
use burrow::types::{FileId, Result};
use tempfile::tempdir;

const DATA: FileId = FileId(10);

fn no_sync() -> LogOptions {
    LogOptions { sync: false }
}

fn record(out: &mut Vec<u8>, file: i64, offset: i64, payload: &[u8]) {
    out.extend_from_slice(&file.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    out.extend_from_slice(payload);
}

fn marker(out: &mut Vec<u8>, since: usize) {
    let crc = crc32fast::hash(&out[since..]);
    record(out, COMMIT_MARKER, i64::from(crc), &[]);
}

fn read_data(dir: &Path) -> Vec<u8> {
    fs::read(file_path(dir, DATA)).unwrap_or_default()
}

#[test]
fn committed_but_unflushed_writes_are_replayed() -> Result<()> {
    let dir = tempdir()?;
    {
        let log = Arc::new(Log::open(dir.path(), no_sync())?);
        let mut stream = BufferedStream::open(Arc::clone(&log), dir.path(), DATA, 64, false)?;
        stream.write(b"hello, ")?;
        stream.write(b"durable world")?;
        assert!(log.commit()?);
        // Crash: the stream never flushes and the log is never reset.
    }
    assert!(read_data(dir.path()).is_empty());

    let log = Log::open(dir.path(), no_sync())?;
    let report = log.recovery();
    assert_eq!(report.transactions, 1);
    assert_eq!(report.entries_applied, 2);
    assert!(!report.torn_tail);
    assert_eq!(read_data(dir.path()), b"hello, durable world");
    assert_eq!(fs::metadata(dir.path().join(LOG_FILE_NAME))?.len(), 0);
    Ok(())
}

#[test]
fn uncommitted_writes_never_reach_the_file() -> Result<()> {
    let dir = tempdir()?;
    {
        let log = Arc::new(Log::open(dir.path(), no_sync())?);
        let mut stream = BufferedStream::open(Arc::clone(&log), dir.path(), DATA, 64, false)?;
        stream.write(b"first")?;
        log.commit()?;
        stream.commit(CommitStage::Flush)?;
        log.reset()?;
        stream.write(b" second")?;
    }
    let log = Log::open(dir.path(), no_sync())?;
    assert_eq!(log.recovery().transactions, 0);
    assert_eq!(read_data(dir.path()), b"first");
    Ok(())
}

#[test]
fn torn_tail_discards_only_the_open_transaction() -> Result<()> {
    let dir = tempdir()?;
    let mut bytes = Vec::new();
    record(&mut bytes, DATA.0, 0, b"hello");
    marker(&mut bytes, 0);
    let second = bytes.len();
    record(&mut bytes, DATA.0, 5, b"world");
    // Half of a third record.
    let mut partial = Vec::new();
    record(&mut partial, DATA.0, 10, b"!!!!");
    bytes.extend_from_slice(&partial[..partial.len() / 2]);
    fs::write(dir.path().join(LOG_FILE_NAME), &bytes)?;
    assert!(second < bytes.len());

    let report = wal::replay(dir.path(), false)?;
    assert_eq!(report.transactions, 1);
    assert_eq!(report.entries_discarded, 1);
    assert!(report.torn_tail);
    assert_eq!(read_data(dir.path()), b"hello");
    Ok(())
}

#[test]
fn bad_checksum_stops_replay() -> Result<()> {
    let dir = tempdir()?;
    let mut bytes = Vec::new();
    record(&mut bytes, DATA.0, 0, b"good");
    marker(&mut bytes, 0);
    record(&mut bytes, DATA.0, 4, b"evil");
    record(&mut bytes, COMMIT_MARKER, 12345, &[]);
    fs::write(dir.path().join(LOG_FILE_NAME), &bytes)?;

    let report = wal::replay(dir.path(), false)?;
    assert_eq!(report.transactions, 1);
    assert!(report.torn_tail);
    assert_eq!(read_data(dir.path()), b"good");
    Ok(())
}

#[test]
fn replay_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let mut bytes = Vec::new();
    record(&mut bytes, DATA.0, 0, b"abcdefgh");
    record(&mut bytes, DATA.0, 2, b"XY");
    marker(&mut bytes, 0);
    let log_path = dir.path().join(LOG_FILE_NAME);
    fs::write(&log_path, &bytes)?;
    wal::replay(dir.path(), false)?;
    let once = read_data(dir.path());

    fs::write(&log_path, &bytes)?;
    wal::replay(dir.path(), false)?;
    assert_eq!(read_data(dir.path()), once);
    assert_eq!(once, b"abXYefgh");
    Ok(())
}

#[test]
fn truncate_to_zero_deletes_the_file() -> Result<()> {
    let dir = tempdir()?;
    fs::write(file_path(dir.path(), DATA), b"stale contents")?;
    let mut bytes = Vec::new();
    record(&mut bytes, DATA.0, 0, &[]);
    marker(&mut bytes, 0);
    fs::write(dir.path().join(LOG_FILE_NAME), &bytes)?;

    let report = wal::replay(dir.path(), false)?;
    assert_eq!(report.files_deleted, vec![DATA.0]);
    assert!(!file_path(dir.path(), DATA).exists());
    Ok(())
}
