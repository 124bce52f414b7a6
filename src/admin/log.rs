use std::fs;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::primitives::wal::{self, LogReader, LogRecord, RecoveryReport, LOG_FILE_NAME};

use crate::admin::util::require_dir;
use crate::admin::Result;

const PREVIEW_BYTES: usize = 16;

/// One decoded log record as shown by `burrow log`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    /// Bytes written at an absolute offset.
    Write {
        /// Target file id.
        file: i64,
        /// Byte offset inside the target.
        offset: u64,
        /// Payload length.
        len: usize,
        /// Hex of the first payload bytes.
        preview: String,
    },
    /// Truncation (length zero deletes the file).
    Truncate {
        /// Target file id.
        file: i64,
        /// New length.
        len: u64,
    },
    /// End of a transaction.
    Commit {
        /// Stored checksum.
        checksum: u32,
        /// Whether the checksum matches the preceding records.
        valid: bool,
    },
}

/// Contents of a log file, read without applying anything.
#[derive(Debug, Clone, Serialize)]
pub struct LogReport {
    /// Path of the log file.
    pub path: String,
    /// Whether the log file exists.
    pub exists: bool,
    /// Size of the log file.
    pub size_bytes: u64,
    /// Transactions closed by a valid marker.
    pub committed_transactions: u64,
    /// Records after the last valid marker; replay discards them.
    pub uncommitted_entries: u64,
    /// Whether the reader stopped at a partial record or bad marker.
    pub torn_tail: bool,
    /// Decoded records, at most `limit` of them.
    pub entries: Vec<LogEntry>,
    /// Records left out because of `limit`.
    pub truncated: u64,
}

/// Lists the records of the log in `dir` without replaying them.
pub fn inspect_log(dir: impl AsRef<Path>, limit: Option<usize>) -> Result<LogReport> {
    let dir = dir.as_ref();
    require_dir(dir)?;
    let path = dir.join(LOG_FILE_NAME);
    let mut report = LogReport {
        path: path.display().to_string(),
        exists: path.exists(),
        size_bytes: 0,
        committed_transactions: 0,
        uncommitted_entries: 0,
        torn_tail: false,
        entries: Vec::new(),
        truncated: 0,
    };
    if !report.exists {
        return Ok(report);
    }
    report.size_bytes = fs::metadata(&path)?.len();
    let mut reader = LogReader::open(&path)?;
    let mut open = 0u64;
    while let Some(record) = reader.next_record()? {
        let entry = match record {
            LogRecord::Write { file, offset, data } => {
                open += 1;
                LogEntry::Write {
                    file: file.0,
                    offset,
                    len: data.len(),
                    preview: hex::encode(&data[..data.len().min(PREVIEW_BYTES)]),
                }
            }
            LogRecord::Truncate { file, len } => {
                open += 1;
                LogEntry::Truncate { file: file.0, len }
            }
            LogRecord::Commit { checksum, valid } => {
                if valid {
                    report.committed_transactions += 1;
                    open = 0;
                } else {
                    report.torn_tail = true;
                }
                LogEntry::Commit { checksum, valid }
            }
        };
        if limit.map_or(true, |l| report.entries.len() < l) {
            report.entries.push(entry);
        } else {
            report.truncated += 1;
        }
        if report.torn_tail {
            break;
        }
    }
    report.torn_tail |= reader.torn();
    report.uncommitted_entries = open;
    Ok(report)
}

/// Outcome of `burrow recover`.
#[derive(Debug, Clone, Serialize)]
pub struct RecoverReport {
    /// Database directory.
    pub dir: String,
    /// What replay did.
    pub recovery: RecoveryReport,
    /// Wall time spent replaying.
    pub duration_ms: f64,
}

/// Replays the log in `dir`, completing committed transactions and
/// discarding the rest.
pub fn recover(dir: impl AsRef<Path>, sync: bool) -> Result<RecoverReport> {
    let dir = dir.as_ref();
    require_dir(dir)?;
    let started = Instant::now();
    let recovery = wal::replay(dir, sync)?;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(
        dir = %dir.display(),
        transactions = recovery.transactions,
        duration_ms,
        "admin.recover"
    );
    Ok(RecoverReport {
        dir: dir.display().to_string(),
        recovery,
        duration_ms,
    })
}
