#![forbid(unsafe_code)]
//! Redo log of absolute byte-range writes and truncations.
//!
//! Record layout (little-endian): `[file id: i64][offset: i64][size: i32][payload]`.
//! `size == 0` truncates the target to `offset` (a zero-length result deletes it).
//! [`Log::commit`] closes a transaction with a marker record whose file id is
//! [`COMMIT_MARKER`] and whose offset carries the CRC-32 of every record byte
//! written since the previous marker. Replay only applies marker-closed runs
//! with a matching checksum, so a torn tail is treated as a transaction that
//! never happened.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::primitives::bytes::le;
use crate::primitives::io::{remove_file, FileIo, StdFileIo};
use crate::types::{BurrowError, FileId, Result};

/// Bytes preceding each record payload.
pub const RECORD_HEADER_LEN: usize = 20;
/// File id reserved for commit markers.
pub const COMMIT_MARKER: i64 = -1;
/// Name of the log file inside the database directory.
pub const LOG_FILE_NAME: &str = "log";

const SPILL_THRESHOLD: usize = 1 << 16;

/// Path of the data file numbered `id` inside `dir`.
pub fn file_path(dir: &Path, id: FileId) -> PathBuf {
    dir.join(id.0.to_string())
}

/// Configuration options for opening the log.
#[derive(Clone, Debug)]
pub struct LogOptions {
    /// Fsync the log on commit and every file touched by replay.
    pub sync: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self { sync: true }
    }
}

/// Counters describing log activity since open.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct LogStats {
    /// Write and truncate records appended.
    pub entries_logged: u64,
    /// Record bytes appended, headers included.
    pub bytes_logged: u64,
    /// Commits that carried at least one record.
    pub commits: u64,
    /// Fsync calls issued on the log file.
    pub syncs: u64,
    /// Times the log was emptied.
    pub resets: u64,
}

/// Outcome of replaying a log at open.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct RecoveryReport {
    /// Committed transactions re-applied.
    pub transactions: u64,
    /// Write and truncate records re-applied.
    pub entries_applied: u64,
    /// Records dropped because their transaction was never committed.
    pub entries_discarded: u64,
    /// True when the log ended with an incomplete record or a bad marker.
    pub torn_tail: bool,
    /// Files written or truncated by replay.
    pub files_touched: Vec<i64>,
    /// Files deleted because replay left them empty.
    pub files_deleted: Vec<i64>,
}

/// One decoded log record.
#[derive(Clone, Debug, PartialEq)]
pub enum LogRecord {
    /// Absolute bytes for `file` at `offset`.
    Write {
        /// Target file.
        file: FileId,
        /// Byte offset of the payload.
        offset: u64,
        /// Payload bytes.
        data: Vec<u8>,
    },
    /// Truncate `file` to `len` bytes.
    Truncate {
        /// Target file.
        file: FileId,
        /// New length; zero deletes the file.
        len: u64,
    },
    /// End of a transaction.
    Commit {
        /// Checksum stored in the marker.
        checksum: u32,
        /// Whether it matches the records read since the previous marker.
        valid: bool,
    },
}

fn encode_header(out: &mut Vec<u8>, file: i64, offset: i64, size: i32) {
    out.extend_from_slice(&file.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
}

struct LogState {
    pending: Vec<u8>,
    append_offset: u64,
    hasher: crc32fast::Hasher,
    open_entries: u64,
    stats: LogStats,
}

impl LogState {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            append_offset: 0,
            hasher: crc32fast::Hasher::new(),
            open_entries: 0,
            stats: LogStats::default(),
        }
    }

    fn push(&mut self, file: FileId, offset: u64, payload: &[u8]) -> Result<()> {
        let size = i32::try_from(payload.len())
            .map_err(|_| BurrowError::Invalid("log payload exceeds i32::MAX bytes"))?;
        let offset =
            i64::try_from(offset).map_err(|_| BurrowError::Invalid("log offset out of range"))?;
        let start = self.pending.len();
        encode_header(&mut self.pending, file.0, offset, size);
        self.pending.extend_from_slice(payload);
        self.hasher.update(&self.pending[start..]);
        self.open_entries += 1;
        self.stats.entries_logged += 1;
        self.stats.bytes_logged += (self.pending.len() - start) as u64;
        Ok(())
    }

    fn spill(&mut self, io: &dyn FileIo) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        io.write_at(self.append_offset, &self.pending)?;
        self.append_offset += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }
}

/// Write-ahead redo log shared by every stream of a database.
pub struct Log {
    dir: PathBuf,
    io: Arc<dyn FileIo>,
    options: LogOptions,
    recovery: RecoveryReport,
    state: Mutex<LogState>,
}

impl Log {
    /// Opens (creating if needed) the log in `dir` and replays any committed
    /// transactions it still holds before returning.
    pub fn open(dir: impl AsRef<Path>, options: LogOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(dir.join(LOG_FILE_NAME))?);
        let recovery = replay_io(&dir, &io, options.sync)?;
        Ok(Self {
            dir,
            io,
            options,
            recovery,
            state: Mutex::new(LogState::new()),
        })
    }

    /// Directory holding the log and its data files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// What replay did when this log was opened.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Records that `data` must be written to `file` at `offset`.
    pub fn log_write(&self, file: FileId, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        state.push(file, offset, data)?;
        if state.pending.len() >= SPILL_THRESHOLD {
            state.spill(self.io.as_ref())?;
        }
        Ok(())
    }

    /// Records that `file` must be truncated to `len` (deleted when `len == 0`).
    pub fn set_length(&self, file: FileId, len: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.push(file, len, &[])
    }

    /// Makes every record since the last reset durable. Returns `false` when
    /// there was nothing to commit.
    pub fn commit(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if state.open_entries == 0 {
            return Ok(false);
        }
        let hasher = std::mem::replace(&mut state.hasher, crc32fast::Hasher::new());
        let checksum = hasher.finalize();
        encode_header(&mut state.pending, COMMIT_MARKER, i64::from(checksum), 0);
        state.spill(self.io.as_ref())?;
        if self.options.sync {
            self.io.sync_all()?;
            state.stats.syncs += 1;
        }
        state.stats.commits += 1;
        debug!(
            entries = state.open_entries,
            bytes = state.append_offset,
            "log.commit"
        );
        state.open_entries = 0;
        Ok(true)
    }

    /// Empties the log. Called once every target file is durable, or to
    /// abandon an uncommitted transaction.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        let had_bytes = state.append_offset > 0;
        state.pending.clear();
        state.hasher = crc32fast::Hasher::new();
        state.open_entries = 0;
        state.append_offset = 0;
        state.stats.resets += 1;
        if had_bytes {
            self.io.set_len(0)?;
            if self.options.sync {
                self.io.sync_all()?;
                state.stats.syncs += 1;
            }
        }
        Ok(())
    }

    /// True when no record has been logged since the last reset.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.open_entries == 0 && state.append_offset == 0
    }

    /// Returns current statistics for this log.
    pub fn stats(&self) -> LogStats {
        self.state.lock().stats.clone()
    }
}

/// Sequential reader over a log file.
///
/// Yields `None` at end of file or at an incomplete trailing record.
pub struct LogReader {
    io: Arc<dyn FileIo>,
    offset: u64,
    end: u64,
    hasher: crc32fast::Hasher,
    torn: bool,
}

impl LogReader {
    /// Reads the log file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path)?);
        Self::new(io)
    }

    fn new(io: Arc<dyn FileIo>) -> Result<Self> {
        let end = io.len()?;
        Ok(Self {
            io,
            offset: 0,
            end,
            hasher: crc32fast::Hasher::new(),
            torn: false,
        })
    }

    /// True once the reader stopped at a partial record.
    pub fn torn(&self) -> bool {
        self.torn
    }

    /// Offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next record.
    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        if self.offset >= self.end {
            return Ok(None);
        }
        let mut header = [0u8; RECORD_HEADER_LEN];
        if self.end - self.offset < RECORD_HEADER_LEN as u64
            || self.io.read_at(self.offset, &mut header)? < RECORD_HEADER_LEN
        {
            return Ok(self.stop_torn());
        }
        let file = le::get_i64(&header[0..8]);
        let offset = le::get_i64(&header[8..16]);
        let size = le::get_i32(&header[16..20]);
        if file == COMMIT_MARKER {
            self.offset += RECORD_HEADER_LEN as u64;
            let hasher = std::mem::replace(&mut self.hasher, crc32fast::Hasher::new());
            let checksum = offset as u32;
            let valid = size == 0 && offset >= 0 && hasher.finalize() == checksum;
            return Ok(Some(LogRecord::Commit { checksum, valid }));
        }
        if size < 0 || offset < 0 {
            return Ok(self.stop_torn());
        }
        let total = RECORD_HEADER_LEN as u64 + size as u64;
        if self.end - self.offset < total {
            return Ok(self.stop_torn());
        }
        let mut data = vec![0u8; size as usize];
        if self
            .io
            .read_at(self.offset + RECORD_HEADER_LEN as u64, &mut data)?
            < data.len()
        {
            return Ok(self.stop_torn());
        }
        self.hasher.update(&header);
        self.hasher.update(&data);
        self.offset += total;
        let file = FileId(file);
        let record = if size == 0 {
            LogRecord::Truncate {
                file,
                len: offset as u64,
            }
        } else {
            LogRecord::Write {
                file,
                offset: offset as u64,
                data,
            }
        };
        Ok(Some(record))
    }

    fn stop_torn(&mut self) -> Option<LogRecord> {
        self.torn = true;
        self.offset = self.end;
        None
    }
}

impl Iterator for LogReader {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Replays the log found in `dir` and empties it. Safe to call repeatedly:
/// every record carries absolute bytes, so applying a transaction twice
/// yields the same files as applying it once.
pub fn replay(dir: impl AsRef<Path>, sync: bool) -> Result<RecoveryReport> {
    let dir = dir.as_ref();
    let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(dir.join(LOG_FILE_NAME))?);
    replay_io(dir, &io, sync)
}

fn replay_io(dir: &Path, io: &Arc<dyn FileIo>, sync: bool) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let len = io.len()?;
    if len == 0 {
        return Ok(report);
    }
    info!(dir = %dir.display(), bytes = len, "log.replay.start");
    let mut reader = LogReader::new(Arc::clone(io))?;
    let mut run: Vec<LogRecord> = Vec::new();
    let mut files: BTreeMap<FileId, StdFileIo> = BTreeMap::new();
    while let Some(record) = reader.next_record()? {
        match record {
            LogRecord::Commit { valid: true, .. } => {
                for entry in run.drain(..) {
                    apply(dir, &mut files, entry)?;
                    report.entries_applied += 1;
                }
                report.transactions += 1;
            }
            LogRecord::Commit { valid: false, .. } => {
                warn!(offset = reader.offset(), "log.replay.bad_marker");
                report.torn_tail = true;
                break;
            }
            entry => run.push(entry),
        }
    }
    report.torn_tail |= reader.torn();
    report.entries_discarded = run.len() as u64;
    for (id, file) in files {
        report.files_touched.push(id.0);
        if file.len()? == 0 {
            drop(file);
            remove_file(file_path(dir, id))?;
            report.files_deleted.push(id.0);
        } else if sync {
            file.sync_all()?;
        }
    }
    io.set_len(0)?;
    if sync {
        io.sync_all()?;
    }
    info!(
        transactions = report.transactions,
        applied = report.entries_applied,
        discarded = report.entries_discarded,
        torn_tail = report.torn_tail,
        "log.replay.complete"
    );
    Ok(report)
}

fn apply(dir: &Path, files: &mut BTreeMap<FileId, StdFileIo>, record: LogRecord) -> Result<()> {
    let id = match &record {
        LogRecord::Write { file, .. } | LogRecord::Truncate { file, .. } => *file,
        LogRecord::Commit { .. } => return Ok(()),
    };
    if !files.contains_key(&id) {
        files.insert(id, StdFileIo::open(file_path(dir, id))?);
    }
    let Some(file) = files.get(&id) else {
        return Ok(());
    };
    match record {
        LogRecord::Write { offset, data, .. } => file.write_at(offset, &data),
        LogRecord::Truncate { len, .. } => file.set_len(len),
        LogRecord::Commit { .. } => Ok(()),
    }
}
