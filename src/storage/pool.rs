#![forbid(unsafe_code)]

//! Interning of strings and byte strings into fixed-size handles.
//!
//! The on-disk [`ValuePool`] keeps two append-only data files (strings and
//! binaries), each entry a varint length followed by the bytes, with the
//! handle being the entry offset plus one. Each data file has a lookup
//! index keyed by `(xxh64 hash, handle)` so equal values share a handle.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, trace};
use xxhash_rust::xxh64::xxh64;

use crate::primitives::bytes::var;
use crate::primitives::stream::{BufferedStream, CommitStage};
use crate::primitives::wal::Log;
use crate::storage::index::{IndexFile, IndexFileInfo, IndexRecord, SeekOp};
use crate::types::{BurrowError, DataType, FileId, IndexId, Result, Value};

/// File holding interned string bytes.
pub const STRING_DATA_FILE: FileId = FileId(0);
/// Lookup index over [`STRING_DATA_FILE`].
pub const STRING_INDEX_FILE: FileId = FileId(1);
/// File holding interned binary values.
pub const BINARY_DATA_FILE: FileId = FileId(2);
/// Lookup index over [`BINARY_DATA_FILE`].
pub const BINARY_INDEX_FILE: FileId = FileId(3);

const MAX_VARINT: usize = 10;

/// Maps variable-length values to integer handles and back. Handle `0` is
/// always the empty value.
pub trait ValueInterner: Send + Sync {
    /// Handle for `s`, allocating one if needed.
    fn intern_str(&self, s: &str) -> Result<u64>;
    /// String behind `handle`.
    fn resolve_str(&self, handle: u64) -> Result<Arc<str>>;
    /// Handle for `b`, allocating one if needed.
    fn intern_bytes(&self, b: &[u8]) -> Result<u64>;
    /// Bytes behind `handle`.
    fn resolve_bytes(&self, handle: u64) -> Result<Arc<[u8]>>;
}

fn utf8(bytes: &[u8]) -> Result<Arc<str>> {
    std::str::from_utf8(bytes)
        .map(Arc::from)
        .map_err(|_| BurrowError::Corruption("interned string is not valid UTF-8"))
}

/// Interner for contexts where no variable-length value may appear.
pub(crate) struct NoInterning;

impl ValueInterner for NoInterning {
    fn intern_str(&self, _s: &str) -> Result<u64> {
        Err(BurrowError::Invalid("string cell outside an interning context"))
    }

    fn resolve_str(&self, _handle: u64) -> Result<Arc<str>> {
        Err(BurrowError::Invalid("string cell outside an interning context"))
    }

    fn intern_bytes(&self, _b: &[u8]) -> Result<u64> {
        Err(BurrowError::Invalid("binary cell outside an interning context"))
    }

    fn resolve_bytes(&self, _handle: u64) -> Result<Arc<[u8]>> {
        Err(BurrowError::Invalid("binary cell outside an interning context"))
    }
}

/// Process-local interner; values live as long as the interner.
#[derive(Default)]
pub struct MemoryInterner {
    inner: Mutex<MemoryTable>,
}

#[derive(Default)]
struct MemoryTable {
    values: Vec<Arc<[u8]>>,
    handles: FxHashMap<Arc<[u8]>, u64>,
}

impl MemoryInterner {
    fn intern(&self, b: &[u8]) -> u64 {
        if b.is_empty() {
            return 0;
        }
        let mut table = self.inner.lock();
        if let Some(&h) = table.handles.get(b) {
            return h;
        }
        let value: Arc<[u8]> = Arc::from(b);
        table.values.push(Arc::clone(&value));
        let h = table.values.len() as u64;
        table.handles.insert(value, h);
        h
    }

    fn resolve(&self, handle: u64) -> Result<Arc<[u8]>> {
        if handle == 0 {
            return Ok(Arc::from(&[][..]));
        }
        let table = self.inner.lock();
        table
            .values
            .get(handle as usize - 1)
            .cloned()
            .ok_or(BurrowError::NotFound("interned value"))
    }
}

impl ValueInterner for MemoryInterner {
    fn intern_str(&self, s: &str) -> Result<u64> {
        Ok(self.intern(s.as_bytes()))
    }

    fn resolve_str(&self, handle: u64) -> Result<Arc<str>> {
        utf8(&self.resolve(handle)?)
    }

    fn intern_bytes(&self, b: &[u8]) -> Result<u64> {
        Ok(self.intern(b))
    }

    fn resolve_bytes(&self, handle: u64) -> Result<Arc<[u8]>> {
        self.resolve(handle)
    }
}

#[derive(Default)]
struct PoolMetrics {
    intern_calls: AtomicU64,
    intern_hits: AtomicU64,
    resolve_calls: AtomicU64,
    resolve_misses: AtomicU64,
}

impl PoolMetrics {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the pool counters.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PoolStats {
    /// Calls to `intern_*` with a non-empty value.
    pub intern_calls: u64,
    /// Interns answered with an existing handle.
    pub intern_hits: u64,
    /// Calls to `resolve_*` with a non-zero handle.
    pub resolve_calls: u64,
    /// Resolves that had to read the data file.
    pub resolve_misses: u64,
    /// Bytes in the string data file.
    pub string_bytes: u64,
    /// Bytes in the binary data file.
    pub binary_bytes: u64,
}

impl PoolStats {
    /// Fraction of interns that found an existing value.
    pub fn intern_hit_rate(&self) -> f64 {
        if self.intern_calls == 0 {
            return 0.0;
        }
        self.intern_hits as f64 / self.intern_calls as f64
    }
}

/// One data file with its lookup index.
struct Shelf {
    data: BufferedStream,
    lookup: IndexFile,
    resolved: FxHashMap<u64, Arc<[u8]>>,
}

impl Shelf {
    fn open(
        log: &Arc<Log>,
        dir: &Path,
        files: (FileId, FileId),
        buffer_size: usize,
        page_size: usize,
        sync: bool,
    ) -> Result<Self> {
        let data = BufferedStream::open(Arc::clone(log), dir, files.0, buffer_size, sync)?;
        let stream = BufferedStream::open(Arc::clone(log), dir, files.1, buffer_size, sync)?;
        let info = IndexFileInfo::new(IndexId(files.1 .0 as u64), &[DataType::Bigint], &[0])?
            .with_file(files.1);
        let lookup = IndexFile::open(stream, info, Arc::new(NoInterning), page_size)?;
        Ok(Self {
            data,
            lookup,
            resolved: FxHashMap::default(),
        })
    }

    fn read(&mut self, handle: u64) -> Result<Arc<[u8]>> {
        let off = handle - 1;
        if off >= self.data.len() {
            return Err(BurrowError::CorruptionOwned(format!(
                "value handle {handle} beyond end of pool file {}",
                self.data.file_id()
            )));
        }
        self.data.seek(off);
        let head = self.data.fast_read(MAX_VARINT.min((self.data.len() - off) as usize))?;
        let mut used = 0;
        let len = var::decode_u64(&head, &mut used)?;
        drop(head);
        let start = off + used as u64;
        if start + len > self.data.len() {
            return Err(BurrowError::Corruption("pool entry runs past end of file"));
        }
        self.data.seek(start);
        let bytes: Arc<[u8]> = Arc::from(self.data.fast_read(len as usize)?.as_ref());
        Ok(bytes)
    }

    fn resolve(&mut self, handle: u64, metrics: &PoolMetrics) -> Result<Arc<[u8]>> {
        if handle == 0 {
            return Ok(Arc::from(&[][..]));
        }
        PoolMetrics::inc(&metrics.resolve_calls);
        if let Some(v) = self.resolved.get(&handle) {
            return Ok(Arc::clone(v));
        }
        PoolMetrics::inc(&metrics.resolve_misses);
        let v = self.read(handle)?;
        self.resolved.insert(handle, Arc::clone(&v));
        Ok(v)
    }

    fn intern(&mut self, bytes: &[u8], metrics: &PoolMetrics) -> Result<u64> {
        if bytes.is_empty() {
            return Ok(0);
        }
        PoolMetrics::inc(&metrics.intern_calls);
        let hash = xxh64(bytes, 0) as i64;
        let candidates = self
            .lookup
            .seek(SeekOp::Equal, &[Value::Int(hash)])?
            .map(|rec| {
                rec.and_then(|rec| {
                    rec.row_id()
                        .map(|h| h as u64)
                        .ok_or(BurrowError::Corruption("pool index record without handle"))
                })
            })
            .collect::<Result<Vec<u64>>>()?;
        for handle in candidates {
            if self.resolve(handle, metrics)?.as_ref() == bytes {
                PoolMetrics::inc(&metrics.intern_hits);
                return Ok(handle);
            }
        }
        let off = self.data.len();
        let mut entry = Vec::with_capacity(var::encoded_len(bytes.len() as u64) + bytes.len());
        var::encode_u64(bytes.len() as u64, &mut entry);
        entry.extend_from_slice(bytes);
        self.data.write_at(off, &entry)?;
        let handle = off + 1;
        self.lookup
            .insert(&IndexRecord::new([Value::Int(hash), Value::Int(handle as i64)]))?;
        self.resolved.insert(handle, Arc::from(bytes));
        trace!(file = self.data.file_id().0, handle, len = bytes.len(), "pool.intern");
        Ok(handle)
    }

    fn commit(&mut self, stage: CommitStage) -> Result<()> {
        if stage != CommitStage::Rollback && !self.is_dirty() {
            return Ok(());
        }
        match stage {
            CommitStage::Prepare => self.lookup.commit(CommitStage::Prepare),
            CommitStage::Flush => {
                self.data.commit(CommitStage::Flush)?;
                self.lookup.commit(CommitStage::Flush)
            }
            CommitStage::Rollback => {
                self.rollback();
                Ok(())
            }
        }
    }

    fn rollback(&mut self) {
        self.data.rollback();
        self.lookup.rollback();
        self.resolved.clear();
    }

    fn is_dirty(&self) -> bool {
        self.data.is_dirty() || self.lookup.is_dirty()
    }
}

struct Shelves {
    strings: Shelf,
    binaries: Shelf,
}

/// Persistent [`ValueInterner`] over the four system files.
pub struct ValuePool {
    shelves: Mutex<Shelves>,
    metrics: PoolMetrics,
}

impl ValuePool {
    /// Opens (creating if needed) the pool files in `dir`.
    pub fn open(
        log: Arc<Log>,
        dir: &Path,
        buffer_size: usize,
        page_size: usize,
        sync: bool,
    ) -> Result<Self> {
        let strings = Shelf::open(
            &log,
            dir,
            (STRING_DATA_FILE, STRING_INDEX_FILE),
            buffer_size,
            page_size,
            sync,
        )?;
        let binaries = Shelf::open(
            &log,
            dir,
            (BINARY_DATA_FILE, BINARY_INDEX_FILE),
            buffer_size,
            page_size,
            sync,
        )?;
        debug!(
            strings = strings.data.len(),
            binaries = binaries.data.len(),
            "pool.open"
        );
        Ok(Self {
            shelves: Mutex::new(Shelves { strings, binaries }),
            metrics: PoolMetrics::default(),
        })
    }

    /// Runs one commit stage on both data files and their indexes.
    pub fn commit(&self, stage: CommitStage) -> Result<()> {
        let mut shelves = self.shelves.lock();
        shelves.strings.commit(stage)?;
        shelves.binaries.commit(stage)
    }

    /// Discards values interned since the last flush.
    pub fn rollback(&self) {
        let mut shelves = self.shelves.lock();
        shelves.strings.rollback();
        shelves.binaries.rollback();
    }

    /// Whether values were interned since the last flush.
    pub fn is_dirty(&self) -> bool {
        let shelves = self.shelves.lock();
        shelves.strings.is_dirty() || shelves.binaries.is_dirty()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStats {
        let shelves = self.shelves.lock();
        PoolStats {
            intern_calls: self.metrics.intern_calls.load(Ordering::Relaxed),
            intern_hits: self.metrics.intern_hits.load(Ordering::Relaxed),
            resolve_calls: self.metrics.resolve_calls.load(Ordering::Relaxed),
            resolve_misses: self.metrics.resolve_misses.load(Ordering::Relaxed),
            string_bytes: shelves.strings.data.len(),
            binary_bytes: shelves.binaries.data.len(),
        }
    }
}

impl ValueInterner for ValuePool {
    fn intern_str(&self, s: &str) -> Result<u64> {
        self.shelves.lock().strings.intern(s.as_bytes(), &self.metrics)
    }

    fn resolve_str(&self, handle: u64) -> Result<Arc<str>> {
        let bytes = self.shelves.lock().strings.resolve(handle, &self.metrics)?;
        utf8(&bytes)
    }

    fn intern_bytes(&self, b: &[u8]) -> Result<u64> {
        self.shelves.lock().binaries.intern(b, &self.metrics)
    }

    fn resolve_bytes(&self, handle: u64) -> Result<Arc<[u8]>> {
        self.shelves.lock().binaries.resolve(handle, &self.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FileKind;
    use crate::primitives::wal::LogOptions;
    use tempfile::tempdir;

    fn open_pool(dir: &Path) -> Result<(Arc<Log>, ValuePool)> {
        let log = Arc::new(Log::open(dir, LogOptions::default())?);
        let pool = ValuePool::open(Arc::clone(&log), dir, 256, 512, false)?;
        Ok((log, pool))
    }

    fn commit(log: &Log, pool: &ValuePool) -> Result<()> {
        pool.commit(CommitStage::Prepare)?;
        log.commit()?;
        pool.commit(CommitStage::Flush)?;
        log.reset()
    }

    #[test]
    fn memory_interner_shares_handles() -> Result<()> {
        let interner = MemoryInterner::default();
        let a = interner.intern_str("abc")?;
        let b = interner.intern_str("abc")?;
        let c = interner.intern_bytes(b"xyz")?;
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.intern_str("")?, 0);
        assert_eq!(&*interner.resolve_str(a)?, "abc");
        assert!(interner.resolve_bytes(99).is_err());
        Ok(())
    }

    #[test]
    fn equal_values_reuse_handles() -> Result<()> {
        let dir = tempdir()?;
        let (_log, pool) = open_pool(dir.path())?;
        let a = pool.intern_str("hello")?;
        let b = pool.intern_str("world")?;
        assert_ne!(a, b);
        assert_eq!(pool.intern_str("hello")?, a);
        assert_eq!(a, 1);
        let bin = pool.intern_bytes(&[1, 2, 3])?;
        assert_eq!(bin, 1);
        assert_eq!(&*pool.resolve_bytes(bin)?, &[1, 2, 3]);
        let stats = pool.stats();
        assert_eq!(stats.intern_calls, 4);
        assert_eq!(stats.intern_hits, 1);
        Ok(())
    }

    #[test]
    fn lookup_indexes_report_their_own_files() -> Result<()> {
        let dir = tempdir()?;
        let (_log, pool) = open_pool(dir.path())?;
        let shelves = pool.shelves.lock();
        for shelf in [&shelves.strings, &shelves.binaries] {
            assert_eq!(shelf.lookup.info().file_id(), shelf.lookup.file_id());
        }
        assert_eq!(
            shelves.strings.lookup.info().file_id(),
            FileKind::StringPoolIndex.file_id()
        );
        assert_eq!(
            shelves.binaries.lookup.info().file_id(),
            FileKind::BinaryPoolIndex.file_id()
        );
        Ok(())
    }

    #[test]
    fn committed_values_survive_reopen() -> Result<()> {
        let dir = tempdir()?;
        let handles: Vec<u64> = {
            let (log, pool) = open_pool(dir.path())?;
            let hs = (0..200)
                .map(|i| pool.intern_str(&format!("value-{i}")))
                .collect::<Result<Vec<_>>>()?;
            commit(&log, &pool)?;
            hs
        };
        let (_log, pool) = open_pool(dir.path())?;
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(&*pool.resolve_str(*h)?, format!("value-{i}"));
        }
        assert_eq!(pool.intern_str("value-17")?, handles[17]);
        assert!(!pool.is_dirty());
        Ok(())
    }

    #[test]
    fn rollback_forgets_new_values() -> Result<()> {
        let dir = tempdir()?;
        let (log, pool) = open_pool(dir.path())?;
        let kept = pool.intern_str("kept")?;
        commit(&log, &pool)?;
        let lost = pool.intern_str("lost")?;
        assert!(pool.is_dirty());
        log.reset()?;
        pool.rollback();
        assert!(pool.resolve_str(lost).is_err());
        assert_eq!(pool.intern_str("kept")?, kept);
        assert_eq!(pool.intern_str("again")?, lost);
        Ok(())
    }
}
