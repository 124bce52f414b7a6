#![forbid(unsafe_code)]
//! Random-access file view backed by a cache of fixed-size buffers.
//!
//! Writes are logged before they reach a buffer; buffers reach the OS file
//! only through [`BufferedStream::commit`].

use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::primitives::wal::{file_path, Log};
use crate::types::{BurrowError, FileId, Result};

/// Stage of the two-phase commit protocol driven by the database.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommitStage {
    /// Serialize pending state (streams: write unsaved buffers to the OS file).
    Prepare,
    /// Make prepared state durable and truncate the file to its logical length.
    Flush,
    /// Discard in-memory changes made since the last flush.
    Rollback,
}

/// Log-backed, buffer-cached view of one numbered file.
pub struct BufferedStream {
    log: Arc<Log>,
    file_id: FileId,
    io: StdFileIo,
    sync: bool,
    shift: u32,
    buffers: FxHashMap<u64, Box<[u8]>>,
    unsaved: BTreeSet<u64>,
    len: u64,
    file_len: u64,
    valid_len: u64,
    pos: u64,
}

impl BufferedStream {
    /// Opens the file numbered `file_id` in `dir`, creating it if missing.
    /// `buffer_size` must be a power of two.
    pub fn open(
        log: Arc<Log>,
        dir: &Path,
        file_id: FileId,
        buffer_size: usize,
        sync: bool,
    ) -> Result<Self> {
        if !buffer_size.is_power_of_two() || buffer_size < 64 {
            return Err(BurrowError::Invalid("buffer size must be a power of two >= 64"));
        }
        let io = StdFileIo::open(file_path(dir, file_id))?;
        let len = io.len()?;
        Ok(Self {
            log,
            file_id,
            io,
            sync,
            shift: buffer_size.trailing_zeros(),
            buffers: FxHashMap::default(),
            unsaved: BTreeSet::new(),
            len,
            file_len: len,
            valid_len: len,
            pos: 0,
        })
    }

    /// Number of the backing file.
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Logical length, including unflushed writes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True when the logical length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current cursor.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Moves the cursor; positions past the end are allowed.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// True when the stream holds changes not yet flushed.
    pub fn is_dirty(&self) -> bool {
        !self.unsaved.is_empty() || self.len != self.file_len
    }

    fn buffer_size(&self) -> usize {
        1usize << self.shift
    }

    fn mask(&self) -> u64 {
        (1u64 << self.shift) - 1
    }

    fn buffer_mut(&mut self, no: u64) -> Result<&mut [u8]> {
        let buf = match self.buffers.entry(no) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                let loaded = load_buffer(&self.io, no, self.shift, self.valid_len)?;
                slot.insert(loaded)
            }
        };
        Ok(buf)
    }

    /// Reads into `dst` from the cursor, stopping at the logical end.
    /// Returns the number of bytes read.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let avail = self.len.saturating_sub(self.pos);
        let n = (dst.len() as u64).min(avail) as usize;
        let mask = self.mask();
        let size = self.buffer_size();
        let mut done = 0;
        while done < n {
            let off = self.pos + done as u64;
            let start = (off & mask) as usize;
            let take = (size - start).min(n - done);
            let buf = self.buffer_mut(off >> self.shift)?;
            dst[done..done + take].copy_from_slice(&buf[start..start + take]);
            done += take;
        }
        self.pos += n as u64;
        Ok(n)
    }

    /// Returns `n` bytes at the cursor and advances it. When the range sits
    /// inside one cached buffer the bytes are borrowed from it. Bytes past the
    /// logical end read as zero.
    pub fn fast_read(&mut self, n: usize) -> Result<Cow<'_, [u8]>> {
        let start = (self.pos & self.mask()) as usize;
        let no = self.pos >> self.shift;
        self.pos += n as u64;
        if start + n <= self.buffer_size() {
            let buf = self.buffer_mut(no)?;
            return Ok(Cow::Borrowed(&buf[start..start + n]));
        }
        let mut owned = vec![0u8; n];
        let size = self.buffer_size();
        let mut done = 0;
        let mut off = (no << self.shift) + start as u64;
        while done < n {
            let at = (off & self.mask()) as usize;
            let take = (size - at).min(n - done);
            let buf = self.buffer_mut(off >> self.shift)?;
            owned[done..done + take].copy_from_slice(&buf[at..at + take]);
            done += take;
            off += take as u64;
        }
        Ok(Cow::Owned(owned))
    }

    /// Writes `src` at the cursor, logging it first.
    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        self.log.log_write(self.file_id, self.pos, src)?;
        self.apply(self.pos, src)?;
        self.pos += src.len() as u64;
        self.len = self.len.max(self.pos);
        Ok(())
    }

    /// Like [`write`](Self::write), but when `check_first_byte_zero` is set
    /// and the byte at the cursor is non-zero nothing is logged or written
    /// and `false` is returned.
    pub fn write_checked(&mut self, src: &[u8], check_first_byte_zero: bool) -> Result<bool> {
        if check_first_byte_zero && self.pos < self.len {
            let mask = self.mask();
            let at = (self.pos & mask) as usize;
            let first = self.buffer_mut(self.pos >> self.shift)?[at];
            if first != 0 {
                return Ok(false);
            }
        }
        self.write(src)?;
        Ok(true)
    }

    /// Positions the cursor at `off` and writes `src`.
    pub fn write_at(&mut self, off: u64, src: &[u8]) -> Result<()> {
        self.seek(off);
        self.write(src)
    }

    fn apply(&mut self, mut off: u64, mut src: &[u8]) -> Result<()> {
        let mask = self.mask();
        let size = self.buffer_size();
        while !src.is_empty() {
            let no = off >> self.shift;
            let start = (off & mask) as usize;
            let n = (size - start).min(src.len());
            let buf = self.buffer_mut(no)?;
            buf[start..start + n].copy_from_slice(&src[..n]);
            self.unsaved.insert(no);
            off += n as u64;
            src = &src[n..];
        }
        Ok(())
    }

    /// Logs a truncate/extend to `len` and applies it to the logical view.
    /// The OS file is resized at [`CommitStage::Flush`].
    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.log.set_length(self.file_id, len)?;
        if len < self.len {
            let mask = self.mask();
            let first_dead = (len + mask) >> self.shift;
            self.buffers.retain(|no, _| *no < first_dead);
            self.unsaved.retain(|no| *no < first_dead);
            let tail = (len & mask) as usize;
            if tail != 0 {
                if let Some(buf) = self.buffers.get_mut(&(len >> self.shift)) {
                    buf[tail..].fill(0);
                }
            }
            self.valid_len = self.valid_len.min(len);
        }
        self.len = len;
        Ok(())
    }

    /// Runs one commit stage.
    pub fn commit(&mut self, stage: CommitStage) -> Result<()> {
        match stage {
            CommitStage::Prepare => self.prepare(),
            CommitStage::Flush => self.flush(),
            CommitStage::Rollback => {
                self.rollback();
                Ok(())
            }
        }
    }

    fn prepare(&mut self) -> Result<()> {
        if self.valid_len < self.io.len()? {
            self.io.set_len(self.valid_len)?;
        }
        let size = self.buffer_size() as u64;
        let mut written = 0usize;
        for no in std::mem::take(&mut self.unsaved) {
            let start = no << self.shift;
            if start >= self.len {
                continue;
            }
            let n = size.min(self.len - start) as usize;
            if let Some(buf) = self.buffers.get(&no) {
                self.io.write_at(start, &buf[..n])?;
                self.valid_len = self.valid_len.max(start + n as u64);
                written += 1;
            }
        }
        if written > 0 {
            debug!(file = self.file_id.0, buffers = written, "stream.prepare");
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.prepare()?;
        if self.io.len()? != self.len {
            self.io.set_len(self.len)?;
        }
        if self.sync {
            self.io.sync_all()?;
        }
        debug!(file = self.file_id.0, len = self.len, "stream.flush");
        self.file_len = self.len;
        self.valid_len = self.len;
        Ok(())
    }

    /// Discards every buffer, returning to the last flushed file state.
    pub fn rollback(&mut self) {
        self.buffers.clear();
        self.unsaved.clear();
        self.len = self.file_len;
        self.valid_len = self.file_len;
        self.pos = 0;
    }
}

fn load_buffer(io: &StdFileIo, no: u64, shift: u32, valid_len: u64) -> Result<Box<[u8]>> {
    let size = 1usize << shift;
    let mut buf = vec![0u8; size].into_boxed_slice();
    let start = no << shift;
    if start < valid_len {
        let want = (valid_len - start).min(size as u64) as usize;
        io.read_at(start, &mut buf[..want])?;
    }
    Ok(buf)
}
