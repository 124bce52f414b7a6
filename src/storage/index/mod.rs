#![forbid(unsafe_code)]

//! Secondary indexes: a B-tree of fixed-size pages, each page an AVL tree of
//! fixed-width records.
//!
//! Page 0 is always the root. Leaf records are the key columns followed by
//! the row id; parent records carry a child page id after the key columns.

mod cache;
mod page;
mod scan;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use smallvec::SmallVec;
use tracing::debug;

use crate::db::FileKind;
use crate::primitives::bytes::le;
use crate::primitives::stream::{BufferedStream, CommitStage};
use crate::storage::cell;
use crate::storage::pool::ValueInterner;
use crate::types::{BurrowError, DataType, FileId, IndexId, PageId, Result, RowId, Value};

use cache::PageCache;

pub use page::{IndexPage, KeyCmp, PageKind, PageLayout, MAX_NODE_ID, PAGE_ID_SIZE};
pub use scan::{IndexScan, KeySeek, Seek, SeekOp, Unbounded};

const MAX_TREE_DEPTH: usize = 64;

/// Static description of an index: its id, key column types and the table
/// columns they are projected from.
#[derive(Clone, Debug)]
pub struct IndexFileInfo {
    /// Index id, which determines the backing file.
    pub index_id: IndexId,
    /// Key column types; the last one is always the row id.
    pub types: Vec<DataType>,
    /// Table column index for each key column except the trailing row id.
    pub base_ix: Vec<usize>,
    file: FileId,
}

impl IndexFileInfo {
    /// Describes an index over `key_types` taken from table columns
    /// `base_ix`. A trailing bigint row-id column is appended.
    pub fn new(index_id: IndexId, key_types: &[DataType], base_ix: &[usize]) -> Result<Self> {
        if key_types.len() != base_ix.len() {
            return Err(BurrowError::Invalid(
                "index key types and source columns differ in length",
            ));
        }
        let mut types = key_types.to_vec();
        types.push(DataType::Bigint);
        Ok(Self {
            index_id,
            types,
            base_ix: base_ix.to_vec(),
            file: FileKind::Index(index_id).file_id(),
        })
    }

    /// Stores the index in `file` instead of the file numbered after its id.
    pub fn with_file(mut self, file: FileId) -> Self {
        self.file = file;
        self
    }

    /// Bytes of key cells per record.
    pub fn key_size(&self) -> usize {
        self.types.iter().map(|t| t.size()).sum()
    }

    /// Backing file number.
    pub fn file_id(&self) -> FileId {
        self.file
    }
}

/// One index entry: key column values, row id last. `child` is only
/// meaningful for records read from parent pages.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexRecord {
    /// Key columns in declared order.
    pub cols: SmallVec<[Value; 4]>,
    /// Child page id (parent records only).
    pub child: u64,
}

impl IndexRecord {
    /// Record with the given columns.
    pub fn new(cols: impl IntoIterator<Item = Value>) -> Self {
        Self {
            cols: cols.into_iter().collect(),
            child: 0,
        }
    }

    /// The trailing row id, if it is an integer.
    pub fn row_id(&self) -> Option<RowId> {
        self.cols.last().and_then(Value::as_int)
    }

    /// Lexicographic comparison of the key columns.
    pub fn compare(&self, other: &IndexRecord) -> Ordering {
        for (a, b) in self.cols.iter().zip(other.cols.iter()) {
            let c = a.compare(b);
            if c != Ordering::Equal {
                return c;
            }
        }
        self.cols.len().cmp(&other.cols.len())
    }
}

/// Converts between records and key bytes.
pub(crate) struct RecordCodec {
    types: Vec<DataType>,
    interner: Arc<dyn ValueInterner>,
}

impl RecordCodec {
    fn normalize(&self, cols: &[Value]) -> Result<SmallVec<[Value; 4]>> {
        if cols.len() > self.types.len() {
            return Err(BurrowError::InvalidOwned(format!(
                "index key has {} columns, expected at most {}",
                cols.len(),
                self.types.len()
            )));
        }
        cols.iter()
            .zip(&self.types)
            .map(|(v, ty)| cell::normalize(v, *ty))
            .collect()
    }

    fn encode(&self, cols: &[Value]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.types.iter().map(|t| t.size()).sum()];
        let mut off = 0;
        for (v, ty) in cols.iter().zip(&self.types) {
            cell::write_cell(&mut out[off..], v, *ty, self.interner.as_ref())?;
            off += ty.size();
        }
        Ok(out)
    }

    pub(crate) fn decode(&self, key: &[u8]) -> Result<SmallVec<[Value; 4]>> {
        let mut off = 0;
        let mut cols = SmallVec::with_capacity(self.types.len());
        for ty in &self.types {
            cols.push(cell::read_cell(&key[off..], *ty, self.interner.as_ref())?);
            off += ty.size();
        }
        Ok(cols)
    }

    /// Ordering of `target` relative to the stored key, over the columns
    /// `target` supplies.
    fn compare(&self, target: &[Value], key: &[u8]) -> Result<Ordering> {
        let mut off = 0;
        for (v, ty) in target.iter().zip(&self.types) {
            let stored = cell::read_cell(&key[off..], *ty, self.interner.as_ref())?;
            let c = v.compare(&stored);
            if c != Ordering::Equal {
                return Ok(c);
            }
            off += ty.size();
        }
        Ok(Ordering::Equal)
    }

    pub(crate) fn record(&self, page: &IndexPage, x: u16) -> Result<IndexRecord> {
        let cols = self.decode(page.key(x))?;
        let child = if page.is_leaf() { 0 } else { page.child(x) };
        Ok(IndexRecord { cols, child })
    }
}

/// Counters for one open index.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexStats {
    /// Pages read from the backing stream.
    pub pages_loaded: u64,
    /// Pages serialized during `Prepare`.
    pub pages_written: u64,
    /// Page splits.
    pub splits: u64,
    /// Records inserted.
    pub inserts: u64,
    /// Records deleted.
    pub deletes: u64,
}

/// Result of [`IndexFile::verify`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexVerifyReport {
    /// Index id.
    pub index_id: u64,
    /// Pages reachable from the root.
    pub pages: u64,
    /// Reachable leaf pages.
    pub leaf_pages: u64,
    /// Reachable parent pages.
    pub parent_pages: u64,
    /// Records in leaf pages.
    pub records: u64,
    /// Levels below the root.
    pub depth: u32,
}

/// One B-tree index over a buffered stream.
pub struct IndexFile {
    info: Arc<IndexFileInfo>,
    pub(crate) codec: RecordCodec,
    pub(crate) cache: PageCache,
    saved: bool,
    stats: IndexStats,
}

impl IndexFile {
    /// Opens the index stored in `stream`. An empty stream starts as a
    /// single empty leaf root.
    pub fn open(
        stream: BufferedStream,
        info: IndexFileInfo,
        interner: Arc<dyn ValueInterner>,
        page_size: usize,
    ) -> Result<Self> {
        let info = info.with_file(stream.file_id());
        let cache = PageCache::new(stream, page_size, info.key_size())?;
        debug!(
            index = info.index_id.0,
            pages = cache.page_count(),
            "index.open"
        );
        Ok(Self {
            codec: RecordCodec {
                types: info.types.clone(),
                interner,
            },
            info: Arc::new(info),
            cache,
            saved: true,
            stats: IndexStats::default(),
        })
    }

    /// Layout description.
    pub fn info(&self) -> &IndexFileInfo {
        &self.info
    }

    /// Shared handle to the layout description.
    pub fn info_arc(&self) -> Arc<IndexFileInfo> {
        Arc::clone(&self.info)
    }

    /// Backing file number.
    pub fn file_id(&self) -> FileId {
        self.cache.stream.file_id()
    }

    /// Points key column `position` at table column `column` after the
    /// table's columns were rearranged.
    pub(crate) fn remap_column(&mut self, position: usize, column: usize) {
        if let Some(slot) = Arc::make_mut(&mut self.info).base_ix.get_mut(position) {
            *slot = column;
        }
    }

    /// Projects the key columns of `row` plus `id` into a record.
    pub fn extract_key(&self, row: &[Value], id: RowId) -> Result<IndexRecord> {
        let mut cols = SmallVec::with_capacity(self.info.types.len());
        for &ix in &self.info.base_ix {
            let v = row.get(ix).ok_or(BurrowError::Invalid(
                "row is missing an indexed column",
            ))?;
            cols.push(v.clone());
        }
        cols.push(Value::Int(id));
        Ok(IndexRecord { cols, child: 0 })
    }

    /// Inserts `rec`. Returns `false` if an equal record is already present.
    pub fn insert(&mut self, rec: &IndexRecord) -> Result<bool> {
        let target = self.full_key(rec)?;
        let payload = self.codec.encode(&target)?;
        let (leaf, path) = self.descend(&target)?;
        self.saved = false;
        let added = insert_into(
            &mut self.cache,
            &self.codec,
            &mut self.stats,
            leaf,
            &path,
            &payload,
            &target,
        )?;
        if added {
            self.stats.inserts += 1;
        }
        Ok(added)
    }

    /// Deletes `rec`. Returns `false` if it was not present.
    pub fn delete(&mut self, rec: &IndexRecord) -> Result<bool> {
        let target = self.full_key(rec)?;
        let (leaf, _) = self.descend(&target)?;
        let codec = &self.codec;
        let removed = self
            .cache
            .get(leaf)?
            .remove(&mut |key| codec.compare(&target, key))?;
        if removed {
            self.saved = false;
            self.stats.deletes += 1;
        }
        Ok(removed)
    }

    /// Whether an equal record is present.
    pub fn contains(&mut self, rec: &IndexRecord) -> Result<bool> {
        let target = self.full_key(rec)?;
        let (leaf, _) = self.descend(&target)?;
        let codec = &self.codec;
        let page = self.cache.get(leaf)?;
        let x = page.find_split(&mut |key| codec.compare(&target, key))?;
        Ok(x != 0 && codec.compare(&target, page.key(x))? == Ordering::Equal)
    }

    /// Scans from the position selected by `seek`.
    pub fn from<S: Seek>(&mut self, seek: S, desc: bool) -> IndexScan<'_, S> {
        IndexScan::new(self, seek, desc)
    }

    /// Scans every record.
    pub fn scan(&mut self, desc: bool) -> IndexScan<'_, Unbounded> {
        IndexScan::new(self, Unbounded::new(desc), desc)
    }

    /// Scans the records related to the key prefix `key` by `op`. `<` and
    /// `<=` run in descending order.
    pub fn seek(&mut self, op: SeekOp, key: &[Value]) -> Result<IndexScan<'_, KeySeek>> {
        let key = self.codec.normalize(key)?;
        Ok(IndexScan::new(
            self,
            KeySeek::new(op, key),
            op.is_descending(),
        ))
    }

    fn full_key(&self, rec: &IndexRecord) -> Result<SmallVec<[Value; 4]>> {
        if rec.cols.len() != self.info.types.len() {
            return Err(BurrowError::InvalidOwned(format!(
                "index record has {} columns, expected {}",
                rec.cols.len(),
                self.info.types.len()
            )));
        }
        self.codec.normalize(&rec.cols)
    }

    /// Follows dividers from the root to the leaf that owns `target`.
    fn descend(&mut self, target: &[Value]) -> Result<(PageId, Vec<PageId>)> {
        let mut path = Vec::new();
        let mut id = PageId::ROOT;
        loop {
            let codec = &self.codec;
            let page = self.cache.get(id)?;
            if page.is_leaf() {
                return Ok((id, path));
            }
            let x = page.find_split(&mut |key| codec.compare(target, key))?;
            let next = if x == 0 { page.first_page() } else { page.child(x) };
            path.push(id);
            if path.len() > MAX_TREE_DEPTH {
                return Err(BurrowError::Corruption("index tree too deep"));
            }
            id = PageId(next);
        }
    }

    /// Runs one commit stage. `Prepare` serializes modified pages into the
    /// stream; `Flush` makes the stream durable.
    pub fn commit(&mut self, stage: CommitStage) -> Result<()> {
        match stage {
            CommitStage::Prepare if !self.saved => {
                let written = self.cache.write_unsaved()?;
                self.stats.pages_written += written as u64;
                debug!(index = self.info.index_id.0, pages = written, "index.prepare");
            }
            CommitStage::Flush if !self.saved => {
                self.cache.stream.commit(CommitStage::Flush)?;
                self.saved = true;
            }
            CommitStage::Rollback => self.rollback(),
            _ => {}
        }
        Ok(())
    }

    /// Drops every cached page and unflushed write.
    pub fn rollback(&mut self) {
        self.cache.stream.rollback();
        self.cache.reset();
        self.saved = true;
    }

    /// Whether there are changes since the last flush.
    pub fn is_dirty(&self) -> bool {
        !self.saved
    }

    /// Empties the backing file; the next flush leaves it zero-length.
    pub(crate) fn discard(&mut self) -> Result<()> {
        self.cache.stream.set_len(0)?;
        self.cache.clear();
        self.saved = false;
        Ok(())
    }

    /// Number of allocated pages.
    pub fn page_count(&self) -> u64 {
        self.cache.page_count()
    }

    /// Operation counters.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            pages_loaded: self.cache.loaded,
            ..self.stats.clone()
        }
    }

    /// Checks every reachable page (counts, AVL balance, key order within
    /// and across pages).
    pub fn verify(&mut self) -> Result<IndexVerifyReport> {
        let mut report = IndexVerifyReport {
            index_id: self.info.index_id.0,
            ..IndexVerifyReport::default()
        };
        let mut seen = HashSet::new();
        let mut pending = vec![(PageId::ROOT, 0u32)];
        while let Some((id, depth)) = pending.pop() {
            if !seen.insert(id) {
                return Err(BurrowError::CorruptionOwned(format!(
                    "index page {id} referenced twice"
                )));
            }
            if depth as usize > MAX_TREE_DEPTH {
                return Err(BurrowError::Corruption("index tree too deep"));
            }
            let codec = &self.codec;
            let page = self.cache.get(id)?;
            page.verify_balance()?;
            let nodes = page.in_order();
            for pair in nodes.windows(2) {
                let prev = codec.decode(page.key(pair[0]))?;
                if codec.compare(&prev, page.key(pair[1]))? != Ordering::Less {
                    return Err(BurrowError::CorruptionOwned(format!(
                        "index page {id} keys out of order"
                    )));
                }
            }
            report.pages += 1;
            report.depth = report.depth.max(depth);
            if page.is_leaf() {
                report.leaf_pages += 1;
                report.records += nodes.len() as u64;
            } else {
                report.parent_pages += 1;
                pending.push((PageId(page.first_page()), depth + 1));
                pending.extend(nodes.iter().map(|&x| (PageId(page.child(x)), depth + 1)));
            }
        }
        let mut scanned = 0u64;
        let mut prev: Option<IndexRecord> = None;
        for rec in self.scan(false) {
            let rec = rec?;
            if let Some(p) = &prev {
                if p.compare(&rec) != Ordering::Less {
                    return Err(BurrowError::Corruption("index scan out of order"));
                }
            }
            scanned += 1;
            prev = Some(rec);
        }
        if scanned != report.records {
            return Err(BurrowError::CorruptionOwned(format!(
                "index scan returned {scanned} records, leaves hold {}",
                report.records
            )));
        }
        Ok(report)
    }
}

/// Inserts `payload` into page `id`, splitting it first if it is full.
/// `path` holds the ancestors of `id`, root first.
fn insert_into(
    cache: &mut PageCache,
    codec: &RecordCodec,
    stats: &mut IndexStats,
    id: PageId,
    path: &[PageId],
    payload: &[u8],
    target: &[Value],
) -> Result<bool> {
    {
        let page = cache.get(id)?;
        if !page.is_full() {
            return page.insert(payload, &mut |key| codec.compare(target, key));
        }
    }
    let (left_id, parent_id, ancestors) = if id == PageId::ROOT {
        let moved = cache.alloc();
        let mut old = cache.take(PageId::ROOT)?;
        old.set_id(moved);
        let mut root = IndexPage::new(PageId::ROOT, cache.layout(PageKind::Parent));
        root.set_first_page(moved.0);
        cache.put(old);
        cache.put(root);
        (moved, PageId::ROOT, &[][..])
    } else {
        let (parent, rest) = path
            .split_last()
            .ok_or(BurrowError::Corruption("index page split without a parent"))?;
        (id, *parent, rest)
    };
    let right_id = cache.alloc();
    let (divider, child) = {
        let page = cache.get(left_id)?;
        let layout = *page.layout();
        let mut left = IndexPage::new(left_id, layout);
        let mut right = IndexPage::new(right_id, layout);
        left.set_first_page(page.first_page());
        let (divider, child) = page.divide(&mut left, &mut right)?;
        right.set_first_page(child);
        cache.put(left);
        cache.put(right);
        (divider, child)
    };
    stats.splits += 1;
    debug!(
        left = left_id.0,
        right = right_id.0,
        parent = parent_id.0,
        divider_child = child,
        "index.split"
    );
    let divider_cols = codec.decode(&divider)?;
    let mut entry = divider.clone();
    entry.resize(divider.len() + PAGE_ID_SIZE, 0);
    le::put_u48(&mut entry[divider.len()..], right_id.0);
    insert_into(cache, codec, stats, parent_id, ancestors, &entry, &divider_cols)?;
    let dest = if codec.compare(target, &divider)? == Ordering::Less {
        left_id
    } else {
        right_id
    };
    cache
        .get(dest)?
        .insert(payload, &mut |key| codec.compare(target, key))
}

#[cfg(test)]
mod tests;
