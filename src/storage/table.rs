#![forbid(unsafe_code)]

//! Fixed-width row storage.
//!
//! Row `id` lives at byte `(id - 1) * row_size` of the table file. The first
//! byte of a row is a live flag (zero for deleted or never written rows),
//! followed by one cell per column except column 0, which is the row id
//! itself and is not stored.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::db::{DbHandle, FileKind};
use crate::primitives::stream::{BufferedStream, CommitStage};
use crate::storage::cell;
use crate::storage::index::{IndexFile, IndexFileInfo};
use crate::storage::pool::ValueInterner;
use crate::types::{
    decode_cell, encode_cell, BurrowError, DataType, FileId, IndexId, Result, RowId, TableId,
    Value,
};

/// Name and type of one column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Storage type.
    pub ty: DataType,
}

impl ColumnInfo {
    /// Column `name` of type `ty`.
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    /// The mandatory leading row-id column.
    pub fn id() -> Self {
        Self::new("Id", DataType::Bigint)
    }
}

/// One key column of an index: the `position`-th key column of index
/// `index_id` is table column `column`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IndexColumn {
    /// Index id.
    pub index_id: IndexId,
    /// Position within the index key.
    pub position: usize,
    /// Table column index.
    pub column: usize,
}

impl IndexColumn {
    /// Describes an index over the table columns `columns`, in key order.
    pub fn for_index(index_id: IndexId, columns: &[usize]) -> Vec<IndexColumn> {
        columns
            .iter()
            .enumerate()
            .map(|(position, &column)| IndexColumn {
                index_id,
                position,
                column,
            })
            .collect()
    }
}

fn row_size_of(cols: &[ColumnInfo]) -> usize {
    1 + cols.iter().skip(1).map(|c| c.ty.size()).sum::<usize>()
}

/// Schema state restored by rollback.
#[derive(Clone)]
struct Committed {
    cols: Vec<ColumnInfo>,
    index_cols: Vec<IndexColumn>,
}

/// A table: its row file plus the indexes kept in step with it.
pub struct Table {
    id: TableId,
    name: String,
    db: DbHandle,
    data: BufferedStream,
    cols: Vec<ColumnInfo>,
    row_size: usize,
    row_count: RowId,
    index_cols: Vec<IndexColumn>,
    indexes: BTreeMap<IndexId, IndexFile>,
    dropped: Vec<IndexFile>,
    created: BTreeSet<IndexId>,
    committed: Committed,
    dirty: bool,
}

impl Table {
    /// Opens (creating if missing) the file of table `id`. Column 0 must be
    /// the bigint row id.
    pub fn open(db: DbHandle, id: TableId, name: &str, cols: Vec<ColumnInfo>) -> Result<Self> {
        match cols.first() {
            Some(c) if c.ty == DataType::Bigint => {}
            _ => return Err(BurrowError::Invalid("first column must be a bigint row id")),
        }
        let data = db.open_stream(FileKind::Table(id))?;
        let row_size = row_size_of(&cols);
        let row_count = (data.len() / row_size as u64) as RowId;
        debug!(table = id.0, name, row_size, row_count, "table.open");
        Ok(Self {
            id,
            name: name.to_string(),
            db,
            data,
            committed: Committed {
                cols: cols.clone(),
                index_cols: Vec::new(),
            },
            cols,
            row_size,
            row_count,
            index_cols: Vec::new(),
            indexes: BTreeMap::new(),
            dropped: Vec::new(),
            created: BTreeSet::new(),
            dirty: false,
        })
    }

    /// Table id.
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current columns, row id first.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.cols
    }

    /// Bytes per row.
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// Highest row id ever allocated; deleted rows are included.
    pub fn row_count(&self) -> RowId {
        self.row_count
    }

    /// Whether there are changes since the last flush, including changes
    /// made directly through an attached index.
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.indexes.values().any(IndexFile::is_dirty)
    }

    /// Index key columns currently attached.
    pub fn index_columns(&self) -> &[IndexColumn] {
        &self.index_cols
    }

    /// Backing file of the rows.
    pub fn file_id(&self) -> FileId {
        self.data.file_id()
    }

    /// Position of the column called `name`.
    pub fn column_ix(&self, name: &str) -> Result<usize> {
        self.cols
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| {
                BurrowError::InvalidOwned(format!("column {name} not found in {}", self.name))
            })
    }

    fn offset(&self, id: RowId) -> u64 {
        (id - 1) as u64 * self.row_size as u64
    }

    /// Rejects explicit ids whose row would lie past the largest file offset.
    fn check_explicit_id(&self, id: RowId) -> Result<RowId> {
        let fits = u64::try_from(id - 1)
            .ok()
            .and_then(|n| n.checked_mul(self.row_size as u64))
            .and_then(|off| off.checked_add(self.row_size as u64))
            .is_some_and(|end| end <= i64::MAX as u64);
        if !fits {
            return Err(BurrowError::InvalidOwned(format!(
                "row id {id} is out of range for table {}",
                self.name
            )));
        }
        Ok(id)
    }

    /// Reads row `id` into `row`, skipping columns whose `used` flag is
    /// false. Returns `false` for deleted or out-of-range ids.
    pub fn get(&mut self, id: RowId, row: &mut [Value], used: Option<&[bool]>) -> Result<bool> {
        if id <= 0 || id > self.row_count {
            return Ok(false);
        }
        if row.len() < self.cols.len() {
            return Err(BurrowError::Invalid("row buffer shorter than the column list"));
        }
        let interner = self.db.interner();
        let off = self.offset(id);
        self.data.seek(off);
        let buf = self.data.fast_read(self.row_size)?;
        if buf[0] == 0 {
            return Ok(false);
        }
        row[0] = Value::Int(id);
        let mut at = 1;
        for (i, col) in self.cols.iter().enumerate().skip(1) {
            if used.map_or(true, |u| u.get(i).copied().unwrap_or(false)) {
                row[i] = cell::read_cell(&buf[at..], col.ty, interner.as_ref())?;
            }
            at += col.ty.size();
        }
        Ok(true)
    }

    /// Row `id` as a fresh vector, or `None` if it is not live.
    pub fn row(&mut self, id: RowId) -> Result<Option<Vec<Value>>> {
        let mut row = self.blank_row();
        Ok(self.get(id, &mut row, None)?.then_some(row))
    }

    /// A row of default values for the current columns.
    pub fn blank_row(&self) -> Vec<Value> {
        self.cols.iter().map(|c| c.ty.default_value()).collect()
    }

    /// Lazily yields every live row in id order.
    pub fn get_all(&mut self, used: Option<Vec<bool>>) -> RowScan<'_> {
        let end = self.row_count;
        RowScan {
            table: self,
            next: 1,
            end,
            used,
        }
    }

    fn encode_row(&self, row: &[Value], interner: &dyn ValueInterner) -> Result<Vec<u8>> {
        if row.len() != self.cols.len() {
            return Err(BurrowError::InvalidOwned(format!(
                "row has {} values, table {} has {} columns",
                row.len(),
                self.name,
                self.cols.len()
            )));
        }
        let mut buf = vec![0u8; self.row_size];
        buf[0] = 1;
        let mut at = 1;
        for (v, col) in row.iter().zip(&self.cols).skip(1) {
            cell::write_cell(&mut buf[at..], v, col.ty, interner)?;
            at += col.ty.size();
        }
        Ok(buf)
    }

    fn save(&mut self, id: RowId, row: Option<&[Value]>, check_new: bool) -> Result<()> {
        let buf = match row {
            Some(row) => self.encode_row(row, self.db.interner().as_ref())?,
            None => vec![0u8; self.row_size],
        };
        let off = self.offset(id);
        self.data.seek(off);
        if !self.data.write_checked(&buf, check_new)? {
            return Err(BurrowError::DuplicateKey {
                table: self.id.0,
                id,
            });
        }
        self.dirty = true;
        Ok(())
    }

    /// Inserts `row`. Without `id_col` the next dense id is allocated;
    /// otherwise the id is taken from that column and must be unused.
    pub fn insert(&mut self, row: &[Value], id_col: Option<usize>) -> Result<RowId> {
        let id = match id_col {
            None => self.check_explicit_id(self.row_count.saturating_add(1))?,
            Some(ix) => match row.get(ix).and_then(Value::as_int) {
                Some(id) if id > 0 => self.check_explicit_id(id)?,
                _ => return Err(BurrowError::Invalid("explicit row id must be a positive integer")),
            },
        };
        self.save(id, Some(row), id_col.is_some())?;
        self.row_count = self.row_count.max(id);
        for ixf in self.indexes.values_mut() {
            let key = ixf.extract_key(row, id)?;
            ixf.insert(&key)?;
        }
        trace!(table = self.id.0, id, "table.insert");
        Ok(id)
    }

    /// Replaces row `id` (currently `old`) with `new`. Indexes whose key
    /// is unchanged are not touched.
    pub fn update(&mut self, id: RowId, old: &[Value], new: &[Value]) -> Result<()> {
        self.check_id(id)?;
        self.save(id, Some(new), false)?;
        for ixf in self.indexes.values_mut() {
            let before = ixf.extract_key(old, id)?;
            let after = ixf.extract_key(new, id)?;
            if before.compare(&after) != std::cmp::Ordering::Equal {
                ixf.delete(&before)?;
                ixf.insert(&after)?;
            }
        }
        Ok(())
    }

    /// Deletes row `id`, whose current contents are `old`.
    pub fn delete(&mut self, id: RowId, old: &[Value]) -> Result<()> {
        self.check_id(id)?;
        self.save(id, None, false)?;
        for ixf in self.indexes.values_mut() {
            let key = ixf.extract_key(old, id)?;
            ixf.delete(&key)?;
        }
        trace!(table = self.id.0, id, "table.delete");
        Ok(())
    }

    fn check_id(&self, id: RowId) -> Result<()> {
        if id <= 0 || id > self.row_count {
            return Err(BurrowError::NotFound("row id"));
        }
        Ok(())
    }

    /// The index whose first key column is `col`, if any.
    pub fn find_index(&mut self, col: usize) -> Option<&mut IndexFile> {
        let id = self
            .index_cols
            .iter()
            .find(|ic| ic.column == col && ic.position == 0)?
            .index_id;
        self.indexes.get_mut(&id)
    }

    /// The index `id`, if attached.
    pub fn index_mut(&mut self, id: IndexId) -> Option<&mut IndexFile> {
        self.indexes.get_mut(&id)
    }

    /// Attaches the existing indexes described by `cols`, grouped by index
    /// id and ordered by key position. Attached indexes survive rollback;
    /// see [`init_index`](Self::init_index) for new ones.
    pub fn open_indexes(&mut self, cols: &[IndexColumn]) -> Result<()> {
        let mut grouped: BTreeMap<IndexId, Vec<IndexColumn>> = BTreeMap::new();
        for ic in cols {
            if ic.column == 0 || ic.column >= self.cols.len() {
                return Err(BurrowError::InvalidOwned(format!(
                    "index {} refers to column {} of {}",
                    ic.index_id, ic.column, self.name
                )));
            }
            grouped.entry(ic.index_id).or_default().push(*ic);
        }
        for (index_id, mut key) in grouped {
            key.sort_by_key(|ic| ic.position);
            let base_ix: Vec<usize> = key.iter().map(|ic| ic.column).collect();
            let types: Vec<DataType> = base_ix.iter().map(|&c| self.cols[c].ty).collect();
            let info = IndexFileInfo::new(index_id, &types, &base_ix)?;
            if self.open_index(info)? {
                self.committed.index_cols.extend(key.iter().copied());
                self.index_cols.extend(key);
            }
        }
        Ok(())
    }

    /// Attaches one index. Returns `false` if it was already attached.
    pub fn open_index(&mut self, info: IndexFileInfo) -> Result<bool> {
        if self.indexes.contains_key(&info.index_id) {
            return Ok(false);
        }
        let stream = self.db.open_stream(FileKind::Index(info.index_id))?;
        let index_id = info.index_id;
        let options = self.db.options();
        let ixf = IndexFile::open(stream, info, self.db.interner(), options.page_size)?;
        self.indexes.insert(index_id, ixf);
        Ok(true)
    }

    /// Indexes every existing row into the freshly created index `id`.
    /// Until the next commit, rollback detaches the index and removes its
    /// file.
    pub fn init_index(&mut self, id: IndexId) -> Result<u64> {
        if !self.indexes.contains_key(&id) {
            return Err(BurrowError::NotFound("index"));
        }
        self.created.insert(id);
        let mut row = self.blank_row();
        let mut added = 0;
        for rid in 1..=self.row_count {
            if !self.get(rid, &mut row, None)? {
                continue;
            }
            let ixf = self
                .indexes
                .get_mut(&id)
                .ok_or(BurrowError::NotFound("index"))?;
            let key = ixf.extract_key(&row, rid)?;
            if ixf.insert(&key)? {
                added += 1;
            }
        }
        self.dirty = true;
        debug!(table = self.id.0, index = id.0, rows = added, "table.init_index");
        Ok(added)
    }

    /// Detaches index `id` and schedules its file for deletion at commit.
    pub fn close_and_delete_index(&mut self, id: IndexId) -> Result<bool> {
        let Some(mut ixf) = self.indexes.remove(&id) else {
            return Ok(false);
        };
        self.index_cols.retain(|ic| ic.index_id != id);
        ixf.discard()?;
        self.db.schedule_delete(ixf.file_id());
        self.dropped.push(ixf);
        self.dirty = true;
        Ok(true)
    }

    /// Empties the table and every index and schedules all their files for
    /// deletion at commit.
    pub fn close_and_delete(&mut self) -> Result<()> {
        let ids: Vec<IndexId> = self.indexes.keys().copied().collect();
        for id in ids {
            self.close_and_delete_index(id)?;
        }
        self.data.set_len(0)?;
        self.db.schedule_delete(self.data.file_id());
        self.row_count = 0;
        self.dirty = true;
        Ok(())
    }

    /// Rewrites every row for `new_cols`. `map[i]` is the old column that
    /// new column `i` is copied from, or `None` for a new default-valued
    /// column. Copied columns must keep their base type and indexed columns
    /// must keep their exact type.
    pub fn alter_data(&mut self, new_cols: Vec<ColumnInfo>, map: &[Option<usize>]) -> Result<()> {
        if new_cols.len() != map.len() {
            return Err(BurrowError::Invalid("column map length differs from new column list"));
        }
        if map.first() != Some(&Some(0)) || new_cols[0].ty != DataType::Bigint {
            return Err(BurrowError::Invalid("row id column must stay first"));
        }
        for (col, m) in new_cols.iter().zip(map) {
            if let Some(old) = m {
                let from = self.cols.get(*old).ok_or(BurrowError::Invalid(
                    "column map refers to a missing column",
                ))?;
                if from.ty.base() != col.ty.base() {
                    return Err(BurrowError::InvalidOwned(format!(
                        "cannot change column {} from {} to {}",
                        from.name, from.ty, col.ty
                    )));
                }
            }
        }
        let mut remapped = self.index_cols.clone();
        for ic in &mut remapped {
            let to = map
                .iter()
                .zip(&new_cols)
                .position(|(m, c)| *m == Some(ic.column) && c.ty == self.cols[ic.column].ty)
                .ok_or_else(|| {
                    BurrowError::InvalidOwned(format!(
                        "column {} is used by index {}",
                        self.cols[ic.column].name, ic.index_id
                    ))
                })?;
            ic.column = to;
        }

        let interner = self.db.interner();
        let mut defaults = Vec::with_capacity(new_cols.len());
        for col in &new_cols {
            defaults.push(cell::to_bits(&col.ty.default_value(), col.ty, interner.as_ref())?);
        }
        let old_cols = self.cols.clone();
        let old_size = self.row_size;
        let new_size = row_size_of(&new_cols);
        let desc = new_size > old_size;
        let count = self.row_count as u64;
        let mut old_bits = vec![0u64; old_cols.len()];
        let mut out = vec![0u8; new_size];
        for n in 0..count {
            let ix = if desc { count - 1 - n } else { n };
            self.data.seek(ix * old_size as u64);
            let live = {
                let buf = self.data.fast_read(old_size)?;
                if buf[0] != 0 {
                    let mut at = 1;
                    for (i, col) in old_cols.iter().enumerate().skip(1) {
                        old_bits[i] = decode_cell(&buf[at..], col.ty);
                        at += col.ty.size();
                    }
                }
                buf[0] != 0
            };
            out.fill(0);
            if live {
                out[0] = 1;
                let mut at = 1;
                for (i, col) in new_cols.iter().enumerate().skip(1) {
                    let bits = match map[i] {
                        Some(old) => fit(old_bits[old], old_cols[old].ty, col.ty)?,
                        None => defaults[i],
                    };
                    encode_cell(&mut out[at..], bits, col.ty);
                    at += col.ty.size();
                }
            }
            self.data.write_at(ix * new_size as u64, &out)?;
        }
        if new_size < old_size {
            self.data.set_len(count * new_size as u64)?;
        }
        for ic in &remapped {
            if let Some(ixf) = self.indexes.get_mut(&ic.index_id) {
                ixf.remap_column(ic.position, ic.column);
            }
        }
        debug!(
            table = self.id.0,
            rows = count,
            old_size,
            new_size,
            descending = desc,
            "table.alter"
        );
        self.index_cols = remapped;
        self.cols = new_cols;
        self.row_size = new_size;
        self.dirty = true;
        Ok(())
    }

    /// Runs one commit stage on the row file and every index.
    pub fn commit(&mut self, stage: CommitStage) -> Result<()> {
        if stage == CommitStage::Rollback {
            self.rollback();
            return Ok(());
        }
        if !self.is_dirty() {
            return Ok(());
        }
        if stage == CommitStage::Flush {
            self.data.commit(CommitStage::Flush)?;
        }
        for ixf in self.indexes.values_mut().chain(self.dropped.iter_mut()) {
            ixf.commit(stage)?;
        }
        if stage == CommitStage::Flush {
            self.dropped.clear();
            self.created.clear();
            self.mark_committed();
            self.dirty = false;
            debug!(table = self.id.0, rows = self.row_count, "table.flush");
        }
        Ok(())
    }

    /// Records the current schema and index set as the state rollback
    /// returns to.
    pub(crate) fn mark_committed(&mut self) {
        self.committed = Committed {
            cols: self.cols.clone(),
            index_cols: self.index_cols.clone(),
        };
    }

    /// Discards every change since the last flush, including schema
    /// changes and indexes created by [`init_index`](Self::init_index).
    pub fn rollback(&mut self) {
        self.data.rollback();
        for ixf in self.dropped.drain(..) {
            self.db.cancel_delete(ixf.file_id());
            self.indexes.insert(ixf.info().index_id, ixf);
        }
        self.db.cancel_delete(self.data.file_id());
        for id in std::mem::take(&mut self.created) {
            if let Some(ixf) = self.indexes.remove(&id) {
                self.db.forget_file(ixf.file_id());
            }
        }
        let Committed { cols, mut index_cols } = self.committed.clone();
        index_cols.retain(|ic| self.indexes.contains_key(&ic.index_id));
        for ixf in self.indexes.values_mut() {
            ixf.rollback();
            let id = ixf.info().index_id;
            for ic in index_cols.iter().filter(|ic| ic.index_id == id) {
                ixf.remap_column(ic.position, ic.column);
            }
        }
        self.row_size = row_size_of(&cols);
        self.row_count = (self.data.len() / self.row_size as u64) as RowId;
        self.cols = cols;
        self.index_cols = index_cols;
        self.dirty = false;
    }

    /// Shared handle to this table's database.
    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    /// Index infos for every attached index.
    pub fn index_infos(&self) -> Vec<Arc<IndexFileInfo>> {
        self.indexes.values().map(IndexFile::info_arc).collect()
    }
}

/// Converts the raw bits of an `from` cell to a `to` cell of the same
/// base type, rejecting integers that no longer fit.
fn fit(bits: u64, from: DataType, to: DataType) -> Result<u64> {
    if from.base() == crate::types::BaseType::Int && to.size() < 8 {
        let v = bits as i64;
        let width = 8 * to.size() as u32;
        let min = -(1i64 << (width - 1));
        let max = (1i64 << (width - 1)) - 1;
        if v < min || v > max {
            return Err(BurrowError::InvalidOwned(format!(
                "value {v} does not fit {to}"
            )));
        }
    }
    Ok(bits)
}

/// Iterator returned by [`Table::get_all`].
pub struct RowScan<'a> {
    table: &'a mut Table,
    next: RowId,
    end: RowId,
    used: Option<Vec<bool>>,
}

impl Iterator for RowScan<'_> {
    type Item = Result<(RowId, Vec<Value>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next <= self.end {
            let id = self.next;
            self.next += 1;
            let mut row = self.table.blank_row();
            match self.table.get(id, &mut row, self.used.as_deref()) {
                Ok(true) => return Some(Ok((id, row))),
                Ok(false) => {}
                Err(e) => {
                    self.next = self.end + 1;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseOptions};
    use tempfile::tempdir;

    fn people(db: &mut Database) -> Result<&mut Table> {
        db.create_table(
            TableId(1),
            "people",
            vec![
                ColumnInfo::id(),
                ColumnInfo::new("name", DataType::String),
                ColumnInfo::new("age", DataType::Int),
            ],
        )
    }

    fn person(name: &str, age: i64) -> Vec<Value> {
        vec![Value::Int(0), Value::str(name), Value::Int(age)]
    }

    #[test]
    fn insert_get_delete_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), DatabaseOptions::default())?;
        let t = people(&mut db)?;
        assert_eq!(t.row_size(), 1 + 8 + 4);
        let id = t.insert(&person("ann", 31), None)?;
        assert_eq!(id, 1);
        let row = t.row(id)?.ok_or(BurrowError::NotFound("row"))?;
        assert_eq!(row, vec![Value::Int(1), Value::str("ann"), Value::Int(31)]);
        t.delete(id, &row)?;
        assert!(t.row(id)?.is_none());
        assert_eq!(t.insert(&person("bob", 40), None)?, 2);
        Ok(())
    }

    #[test]
    fn explicit_ids_detect_duplicates() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), DatabaseOptions::default())?;
        let t = people(&mut db)?;
        let mut row = person("cy", 5);
        row[0] = Value::Int(10);
        assert_eq!(t.insert(&row, Some(0))?, 10);
        assert_eq!(t.row_count(), 10);
        let err = t.insert(&row, Some(0)).unwrap_err();
        assert!(matches!(err, BurrowError::DuplicateKey { table: 1, id: 10 }));
        assert!(t.row(4)?.is_none());
        assert_eq!(t.insert(&person("di", 6), None)?, 11);
        Ok(())
    }

    #[test]
    fn out_of_range_explicit_ids_are_rejected() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), DatabaseOptions::default())?;
        let t = people(&mut db)?;
        for id in [i64::MAX, i64::MAX / 4] {
            let mut row = person("big", 1);
            row[0] = Value::Int(id);
            let err = t.insert(&row, Some(0)).unwrap_err();
            assert!(matches!(err, BurrowError::InvalidOwned(_)), "{err}");
        }
        assert_eq!(t.row_count(), 0);
        assert_eq!(t.insert(&person("small", 2), None)?, 1);
        Ok(())
    }

    #[test]
    fn updates_keep_indexes_in_step() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), DatabaseOptions::default())?;
        people(&mut db)?;
        db.create_index(TableId(1), IndexId(1), &[2])?;
        let t = db.table_mut(TableId(1)).ok_or(BurrowError::NotFound("table"))?;
        for (name, age) in [("a", 30), ("b", 20), ("c", 40)] {
            t.insert(&person(name, age), None)?;
        }
        let old = t.row(2)?.ok_or(BurrowError::NotFound("row"))?;
        t.update(2, &old, &person("b", 50))?;
        let ages: Vec<i64> = t
            .find_index(2)
            .ok_or(BurrowError::NotFound("index"))?
            .scan(false)
            .map(|r| r.map(|r| r.cols[0].as_int().unwrap_or(0)))
            .collect::<Result<_>>()?;
        assert_eq!(ages, vec![30, 40, 50]);
        assert!(t.find_index(1).is_none());
        Ok(())
    }

    #[test]
    fn get_all_skips_deleted_rows_and_honours_used() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), DatabaseOptions::default())?;
        let t = people(&mut db)?;
        for i in 0..5 {
            t.insert(&person(&format!("p{i}"), i), None)?;
        }
        let old = t.row(3)?.ok_or(BurrowError::NotFound("row"))?;
        t.delete(3, &old)?;
        let rows: Vec<(RowId, Vec<Value>)> = t
            .get_all(Some(vec![true, false, true]))
            .collect::<Result<_>>()?;
        assert_eq!(rows.iter().map(|r| r.0).collect::<Vec<_>>(), vec![1, 2, 4, 5]);
        assert_eq!(rows[2].1, vec![Value::Int(4), Value::str(""), Value::Int(3)]);
        Ok(())
    }

    #[test]
    fn alter_shrinks_rows_ascending() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), DatabaseOptions::default())?;
        let t = people(&mut db)?;
        for i in 0..20 {
            t.insert(&person(&format!("n{i}"), i), None)?;
        }
        let new_cols = vec![ColumnInfo::id(), ColumnInfo::new("age", DataType::Smallint)];
        t.alter_data(new_cols, &[Some(0), Some(2)])?;
        assert_eq!(t.row_size(), 3);
        for i in 1..=20 {
            assert_eq!(t.row(i)?, Some(vec![Value::Int(i), Value::Int(i - 1)]));
        }
        Ok(())
    }

    #[test]
    fn alter_refuses_to_drop_indexed_column() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), DatabaseOptions::default())?;
        people(&mut db)?;
        db.create_index(TableId(1), IndexId(3), &[1])?;
        let t = db.table_mut(TableId(1)).ok_or(BurrowError::NotFound("table"))?;
        let res = t.alter_data(
            vec![ColumnInfo::id(), ColumnInfo::new("age", DataType::Int)],
            &[Some(0), Some(2)],
        );
        assert!(res.is_err());
        let moved = t.alter_data(
            vec![
                ColumnInfo::id(),
                ColumnInfo::new("age", DataType::Int),
                ColumnInfo::new("name", DataType::String),
            ],
            &[Some(0), Some(2), Some(1)],
        );
        assert!(moved.is_ok());
        assert_eq!(t.index_columns()[0].column, 2);
        assert!(t.find_index(2).is_some());
        Ok(())
    }

    #[test]
    fn rollback_restores_rows_and_schema() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), DatabaseOptions::default())?;
        people(&mut db)?;
        db.commit()?;
        let t = db.table_mut(TableId(1)).ok_or(BurrowError::NotFound("table"))?;
        t.insert(&person("x", 1), None)?;
        t.alter_data(
            vec![ColumnInfo::id(), ColumnInfo::new("name", DataType::String)],
            &[Some(0), Some(1)],
        )?;
        db.rollback()?;
        let t = db.table_mut(TableId(1)).ok_or(BurrowError::NotFound("table"))?;
        assert_eq!(t.columns().len(), 3);
        assert_eq!(t.row_count(), 0);
        assert!(!t.is_dirty());
        Ok(())
    }
}
