#![forbid(unsafe_code)]

//! Database handle: owns the log, the value pool and the open tables, and
//! drives them through the commit protocol.
//!
//! A commit runs `Prepare` on every participant, makes the log durable,
//! runs `Flush` on every participant, deletes dropped files and finally
//! empties the log. A crash anywhere after the log is durable is repaired
//! by replay on the next open.

mod config;


use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::primitives::io::remove_file;
use crate::primitives::stream::{BufferedStream, CommitStage};
use crate::primitives::wal::{file_path, Log, LogOptions, LogStats, RecoveryReport};
use crate::storage::pool::{
    ValueInterner, ValuePool, BINARY_DATA_FILE, BINARY_INDEX_FILE, STRING_DATA_FILE,
    STRING_INDEX_FILE,
};
use crate::storage::table::{ColumnInfo, IndexColumn, Table};
use crate::types::{BurrowError, FileId, IndexId, Result, TableId};

pub use config::{DatabaseOptions, Synchronous};

/// What a numbered file in the database directory holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Interned string bytes (file 0).
    StringPool,
    /// Lookup index of the string pool (file 1).
    StringPoolIndex,
    /// Interned binary values (file 2).
    BinaryPool,
    /// Lookup index of the binary pool (file 3).
    BinaryPoolIndex,
    /// Rows of a table (`4 + 2 * id`).
    Table(TableId),
    /// Pages of an index (`4 + 2 * id + 1`).
    Index(IndexId),
}

impl FileKind {
    /// File number for this kind.
    pub fn file_id(self) -> FileId {
        match self {
            FileKind::StringPool => STRING_DATA_FILE,
            FileKind::StringPoolIndex => STRING_INDEX_FILE,
            FileKind::BinaryPool => BINARY_DATA_FILE,
            FileKind::BinaryPoolIndex => BINARY_INDEX_FILE,
            FileKind::Table(id) => FileId(4 + 2 * id.0 as i64),
            FileKind::Index(id) => FileId(4 + 2 * id.0 as i64 + 1),
        }
    }

    /// Inverse of [`file_id`](Self::file_id).
    pub fn classify(file: FileId) -> Option<FileKind> {
        match file.0 {
            0 => Some(FileKind::StringPool),
            1 => Some(FileKind::StringPoolIndex),
            2 => Some(FileKind::BinaryPool),
            3 => Some(FileKind::BinaryPoolIndex),
            n if n >= 4 && n % 2 == 0 => Some(FileKind::Table(TableId(((n - 4) / 2) as u64))),
            n if n >= 4 => Some(FileKind::Index(IndexId(((n - 5) / 2) as u64))),
            _ => None,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::StringPool => f.write_str("string pool"),
            FileKind::StringPoolIndex => f.write_str("string pool index"),
            FileKind::BinaryPool => f.write_str("binary pool"),
            FileKind::BinaryPoolIndex => f.write_str("binary pool index"),
            FileKind::Table(id) => write!(f, "table {id}"),
            FileKind::Index(id) => write!(f, "index {id}"),
        }
    }
}

struct Shared {
    dir: PathBuf,
    options: DatabaseOptions,
    log: Arc<Log>,
    pool: Arc<ValuePool>,
    deleted: Mutex<BTreeSet<FileId>>,
}

/// Cheaply cloneable access to the directory, options, log and value pool
/// of one open database.
#[derive(Clone)]
pub struct DbHandle {
    shared: Arc<Shared>,
}

impl DbHandle {
    /// Database directory.
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// Options the database was opened with.
    pub fn options(&self) -> &DatabaseOptions {
        &self.shared.options
    }

    /// The shared log.
    pub fn log(&self) -> &Arc<Log> {
        &self.shared.log
    }

    /// The value pool.
    pub fn pool(&self) -> &Arc<ValuePool> {
        &self.shared.pool
    }

    /// The value pool as an interner.
    pub fn interner(&self) -> Arc<dyn ValueInterner> {
        Arc::clone(&self.shared.pool) as Arc<dyn ValueInterner>
    }

    /// Opens a log-backed stream over the file for `kind`.
    pub fn open_stream(&self, kind: FileKind) -> Result<BufferedStream> {
        let options = &self.shared.options;
        BufferedStream::open(
            Arc::clone(&self.shared.log),
            &self.shared.dir,
            kind.file_id(),
            options.buffer_size,
            options.synchronous.syncs(),
        )
    }

    pub(crate) fn schedule_delete(&self, file: FileId) {
        self.shared.deleted.lock().insert(file);
    }

    pub(crate) fn cancel_delete(&self, file: FileId) {
        self.shared.deleted.lock().remove(&file);
    }

    fn take_deleted(&self) -> BTreeSet<FileId> {
        std::mem::take(&mut *self.shared.deleted.lock())
    }

    /// Removes a file that was created but never committed.
    pub(crate) fn forget_file(&self, file: FileId) {
        if let Err(err) = remove_file(file_path(&self.shared.dir, file)) {
            warn!(file = file.0, error = %err, "db.forget_file.failed");
        }
    }
}

/// An open database directory.
pub struct Database {
    handle: DbHandle,
    tables: BTreeMap<TableId, Table>,
    dropped: Vec<Table>,
    created: BTreeSet<TableId>,
}

impl Database {
    /// Opens the database in `dir`, replaying the log first.
    pub fn open(dir: impl AsRef<Path>, options: DatabaseOptions) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref();
        if !dir.exists() {
            if !options.create_if_missing {
                return Err(BurrowError::NotFound("database directory"));
            }
            std::fs::create_dir_all(dir)?;
        }
        let sync = options.synchronous.syncs();
        let log = Arc::new(Log::open(dir, LogOptions { sync })?);
        let recovery = log.recovery();
        if recovery.transactions > 0 || recovery.torn_tail {
            info!(
                transactions = recovery.transactions,
                entries = recovery.entries_applied,
                torn_tail = recovery.torn_tail,
                "db.recovered"
            );
        }
        let pool = Arc::new(ValuePool::open(
            Arc::clone(&log),
            dir,
            options.buffer_size,
            options.page_size,
            sync,
        )?);
        debug!(dir = %dir.display(), page_size = options.page_size, "db.open");
        Ok(Self {
            handle: DbHandle {
                shared: Arc::new(Shared {
                    dir: dir.to_path_buf(),
                    options,
                    log,
                    pool,
                    deleted: Mutex::new(BTreeSet::new()),
                }),
            },
            tables: BTreeMap::new(),
            dropped: Vec::new(),
            created: BTreeSet::new(),
        })
    }

    /// Shared handle passed to tables and indexes.
    pub fn handle(&self) -> &DbHandle {
        &self.handle
    }

    /// What log replay did during [`open`](Self::open).
    pub fn recovery(&self) -> &RecoveryReport {
        self.handle.log().recovery()
    }

    /// Log counters.
    pub fn log_stats(&self) -> LogStats {
        self.handle.log().stats()
    }

    /// Creates table `id`. Its file must not hold rows yet.
    pub fn create_table(
        &mut self,
        id: TableId,
        name: &str,
        cols: Vec<ColumnInfo>,
    ) -> Result<&mut Table> {
        if self.tables.contains_key(&id) || self.dropped.iter().any(|t| t.id() == id) {
            return Err(BurrowError::InvalidOwned(format!("table {id} already exists")));
        }
        let table = Table::open(self.handle.clone(), id, name, cols)?;
        if table.row_count() != 0 {
            return Err(BurrowError::InvalidOwned(format!(
                "file for table {id} already holds rows"
            )));
        }
        self.created.insert(id);
        Ok(self.tables.entry(id).or_insert(table))
    }

    /// Opens existing table `id` with its indexes.
    pub fn open_table(
        &mut self,
        id: TableId,
        name: &str,
        cols: Vec<ColumnInfo>,
        indexes: &[IndexColumn],
    ) -> Result<&mut Table> {
        if self.tables.contains_key(&id) {
            return Err(BurrowError::InvalidOwned(format!("table {id} is already open")));
        }
        let mut table = Table::open(self.handle.clone(), id, name, cols)?;
        table.open_indexes(indexes)?;
        table.mark_committed();
        Ok(self.tables.entry(id).or_insert(table))
    }

    /// Table `id`, if open.
    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(&id)
    }

    /// Table `id`, if open.
    pub fn table_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(&id)
    }

    /// Every open table, by id.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Creates index `index_id` over `columns` of `table` and indexes the
    /// existing rows. Returns the number of rows indexed.
    pub fn create_index(
        &mut self,
        table: TableId,
        index_id: IndexId,
        columns: &[usize],
    ) -> Result<u64> {
        if self
            .tables
            .values()
            .any(|t| t.index_columns().iter().any(|ic| ic.index_id == index_id))
        {
            return Err(BurrowError::InvalidOwned(format!("index {index_id} already exists")));
        }
        let t = self
            .tables
            .get_mut(&table)
            .ok_or(BurrowError::NotFound("table"))?;
        t.open_indexes(&IndexColumn::for_index(index_id, columns))?;
        t.init_index(index_id)
    }

    /// Drops index `index_id` of `table`. Its file is deleted at commit.
    pub fn drop_index(&mut self, table: TableId, index_id: IndexId) -> Result<bool> {
        let t = self
            .tables
            .get_mut(&table)
            .ok_or(BurrowError::NotFound("table"))?;
        t.close_and_delete_index(index_id)
    }

    /// Drops table `id` and its indexes. Files are deleted at commit.
    pub fn drop_table(&mut self, id: TableId) -> Result<bool> {
        let Some(mut table) = self.tables.remove(&id) else {
            return Ok(false);
        };
        table.close_and_delete()?;
        self.dropped.push(table);
        Ok(true)
    }

    fn run_stage(&mut self, stage: CommitStage) -> Result<()> {
        self.handle.pool().commit(stage)?;
        for table in self.tables.values_mut().chain(self.dropped.iter_mut()) {
            table.commit(stage)?;
        }
        Ok(())
    }

    /// Commits every change since the last commit or rollback.
    ///
    /// A failure before the log is durable rolls back. A failure after it
    /// leaves the in-memory state undefined; reopening the database
    /// completes the transaction from the log.
    pub fn commit(&mut self) -> Result<()> {
        let started = Instant::now();
        let logged = match self
            .run_stage(CommitStage::Prepare)
            .and_then(|_| self.handle.log().commit())
        {
            Ok(logged) => logged,
            Err(err) => {
                warn!(error = %err, "db.commit.aborted");
                self.rollback()?;
                return Err(err);
            }
        };
        self.run_stage(CommitStage::Flush)?;
        let deleted = self.handle.take_deleted();
        for file in &deleted {
            remove_file(file_path(self.handle.dir(), *file))?;
        }
        self.dropped.clear();
        self.created.clear();
        self.handle.log().reset()?;
        debug!(
            logged,
            tables = self.tables.len(),
            deleted = deleted.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "db.commit.complete"
        );
        Ok(())
    }

    /// Discards every change since the last commit: rows, indexes, interned
    /// values, created and dropped tables.
    pub fn rollback(&mut self) -> Result<()> {
        self.handle.log().reset()?;
        self.handle.pool().rollback();
        for table in self.dropped.drain(..) {
            self.tables.insert(table.id(), table);
        }
        for table in self.tables.values_mut() {
            table.rollback();
        }
        for id in std::mem::take(&mut self.created) {
            if let Some(table) = self.tables.remove(&id) {
                self.handle.forget_file(table.file_id());
            }
        }
        self.handle.take_deleted();
        debug!(tables = self.tables.len(), "db.rollback");
        Ok(())
    }

    /// Runs `f`, committing if it succeeds and rolling back if it fails.
    pub fn batch<T>(&mut self, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                warn!(error = %err, "db.batch.rollback");
                self.rollback()?;
                Err(err)
            }
        }
    }

    /// Closes the database, discarding uncommitted changes.
    pub fn close(mut self) -> Result<()> {
        if self.tables.values().any(Table::is_dirty) || self.handle.pool().is_dirty() {
            warn!("db.close.discarding_uncommitted");
        }
        self.rollback()?;
        debug!(dir = %self.handle.dir().display(), "db.close");
        Ok(())
    }
}
