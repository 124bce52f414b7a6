//! Storage structures layered on the buffered streams: fixed-width row
//! tables, the B+-tree index files and the interned value pool.

pub mod cell;
pub mod index;
pub mod pool;
pub mod table;

pub use index::{IndexFile, IndexFileInfo, IndexRecord, KeySeek, SeekOp};
pub use pool::{MemoryInterner, PoolStats, ValueInterner, ValuePool};
pub use table::{ColumnInfo, IndexColumn, Table};
