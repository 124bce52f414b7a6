//! burrow: an embedded table store with B+-tree secondary indexes, an
//! interned value pool and a redo log that makes multi-file commits atomic.
//!
//! The usual entry point is [`db::Database`]:
//!
//! ```no_run
//! use burrow::db::{Database, DatabaseOptions};
//! use burrow::storage::ColumnInfo;
//! use burrow::types::{DataType, TableId, Value};
//!
//! # fn main() -> burrow::types::Result<()> {
//! let mut db = Database::open("data", DatabaseOptions::default())?;
//! db.create_table(
//!     TableId(1),
//!     "people",
//!     vec![ColumnInfo::id(), ColumnInfo::new("name", DataType::String)],
//! )?;
//! db.batch(|db| {
//!     let people = db
//!         .table_mut(TableId(1))
//!         .ok_or(burrow::types::BurrowError::NotFound("table"))?;
//!     people.insert(&[Value::Int(0), Value::str("Ada")], None)
//! })?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod admin;
pub mod cli;
pub mod db;
pub mod primitives;
pub mod storage;
pub mod types;

pub use db::{Database, DatabaseOptions, DbHandle, Synchronous};
pub use types::{BurrowError, Result};
