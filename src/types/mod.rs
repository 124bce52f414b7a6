#![forbid(unsafe_code)]
//! Identifiers, the crate error type and the column value model.

use std::fmt;

mod value;

pub use value::{decode_cell, encode_cell, BaseType, DataType, Value};

/// Numeric identifier of a file inside the database directory.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct FileId(pub i64);

/// Page number inside an index file (48 bits on disk).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PageId(pub u64);

/// Dense, 1-based row identifier.
pub type RowId = i64;

/// Identifier of a table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TableId(pub u64);

/// Identifier of a secondary index.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct IndexId(pub u64);

impl PageId {
    /// The root page of every index file.
    pub const ROOT: PageId = PageId(0);
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by the storage engine.
#[derive(thiserror::Error, Debug)]
pub enum BurrowError {
    /// Failure reported by the operating system.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk structure failed a consistency check.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// On-disk structure failed a consistency check (with context).
    #[error("corruption: {0}")]
    CorruptionOwned(String),
    /// Caller supplied an argument the engine cannot accept.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Caller supplied an argument the engine cannot accept (with context).
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// A named object does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// An insert targeted a row slot that is already occupied.
    #[error("duplicate id {id} in table {table}")]
    DuplicateKey {
        /// Table that rejected the row.
        table: u64,
        /// Row id that was already in use.
        id: RowId,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BurrowError>;
