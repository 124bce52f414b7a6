use std::path::Path;

use crate::db::{DatabaseOptions, FileKind};
use crate::primitives::wal::file_path;
use crate::storage::index::{IndexFile, IndexFileInfo, IndexVerifyReport};
use crate::types::{DataType, IndexId};
use serde::Serialize;

use crate::admin::error::AdminError;
use crate::admin::util::open_database;
use crate::admin::Result;

/// Outcome of checking one index file.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyIndexReport {
    /// Whether every check passed.
    pub success: bool,
    /// Key column types the file was read with (row id excluded).
    pub key_types: Vec<String>,
    /// Page size the file was read with.
    pub page_size: usize,
    /// Counts gathered by the walk; absent when it failed.
    pub counts: Option<IndexVerifyReport>,
    /// Failure description when `success` is false.
    pub error: Option<String>,
}

/// Verifies the structure of index `index_id` in `dir`.
///
/// The key types must match those the index was created with; the trailing
/// row id column is implied. The log is replayed first, like any open.
/// Corruption is reported in the result; only I/O and open failures are
/// returned as errors.
pub fn verify_index(
    dir: impl AsRef<Path>,
    index_id: IndexId,
    key_types: &[DataType],
    opts: &DatabaseOptions,
) -> Result<VerifyIndexReport> {
    let dir = dir.as_ref();
    let db = open_database(dir, opts)?;
    let kind = FileKind::Index(index_id);
    let path = file_path(dir, kind.file_id());
    if !path.is_file() {
        return Err(AdminError::missing_file(path));
    }
    let base_ix: Vec<usize> = (1..=key_types.len()).collect();
    let info = IndexFileInfo::new(index_id, key_types, &base_ix)?;
    let handle = db.handle().clone();
    let stream = handle.open_stream(kind)?;
    let outcome = IndexFile::open(stream, info, handle.interner(), opts.page_size)
        .and_then(|mut ixf| ixf.verify());
    db.close()?;
    let key_types = key_types.iter().map(ToString::to_string).collect();
    Ok(match outcome {
        Ok(counts) => VerifyIndexReport {
            success: true,
            key_types,
            page_size: opts.page_size,
            counts: Some(counts),
            error: None,
        },
        Err(err) => VerifyIndexReport {
            success: false,
            key_types,
            page_size: opts.page_size,
            counts: None,
            error: Some(err.to_string()),
        },
    })
}
