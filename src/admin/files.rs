use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::db::FileKind;
use crate::primitives::wal::LOG_FILE_NAME;
use crate::types::FileId;

use crate::admin::util::require_dir;
use crate::admin::Result;

/// A numbered file found in the database directory.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    /// Numeric file id (the file name).
    pub file_id: i64,
    /// What the file holds.
    pub kind: String,
    /// Size on disk.
    pub size_bytes: u64,
}

/// Directory listing produced by [`list_files`].
#[derive(Debug, Clone, Serialize)]
pub struct FilesReport {
    /// Database directory.
    pub dir: String,
    /// Numbered files, by id.
    pub files: Vec<FileEntry>,
    /// Size of the log file, if present.
    pub log_bytes: Option<u64>,
    /// Names that are neither numbered files nor the log.
    pub unknown: Vec<String>,
}

/// Classifies every entry of `dir` by file id.
pub fn list_files(dir: impl AsRef<Path>) -> Result<FilesReport> {
    let dir = dir.as_ref();
    require_dir(dir)?;
    let mut report = FilesReport {
        dir: dir.display().to_string(),
        files: Vec::new(),
        log_bytes: None,
        unknown: Vec::new(),
    };
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let meta = entry.metadata()?;
        if name == LOG_FILE_NAME {
            report.log_bytes = Some(meta.len());
            continue;
        }
        let kind = name
            .parse::<i64>()
            .ok()
            .filter(|_| meta.is_file())
            .and_then(|id| FileKind::classify(FileId(id)).map(|kind| (id, kind)));
        match kind {
            Some((file_id, kind)) => report.files.push(FileEntry {
                file_id,
                kind: kind.to_string(),
                size_bytes: meta.len(),
            }),
            None => report.unknown.push(name),
        }
    }
    report.files.sort_by_key(|f| f.file_id);
    report.unknown.sort();
    Ok(report)
}
