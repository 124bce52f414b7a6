#![forbid(unsafe_code)]

//! Offline inspection and maintenance of a database directory.
//!
//! Every function takes the directory path and returns a serializable
//! report, so the CLI can print it as text or JSON.

mod error;
mod files;
mod log;
mod util;
mod verify;

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Classification of the numbered files in a database directory.
pub use files::{list_files, FileEntry, FilesReport};

/// Log inspection and replay.
///
/// `inspect_log` decodes records without touching any data file;
/// `recover` applies committed transactions and empties the log.
pub use log::{inspect_log, recover, LogEntry, LogReport, RecoverReport};

/// Structural check of a single index file.
pub use verify::{verify_index, VerifyIndexReport};
