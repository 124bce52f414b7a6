//! Low-level primitives the storage structures are built on.
//!
//! Includes byte packing, positioned file I/O, the redo log and the
//! buffered page stream that routes every write through it.

/// Byte-level packing and varints.
pub mod bytes;

/// Positioned file I/O.
pub mod io;

/// Buffered, log-backed file streams.
///
/// Every mutation is recorded in the log before it touches a cache buffer;
/// buffers reach the OS file only during a commit stage.
pub mod stream;

/// Redo log for multi-file atomic commits.
///
/// Replayed at open to finish transactions interrupted by a crash.
pub mod wal;
