use std::path::Path;

use crate::db::{Database, DatabaseOptions};

use crate::admin::error::{AdminError, Result};

/// Fails unless `dir` is an existing directory.
pub(crate) fn require_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(AdminError::missing_database(dir))
    }
}

/// Opens an existing database without creating anything.
pub(crate) fn open_database(dir: &Path, opts: &DatabaseOptions) -> Result<Database> {
    require_dir(dir)?;
    Ok(Database::open(dir, opts.clone().create_if_missing(false))?)
}
