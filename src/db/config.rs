use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{BurrowError, Result};

/// Whether commits wait for the OS to report data durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    /// fsync the log at commit and every flushed file.
    Full,
    /// Never fsync; a power loss may lose recent commits.
    Off,
}

impl Synchronous {
    /// Lowercase name as used in config files.
    pub fn as_str(self) -> &'static str {
        match self {
            Synchronous::Full => "full",
            Synchronous::Off => "off",
        }
    }

    /// Whether fsync is enabled.
    pub fn syncs(self) -> bool {
        self == Synchronous::Full
    }
}

impl fmt::Display for Synchronous {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Synchronous {
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Synchronous::Full),
            "off" => Ok(Synchronous::Off),
            other => Err(BurrowError::InvalidOwned(format!(
                "unknown synchronous mode {other:?}"
            ))),
        }
    }
}

/// Options for [`super::Database::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Bytes per stream buffer (power of two).
    pub buffer_size: usize,
    /// Bytes per index page (power of two in 512..=65536).
    pub page_size: usize,
    /// fsync policy.
    pub synchronous: Synchronous,
    /// Create the directory when it does not exist.
    pub create_if_missing: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            page_size: 4096,
            synchronous: Synchronous::Full,
            create_if_missing: true,
        }
    }
}

impl DatabaseOptions {
    /// Durable defaults with larger buffers for bulk loads.
    pub fn bulk() -> Self {
        Self {
            buffer_size: 65536,
            ..Self::default()
        }
    }

    /// No fsync; for tests and scratch data.
    pub fn unsynced() -> Self {
        Self {
            synchronous: Synchronous::Off,
            ..Self::default()
        }
    }

    /// Sets the stream buffer size.
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Sets the index page size.
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Sets the fsync policy.
    pub fn synchronous(mut self, mode: Synchronous) -> Self {
        self.synchronous = mode;
        self
    }

    /// Sets whether a missing directory is created.
    pub fn create_if_missing(mut self, yes: bool) -> Self {
        self.create_if_missing = yes;
        self
    }

    /// Rejects sizes the storage layer cannot use.
    pub fn validate(&self) -> Result<()> {
        if !self.buffer_size.is_power_of_two() || self.buffer_size < 64 {
            return Err(BurrowError::InvalidOwned(format!(
                "buffer_size {} must be a power of two >= 64",
                self.buffer_size
            )));
        }
        if !self.page_size.is_power_of_two() || !(512..=65536).contains(&self.page_size) {
            return Err(BurrowError::InvalidOwned(format!(
                "page_size {} must be a power of two between 512 and 65536",
                self.page_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(DatabaseOptions::default().validate().is_ok());
        assert!(DatabaseOptions::bulk().validate().is_ok());
    }

    #[test]
    fn bad_sizes_are_rejected() {
        assert!(DatabaseOptions::default().page_size(1000).validate().is_err());
        assert!(DatabaseOptions::default().page_size(256).validate().is_err());
        assert!(DatabaseOptions::default().buffer_size(32).validate().is_err());
    }

    #[test]
    fn synchronous_parses_case_insensitively() -> Result<()> {
        assert_eq!("FULL".parse::<Synchronous>()?, Synchronous::Full);
        assert_eq!("off".parse::<Synchronous>()?, Synchronous::Off);
        assert!("normal".parse::<Synchronous>().is_err());
        assert_eq!(Synchronous::Off.to_string(), "off");
        Ok(())
    }
}
