use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{DatabaseOptions, Synchronous};

/// Named set of overrides for [`DatabaseOptions`].
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    /// Profile name (the `[profiles.<name>]` key).
    pub name: String,
    /// Database directory used when the command line names none.
    pub database: Option<PathBuf>,
    /// Stream buffer size override.
    pub buffer_size: Option<usize>,
    /// Index page size override.
    pub page_size: Option<usize>,
    /// fsync policy override.
    pub synchronous: Option<Synchronous>,
}

impl Profile {
    /// Applies the overrides on top of `base`.
    pub fn apply(&self, mut base: DatabaseOptions) -> DatabaseOptions {
        if let Some(bytes) = self.buffer_size {
            base.buffer_size = bytes;
        }
        if let Some(bytes) = self.page_size {
            base.page_size = bytes;
        }
        if let Some(mode) = self.synchronous {
            base.synchronous = mode;
        }
        base
    }
}

/// CLI configuration loaded from TOML.
#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: RawConfig,
    profiles: BTreeMap<String, Profile>,
}

impl CliConfig {
    /// Loads `explicit`, or the default location when `None`. A missing
    /// file yields an empty configuration.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(p) if p.exists() => read_file(p)?,
            _ => RawConfig::default(),
        };
        let profiles = parse_profiles(&data)?;
        Ok(Self {
            path,
            data,
            profiles,
        })
    }

    /// Where the configuration was (or would be) read from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `[database] default`.
    pub fn default_db_path(&self) -> Option<&PathBuf> {
        self.data.database.default_path.as_ref()
    }

    /// `default_profile`, if it names an existing profile.
    pub fn default_profile_name(&self) -> Option<&str> {
        self.data
            .default_profile
            .as_deref()
            .filter(|name| self.profiles.contains_key(*name))
    }

    /// Profile `name`.
    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Every profile, by name.
    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    /// Picks `requested` or the default profile.
    pub fn select_profile(&self, requested: Option<&str>) -> Result<Option<&Profile>, ConfigError> {
        match requested {
            Some(name) => self
                .profile(name)
                .map(Some)
                .ok_or_else(|| ConfigError::ProfileNotFound {
                    name: name.to_string(),
                }),
            None => Ok(self.default_profile_name().and_then(|n| self.profile(n))),
        }
    }

    /// Database options after applying the selected profile.
    pub fn database_options(&self, requested: Option<&str>) -> Result<DatabaseOptions, ConfigError> {
        let base = DatabaseOptions::default();
        Ok(match self.select_profile(requested)? {
            Some(profile) => profile.apply(base),
            None => base,
        })
    }

    /// Database directory from the selected profile or `[database]`.
    pub fn database_dir(&self, requested: Option<&str>) -> Result<Option<PathBuf>, ConfigError> {
        let from_profile = self
            .select_profile(requested)?
            .and_then(|p| p.database.clone());
        Ok(from_profile.or_else(|| self.default_db_path().cloned()))
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_profiles(data: &RawConfig) -> Result<BTreeMap<String, Profile>, ConfigError> {
    let mut profiles = BTreeMap::new();
    for (name, raw) in &data.profiles {
        profiles.insert(name.clone(), convert_profile(name, raw)?);
    }
    if let Some(default_name) = data.default_profile.as_ref() {
        if !profiles.contains_key(default_name) {
            return Err(ConfigError::ProfileNotFound {
                name: default_name.clone(),
            });
        }
    }
    Ok(profiles)
}

fn convert_profile(name: &str, raw: &RawProfile) -> Result<Profile, ConfigError> {
    let synchronous = match raw.synchronous.as_deref() {
        Some(value) => Some(value.parse::<Synchronous>().map_err(|_| {
            ConfigError::InvalidSynchronous {
                profile: name.to_string(),
                value: value.to_string(),
            }
        })?),
        None => None,
    };
    Ok(Profile {
        name: name.to_string(),
        database: raw.database.clone(),
        buffer_size: raw.buffer_size,
        page_size: raw.page_size,
        synchronous,
    })
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    profiles: BTreeMap<String, RawProfile>,
    #[serde(default)]
    default_profile: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct DatabaseSection {
    #[serde(rename = "default")]
    default_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawProfile {
    database: Option<PathBuf>,
    buffer_size: Option<usize>,
    page_size: Option<usize>,
    synchronous: Option<String>,
}

/// Failures while loading the CLI configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// A profile was requested or defaulted that does not exist.
    #[error("profile '{name}' not found")]
    ProfileNotFound {
        /// Requested profile.
        name: String,
    },
    /// A profile's `synchronous` is neither `full` nor `off`.
    #[error("profile '{profile}' synchronous value '{value}' is invalid")]
    InvalidSynchronous {
        /// Offending profile.
        profile: String,
        /// Value found in the file.
        value: String,
    },
}

/// `<config dir>/burrow/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("burrow").join("config.toml"))
}
