//! Engine configuration.
//!
//! Options can be built in code or loaded from a TOML document:
//!
//! ```toml
//! [cache]
//! enabled = true
//! shards = 16
//! capacity = 4096
//!
//! [demux]
//! max_group_rows = 65536
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of cache shards.
pub const DEFAULT_CACHE_SHARDS: usize = 16;
/// Default limit on rows buffered for a single root group.
pub const DEFAULT_MAX_GROUP_ROWS: usize = 65_536;

/// Shape cache options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheOptions {
    /// When `false`, every request compiles its own plan.
    pub enabled: bool,
    /// Number of independently locked shards.
    pub shards: usize,
    /// Total entry bound split evenly across shards; `None` never evicts.
    pub capacity: Option<usize>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            shards: DEFAULT_CACHE_SHARDS,
            capacity: None,
        }
    }
}

/// Row demultiplexing options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemuxOptions {
    /// Rows a single root group may occupy in the materializer buffer.
    pub max_group_rows: usize,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        Self {
            max_group_rows: DEFAULT_MAX_GROUP_ROWS,
        }
    }
}

/// Options for a [`crate::query::QueryEngine`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOptions {
    /// Shape cache options.
    pub cache: CacheOptions,
    /// Demultiplexing options.
    pub demux: DemuxOptions,
}

impl EngineOptions {
    /// Parses options from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let options: EngineOptions = toml::from_str(text).map_err(|source| ConfigError::Parse {
            origin: "<inline>".to_owned(),
            source,
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Reads and parses options from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let options: EngineOptions =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                origin: path.display().to_string(),
                source,
            })?;
        options.validate()?;
        Ok(options)
    }

    /// Checks option ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.shards == 0 {
            return Err(ConfigError::Invalid("cache.shards must be at least 1"));
        }
        if self.cache.capacity == Some(0) {
            return Err(ConfigError::Invalid("cache.capacity must be at least 1"));
        }
        if self.demux.max_group_rows == 0 {
            return Err(ConfigError::Invalid("demux.max_group_rows must be at least 1"));
        }
        Ok(())
    }

    /// Bounds the cache to roughly `capacity` entries.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache.capacity = Some(capacity);
        self
    }

    /// Sets the number of cache shards.
    pub fn with_cache_shards(mut self, shards: usize) -> Self {
        self.cache.shards = shards;
        self
    }

    /// Disables plan caching.
    pub fn without_cache(mut self) -> Self {
        self.cache.enabled = false;
        self
    }

    /// Sets the per-group buffer limit.
    pub fn with_max_group_rows(mut self, rows: usize) -> Self {
        self.demux.max_group_rows = rows;
        self
    }
}

/// Errors raised while loading [`EngineOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid TOML for these options.
    #[error("failed to parse {origin}: {source}")]
    Parse {
        /// File path or `<inline>`.
        origin: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
