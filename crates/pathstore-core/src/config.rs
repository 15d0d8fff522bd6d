//! pathstore.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::path::WritePolicy;
use crate::table::TableSpec;

/// Slot name of the single cache record when none is configured.
pub const DEFAULT_CACHE_KEY: &str = "pathstore-cache";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub write: WriteConfig,
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Hydrate every table from the cache and persist every table on write.
    #[serde(default)]
    pub enabled: bool,
    /// redb file. In-memory when absent.
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub layout: CacheLayout,
    pub key: Option<String>,
    /// Expected record token. A stored record with another token is reset.
    pub token: Option<String>,
}

impl CacheConfig {
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or(DEFAULT_CACHE_KEY)
    }
}

/// How table snapshots are laid out in the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLayout {
    /// One `{ token, value, last_updated }` record holding every table.
    #[default]
    SingleRecord,
    /// One blob per table, under a slot named after the table.
    PerTable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteConfig {
    #[serde(default)]
    pub policy: WritePolicy,
}

impl StoreConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: StoreConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
