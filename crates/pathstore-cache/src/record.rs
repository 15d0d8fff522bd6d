//! Table snapshots in the cache.
//!
//! [`TableCache`] maps table names onto cache slots using one of two
//! layouts:
//!
//! - `SingleRecord`: every table lives inside one
//!   `{ "token", "value": { table: state }, "lastUpdated" }` document.
//!   A token mismatch on open resets the record.
//! - `PerTable`: each table's state is its own document, under a slot named
//!   after the table.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use pathstore_core::{random_string, CacheLayout};

use crate::adapter::CacheAdapter;
use crate::backend::{KvBackend, RedbBackend};

/// The single-record cache document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub token: String,
    #[serde(default)]
    pub value: Map<String, Value>,
    /// Unix timestamp (milliseconds) of the last store.
    pub last_updated: u64,
}

impl CacheRecord {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            value: Map::new(),
            last_updated: now_millis(),
        }
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct TableCache<B = RedbBackend> {
    adapter: CacheAdapter<B>,
    layout: CacheLayout,
    /// Slot of the single record.
    key: String,
    token: String,
}

impl<B: KvBackend> TableCache<B> {
    /// Open the cache, validating (or creating) the single record.
    ///
    /// With `token` set, a stored record carrying a different token is
    /// discarded. Without it, the stored token is adopted, or a random one
    /// generated for a fresh record.
    pub fn open(
        adapter: CacheAdapter<B>,
        layout: CacheLayout,
        key: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        let mut cache = Self {
            adapter,
            layout,
            key: key.into(),
            token: token.clone().unwrap_or_default(),
        };
        if layout == CacheLayout::PerTable {
            if cache.token.is_empty() {
                cache.token = random_string();
            }
            return cache;
        }

        match (cache.read_record(), token) {
            (Some(record), Some(expected)) if record.token != expected => {
                warn!(key = %cache.key, "cache token mismatch, resetting");
                cache.reset();
            }
            (Some(record), _) => {
                cache.token = record.token;
                debug!(key = %cache.key, tables = record.value.len(), "cache record loaded");
            }
            (None, Some(_)) => cache.reset(),
            (None, None) => {
                cache.token = random_string();
                cache.reset();
            }
        }
        cache
    }

    pub fn layout(&self) -> CacheLayout {
        self.layout
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn adapter(&self) -> &CacheAdapter<B> {
        &self.adapter
    }

    /// The single record, if this cache uses that layout and it parses.
    pub fn record(&self) -> Option<CacheRecord> {
        match self.layout {
            CacheLayout::SingleRecord => self.read_record(),
            CacheLayout::PerTable => None,
        }
    }

    /// Cached snapshot of one table.
    pub fn load_table(&self, name: &str) -> Option<Value> {
        match self.layout {
            CacheLayout::SingleRecord => self.adapter.load(&self.key, Some(&format!("value.{name}"))),
            CacheLayout::PerTable => self.adapter.load(name, None),
        }
    }

    /// Every cached table snapshot, or `None` if nothing is cached yet.
    pub fn load_all(&self) -> Option<Map<String, Value>> {
        let tables = match self.layout {
            CacheLayout::SingleRecord => self.read_record()?.value,
            CacheLayout::PerTable => self
                .adapter
                .slots()
                .into_iter()
                .filter_map(|slot| {
                    let state = self.adapter.load(&slot, None)?;
                    Some((slot, state))
                })
                .collect(),
        };
        (!tables.is_empty()).then_some(tables)
    }

    /// Persist one table's state.
    pub fn store_table(&self, name: &str, state: &Value) -> bool {
        match self.layout {
            CacheLayout::SingleRecord => self.update_record(|record| {
                record.value.insert(name.to_string(), state.clone());
            }),
            CacheLayout::PerTable => self.adapter.store(state.clone(), name, None),
        }
    }

    /// Drop one table's snapshot.
    pub fn remove_table(&self, name: &str) -> bool {
        match self.layout {
            CacheLayout::SingleRecord => self.update_record(|record| {
                record.value.remove(name);
            }),
            CacheLayout::PerTable => self.adapter.remove(name),
        }
    }

    /// Discard every cached table.
    pub fn reset(&self) {
        match self.layout {
            CacheLayout::SingleRecord => {
                let record = CacheRecord::new(self.token.clone());
                self.write_record(&record);
                info!(key = %self.key, "cache record reset");
            }
            CacheLayout::PerTable => {
                for slot in self.adapter.slots() {
                    self.adapter.remove(&slot);
                }
                info!("per-table cache reset");
            }
        }
    }

    fn read_record(&self) -> Option<CacheRecord> {
        let raw = self.adapter.load(&self.key, None)?;
        match serde_json::from_value(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key = %self.key, error = %e, "malformed cache record");
                None
            }
        }
    }

    fn write_record(&self, record: &CacheRecord) -> bool {
        match serde_json::to_value(record) {
            Ok(raw) => self.adapter.store(raw, &self.key, None),
            Err(e) => {
                warn!(key = %self.key, error = %e, "cache record serialization failed");
                false
            }
        }
    }

    fn update_record(&self, apply: impl FnOnce(&mut CacheRecord)) -> bool {
        let mut record = self
            .read_record()
            .unwrap_or_else(|| CacheRecord::new(self.token.clone()));
        apply(&mut record);
        record.last_updated = now_millis();
        self.write_record(&record)
    }
}
