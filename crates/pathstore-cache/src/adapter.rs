//! JSON cache adapter over a [`KvBackend`].
//!
//! Each slot holds one JSON document. An optional dotted `key` addresses a
//! sub-value inside the document. Failures are logged and reported as
//! `None`/`false`; they never propagate to the caller.

use serde_json::{Map, Value};
use tracing::warn;

use pathstore_core::path::{self, Path, WritePolicy};

use crate::backend::{KvBackend, RedbBackend};
use crate::error::{CacheError, CacheResult};

pub struct CacheAdapter<B = RedbBackend> {
    backend: B,
}

impl<B: KvBackend> CacheAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Parsed document in `slot`, or the sub-value at `key` inside it.
    pub fn load(&self, slot: &str, key: Option<&str>) -> Option<Value> {
        match self.try_load(slot, key) {
            Ok(value) => value,
            Err(e) => {
                warn!(%slot, ?key, error = %e, "cache load failed");
                None
            }
        }
    }

    /// Store `value` as the whole document, or at `key` inside it.
    ///
    /// With a key and no existing document, a fresh object is built along
    /// the key's path. An existing array document is indexed directly by `key`.
    pub fn store(&self, value: Value, slot: &str, key: Option<&str>) -> bool {
        match self.try_store(value, slot, key) {
            Ok(()) => true,
            Err(e) => {
                warn!(%slot, ?key, error = %e, "cache store failed");
                false
            }
        }
    }

    /// Delete a slot. Returns true if it existed.
    pub fn remove(&self, slot: &str) -> bool {
        match self.backend.remove(slot) {
            Ok(existed) => existed,
            Err(e) => {
                warn!(%slot, error = %e, "cache remove failed");
                false
            }
        }
    }

    /// All slot names; empty on backend failure.
    pub fn slots(&self) -> Vec<String> {
        self.backend.slots().unwrap_or_else(|e| {
            warn!(error = %e, "cache slot listing failed");
            Vec::new()
        })
    }

    fn try_load(&self, slot: &str, key: Option<&str>) -> CacheResult<Option<Value>> {
        let Some(document) = self.read_document(slot)? else {
            return Ok(None);
        };
        Ok(match key {
            None => Some(document),
            Some(key) => path::read(&document, &Path::parse(key)).cloned(),
        })
    }

    fn try_store(&self, value: Value, slot: &str, key: Option<&str>) -> CacheResult<()> {
        let document = match key {
            None => value,
            Some(key) => match self.read_document(slot)? {
                None => {
                    let mut fresh = Value::Object(Map::new());
                    path::write(&mut fresh, &Path::parse(key), value, WritePolicy::Always)?;
                    fresh
                }
                Some(Value::Array(mut items)) => {
                    let index = path::array_index(key, items.len())?;
                    if index == items.len() {
                        items.push(value);
                    } else {
                        items[index] = value;
                    }
                    Value::Array(items)
                }
                Some(mut document) => {
                    path::write(&mut document, &Path::parse(key), value, WritePolicy::Always)?;
                    document
                }
            },
        };
        let bytes =
            serde_json::to_vec(&document).map_err(|e| CacheError::Serialize(e.to_string()))?;
        self.backend.put_raw(slot, &bytes)
    }

    fn read_document(&self, slot: &str) -> CacheResult<Option<Value>> {
        match self.backend.get_raw(slot)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CacheError::Deserialize(e.to_string())),
            None => Ok(None),
        }
    }
}
