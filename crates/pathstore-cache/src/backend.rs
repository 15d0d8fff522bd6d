//! Persistent key-value backends for the cache.
//!
//! A backend stores opaque byte blobs under named slots. [`RedbBackend`] keeps
//! them in a single redb table and supports both on-disk and in-memory
//! databases (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::tables::SLOTS;

/// Convert any `Display` error into a `CacheError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| CacheError::$variant(e.to_string())
    };
}

/// Slot-addressed blob storage.
pub trait KvBackend: Send + Sync {
    /// Raw bytes stored under `slot`, if any.
    fn get_raw(&self, slot: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Insert or overwrite the blob under `slot`.
    fn put_raw(&self, slot: &str, bytes: &[u8]) -> CacheResult<()>;

    /// Delete a slot. Returns true if it existed.
    fn remove(&self, slot: &str) -> CacheResult<bool>;

    /// All slot names, in key order.
    fn slots(&self) -> CacheResult<Vec<String>>;
}

impl<T: KvBackend + ?Sized> KvBackend for Arc<T> {
    fn get_raw(&self, slot: &str) -> CacheResult<Option<Vec<u8>>> {
        (**self).get_raw(slot)
    }

    fn put_raw(&self, slot: &str, bytes: &[u8]) -> CacheResult<()> {
        (**self).put_raw(slot, bytes)
    }

    fn remove(&self, slot: &str) -> CacheResult<bool> {
        (**self).remove(slot)
    }

    fn slots(&self) -> CacheResult<Vec<String>> {
        (**self).slots()
    }
}

/// Thread-safe slot store backed by redb.
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open (or create) a persistent cache at the given path.
    pub fn open(path: &Path) -> CacheResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let backend = Self { db: Arc::new(db) };
        backend.ensure_tables()?;
        debug!(?path, "cache backend opened");
        Ok(backend)
    }

    /// Create an ephemeral in-memory cache.
    pub fn open_in_memory() -> CacheResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let backend = Self { db: Arc::new(db) };
        backend.ensure_tables()?;
        debug!("in-memory cache backend opened");
        Ok(backend)
    }

    fn ensure_tables(&self) -> CacheResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SLOTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl KvBackend for RedbBackend {
    fn get_raw(&self, slot: &str) -> CacheResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SLOTS).map_err(map_err!(Table))?;
        let bytes = table
            .get(slot)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec());
        Ok(bytes)
    }

    fn put_raw(&self, slot: &str, bytes: &[u8]) -> CacheResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SLOTS).map_err(map_err!(Table))?;
            table.insert(slot, bytes).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%slot, len = bytes.len(), "cache slot stored");
        Ok(())
    }

    fn remove(&self, slot: &str) -> CacheResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(SLOTS).map_err(map_err!(Table))?;
            existed = table.remove(slot).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%slot, existed, "cache slot removed");
        Ok(existed)
    }

    fn slots(&self) -> CacheResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SLOTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            results.push(key.value().to_string());
        }
        Ok(results)
    }
}
