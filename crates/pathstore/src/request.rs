//! Staged reads and writes.
//!
//! `Db::get` and `Db::update` return owned request values instead of mutating
//! hidden state on the handle. A request is consumed by its terminating call
//! (`value`, `write`, `discard`), so a stage can never be replayed or leak
//! into the next operation.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use pathstore_core::Path;

use crate::db::Db;

/// A value read at `get` time, waiting to be taken.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "a staged read does nothing until `value` is called"]
pub struct ReadRequest {
    key: Path,
    data: Option<Value>,
}

impl ReadRequest {
    pub(crate) fn new(key: Path, data: Option<Value>) -> Self {
        Self { key, data }
    }

    pub fn key(&self) -> &Path {
        &self.key
    }

    /// Fall back to `default` when nothing (or `null`) is stored at the key.
    pub fn or(self, default: Value) -> Self {
        let data = match self.data {
            None | Some(Value::Null) => Some(default),
            data => data,
        };
        Self { key: self.key, data }
    }

    /// Take the staged value.
    pub fn value(self) -> Option<Value> {
        self.data
    }

    /// Take the staged value deserialized as `T`. A shape mismatch is logged
    /// and yields `None`.
    pub fn value_as<T: DeserializeOwned>(self) -> Option<T> {
        let data = self.data?;
        match serde_json::from_value(data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %self.key, error = %e, "staged value has unexpected shape");
                None
            }
        }
    }
}

/// A computed value waiting to be committed at `key`.
#[must_use = "a staged write does nothing until `write` is called"]
pub struct WriteRequest {
    db: Db,
    key: Path,
    data: Value,
}

impl WriteRequest {
    pub(crate) fn new(db: Db, key: Path, data: Value) -> Self {
        Self { db, key, data }
    }

    pub fn key(&self) -> &Path {
        &self.key
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Commit: write, persist if the table is cached, notify subscribers.
    /// Returns false if the write was rejected or dropped by the write policy.
    pub fn write(self) -> bool {
        self.db.commit(&self.key, self.data, None::<fn(Value)>)
    }

    /// Commit, handing `callback` a copy of the written value before
    /// persistence and notification run.
    pub fn write_with<F>(self, callback: F) -> bool
    where
        F: FnOnce(Value),
    {
        self.db.commit(&self.key, self.data, Some(callback))
    }

    /// Drop the staged write.
    pub fn discard(self) {
        debug!(key = %self.key, "staged write discarded");
    }
}
