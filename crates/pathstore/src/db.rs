//! Db — the public read/update/write/subscribe facade.
//!
//! A `Db` is a cheap-to-clone handle over one shared context (store
//! registry, subscription registry, optional cache). Handles are either
//! unscoped (keys are absolute, first segment names the table) or bound to a
//! table, in which case keys are relative to it.
//!
//! Writes flow: store registry → mutation hook → cache (if the table is
//! cached) → subscribers. Failures are logged and reported as `false`/`None`;
//! nothing here returns an error except [`Db::from_config`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::{debug, info, warn};

use pathstore_cache::{CacheAdapter, KvBackend, RedbBackend, TableCache};
use pathstore_core::{Path, StoreConfig, TableDef, WritePolicy};

use crate::error::DbResult;
use crate::registry::{Mutation, StoreRegistry};
use crate::request::{ReadRequest, WriteRequest};
use crate::subscription::{SubscriptionId, SubscriptionKey, SubscriptionRegistry};

/// Backend type used by the facade's cache.
pub type SharedBackend = Arc<dyn KvBackend>;

struct Inner {
    registry: StoreRegistry,
    subscriptions: SubscriptionRegistry,
    cache: Option<TableCache<SharedBackend>>,
    /// Persist every table, not only the ones registered with `use_cache`.
    cache_all: AtomicBool,
}

impl Inner {
    fn after_write(&self, mutation: &Mutation) {
        self.persist(&mutation.table);
        self.subscriptions
            .notify(&mutation.path, &mutation.value, |path| self.registry.read(path));
    }

    fn persist(&self, table: &str) {
        let Some(cache) = &self.cache else {
            return;
        };
        if !(self.cache_all.load(Ordering::Relaxed) || self.registry.is_cached(table)) {
            return;
        }
        if let Some(state) = self.registry.get(table) {
            if !cache.store_table(table, &state) {
                warn!(%table, "table state not persisted");
            }
        }
    }
}

/// Builder for a [`Db`] context.
#[derive(Default)]
pub struct DbBuilder {
    policy: WritePolicy,
    cache: Option<TableCache<SharedBackend>>,
}

impl DbBuilder {
    pub fn policy(self, policy: WritePolicy) -> Self {
        Self { policy, ..self }
    }

    pub fn cache(self, cache: TableCache<SharedBackend>) -> Self {
        Self {
            cache: Some(cache),
            ..self
        }
    }

    pub fn build(self) -> Db {
        let DbBuilder { policy, cache } = self;
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let registry = StoreRegistry::new(policy);
            let hook = weak.clone();
            registry.on_mutation(move |mutation| {
                if let Some(inner) = hook.upgrade() {
                    inner.after_write(mutation);
                }
            });
            Inner {
                registry,
                subscriptions: SubscriptionRegistry::new(),
                cache,
                cache_all: AtomicBool::new(false),
            }
        });
        Db { inner, scope: None }
    }
}

/// Handle over a shared store context.
#[derive(Clone)]
pub struct Db {
    inner: Arc<Inner>,
    /// Table this handle is bound to.
    scope: Option<String>,
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

impl Db {
    /// An isolated context with no cache.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> DbBuilder {
        DbBuilder::default()
    }

    /// Build a context from `pathstore.toml` settings: open the cache (on
    /// disk when a path is configured, in memory otherwise) and register the
    /// configured tables.
    pub fn from_config(config: &StoreConfig) -> DbResult<Self> {
        let needs_cache = config.cache.enabled || config.tables.iter().any(|t| t.use_cache);
        let mut builder = Self::builder().policy(config.write.policy);
        if needs_cache {
            let backend: SharedBackend = match &config.cache.path {
                Some(path) => Arc::new(RedbBackend::open(path)?),
                None => Arc::new(RedbBackend::open_in_memory()?),
            };
            let cache = TableCache::open(
                CacheAdapter::new(backend),
                config.cache.layout,
                config.cache.key(),
                config.cache.token.clone(),
            );
            builder = builder.cache(cache);
        }
        let db = builder.build();
        let tables = config.tables.iter().cloned().map(TableDef::from).collect();
        db.init(tables, config.cache.enabled);
        Ok(db)
    }

    // ── Scoping and registration ───────────────────────────────────

    /// A handle bound to `table`. Keys passed to it are relative to the table.
    pub fn scoped(&self, table: &str) -> Db {
        Db {
            inner: self.inner.clone(),
            scope: Some(table.to_string()),
        }
    }

    /// Register `table` and return a handle bound to it.
    pub fn with_table(&self, table: TableDef) -> Db {
        let name = table.name.clone();
        self.add_table(table);
        self.scoped(&name)
    }

    /// The table this handle is bound to, if any.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Register (or redefine) a table. With `use_cache`, the table is
    /// hydrated from its cached snapshot, or its initial state seeds the
    /// cache when there is none.
    pub fn add_table(&self, table: TableDef) -> bool {
        let name = table.name.clone();
        let use_cache = table.use_cache;
        let initial = table.state.clone();
        if let Err(e) = self.inner.registry.register(table) {
            warn!(table = %name, error = %e, "table not registered");
            return false;
        }
        if !use_cache {
            return true;
        }
        let Some(cache) = &self.inner.cache else {
            warn!(table = %name, "table requests caching but no cache is configured");
            return true;
        };
        match cache.load_table(&name) {
            Some(snapshot) => {
                debug!(table = %name, "table hydrated from cache");
                if let Err(e) = self.inner.registry.replace_quiet(&name, snapshot) {
                    warn!(table = %name, error = %e, "cache hydration failed");
                }
            }
            None => {
                cache.store_table(&name, &initial);
            }
        }
        true
    }

    /// Register every table. With `use_cache`, every table is persisted on
    /// write; cached snapshots are written back into their tables (notifying
    /// subscribers), or, if the cache is empty, every table seeds it.
    pub fn init(&self, tables: Vec<TableDef>, use_cache: bool) {
        let count = tables.len();
        for table in tables {
            self.add_table(table);
        }
        info!(tables = count, use_cache, "store initialized");
        if !use_cache {
            return;
        }
        self.inner.cache_all.store(true, Ordering::Relaxed);
        let Some(cache) = &self.inner.cache else {
            warn!("cache requested but no cache is configured");
            return;
        };
        match cache.load_all() {
            Some(stored) => {
                for (name, state) in stored {
                    if !self.inner.registry.contains(&name) {
                        debug!(table = %name, "cached table is not registered, skipped");
                        continue;
                    }
                    self.write_path(&Path::parse(&name), |_| state);
                }
            }
            None => {
                for name in self.inner.registry.names() {
                    if let Some(state) = self.inner.registry.get(&name) {
                        cache.store_table(&name, &state);
                    }
                }
            }
        }
    }

    /// The core state, initializing from `tables` on first use only.
    pub fn use_stores(&self, tables: Vec<TableDef>, use_cache: bool) -> Value {
        if self.inner.registry.is_empty() && !tables.is_empty() {
            self.init(tables, use_cache);
        }
        self.inner.registry.snapshot()
    }

    /// Registered table names, sorted.
    pub fn tables(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// The underlying store registry (for mutation hooks and direct patches).
    pub fn store(&self) -> &StoreRegistry {
        &self.inner.registry
    }

    pub fn cache(&self) -> Option<&TableCache<SharedBackend>> {
        self.inner.cache.as_ref()
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// The bound table's state, or the whole core state when unscoped.
    pub fn value(&self) -> Value {
        match &self.scope {
            Some(table) => self.inner.registry.get(table).unwrap_or(Value::Null),
            None => self.inner.registry.snapshot(),
        }
    }

    /// Stage the current value at `key` for a later `value()` call.
    pub fn get(&self, key: &str) -> ReadRequest {
        let path = self.resolve(key);
        let data = self.inner.registry.read(&path);
        ReadRequest::new(path, data)
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.inner.registry.read(&self.resolve(key))
    }

    /// Whether a value exists at `key`. The empty key on an unscoped handle
    /// names no value and yields false.
    pub fn has(&self, key: &str) -> bool {
        let path = self.resolve(key);
        !path.is_root() && self.inner.registry.contains_path(&path)
    }

    /// Hand `callback` a copy of the value at `key` (the handle's whole scope
    /// when `None`).
    pub fn next<F>(&self, callback: F, key: Option<&str>) -> &Self
    where
        F: FnOnce(Value),
    {
        let value = match key {
            Some(key) => self.get_value(key).unwrap_or(Value::Null),
            None => self.value(),
        };
        callback(value);
        self
    }

    /// Evaluate a table getter.
    pub fn getter(&self, table: &str, name: &str) -> Option<Value> {
        self.inner
            .registry
            .getter(table, name)
            .map_err(|e| warn!(%table, getter = %name, error = %e, "getter failed"))
            .ok()
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Stage `mapper(current)` for `key`. Nothing changes until the returned
    /// request is written. A missing value is passed as `null`.
    pub fn update<F>(&self, key: &str, mapper: F) -> WriteRequest
    where
        F: FnOnce(Value) -> Value,
    {
        let path = self.resolve(key);
        let current = self.inner.registry.read(&path).unwrap_or(Value::Null);
        WriteRequest::new(self.clone(), path, mapper(current))
    }

    /// Read, map and write `key` in one step.
    ///
    /// No other thread's write interleaves between the read and the write.
    /// `mapper` may read this `Db`; a write it makes itself lands first and is
    /// then overwritten at `key`. A panicking mapper writes nothing.
    pub fn write_update<F>(&self, key: &str, mapper: F) -> bool
    where
        F: FnOnce(Value) -> Value,
    {
        self.write_path(&self.resolve(key), mapper)
    }

    /// Upsert. An existing table is deep-merged with `value`; an existing
    /// sub-path is overwritten. An unknown key creates the table named by its
    /// first segment (empty state) first.
    pub fn set(&self, key: &str, value: Value) -> bool {
        let path = self.resolve(key);
        let Some(table) = path.first().map(str::to_string) else {
            warn!("set requires a key naming a table");
            return false;
        };
        if !self.inner.registry.contains(&table) && !self.add_table(TableDef::empty(&table)) {
            return false;
        }
        if path.len() == 1 {
            return match self.inner.registry.patch(&table, value) {
                Ok(()) => true,
                Err(e) => {
                    warn!(%table, error = %e, "patch failed");
                    false
                }
            };
        }
        self.write_path(&path, |_| value)
    }

    /// Remove the value at `key`, notifying its subscribers with `null`.
    pub fn delete(&self, key: &str) -> Option<Value> {
        let path = self.resolve(key);
        self.inner
            .registry
            .remove(&path)
            .map_err(|e| warn!(%path, error = %e, "delete failed"))
            .ok()
            .flatten()
    }

    /// Run a table action, then persist and notify as a table-level write.
    pub fn dispatch(&self, table: &str, action: &str, payload: Value) -> Option<Value> {
        self.inner
            .registry
            .dispatch(table, action, payload)
            .map_err(|e| warn!(%table, %action, error = %e, "dispatch failed"))
            .ok()
    }

    /// Drop a table with every subscription under it. `None` drops the
    /// table this handle is bound to. No-op for unknown tables.
    ///
    /// The table's cached snapshot is left in place. A table re-created later
    /// by `set` starts empty and is only persisted if the context was
    /// initialized with `use_cache`; its own `use_cache` flag is gone.
    pub fn drop_table(&self, table: Option<&str>) -> bool {
        let Some(name) = table.or(self.scope.as_deref()) else {
            return false;
        };
        if !self.inner.registry.contains(name) {
            return false;
        }
        self.inner.subscriptions.unsubscribe_under(&Path::parse(name));
        self.inner.registry.drop(name)
    }

    // ── Subscriptions ──────────────────────────────────────────────

    /// Subscribe at `key`: exact path, `path.*` for everything under it, or
    /// `""` for every write (on a bound handle, `""` means the table itself).
    pub fn add_subscriber<F>(&self, key: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner
            .subscriptions
            .subscribe(self.subscription_key(key), callback)
    }

    /// Subscribe an async callback; it is spawned on the current tokio
    /// runtime for each notification and never awaited.
    pub fn add_async_subscriber<F, Fut>(&self, key: &str, callback: F) -> SubscriptionId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner
            .subscriptions
            .subscribe_async(self.subscription_key(key), callback)
    }

    pub fn remove_subscriber(&self, key: &str, id: SubscriptionId) -> bool {
        self.inner
            .subscriptions
            .unsubscribe(&self.subscription_key(key), id)
    }

    /// Remove every subscriber at `key`.
    pub fn unsubscribe(&self, key: &str) -> bool {
        self.inner
            .subscriptions
            .unsubscribe_all(&self.subscription_key(key))
    }

    pub fn clear_subscribers(&self) {
        self.inner.subscriptions.clear();
    }

    // ── Internals ──────────────────────────────────────────────────

    fn resolve(&self, key: &str) -> Path {
        match &self.scope {
            Some(table) => Path::parse(table).join(&Path::parse(key)),
            None => Path::parse(key),
        }
    }

    fn subscription_key(&self, key: &str) -> SubscriptionKey {
        let key = SubscriptionKey::parse(key);
        match &self.scope {
            Some(table) => key.within(&Path::parse(table)),
            None => key,
        }
    }

    fn write_path<F>(&self, path: &Path, mapper: F) -> bool
    where
        F: FnOnce(Value) -> Value,
    {
        match self.inner.registry.update(path, mapper) {
            Ok(written) => written.is_some(),
            Err(e) => {
                warn!(%path, error = %e, "write rejected");
                false
            }
        }
    }

    /// Write `data` at `path`, run `callback`, then persist and notify.
    pub(crate) fn commit<F>(&self, path: &Path, data: Value, callback: Option<F>) -> bool
    where
        F: FnOnce(Value),
    {
        match self.inner.registry.apply_write(path, data.clone()) {
            Ok(Some(mutation)) => {
                if let Some(callback) = callback {
                    callback(data);
                }
                self.inner.registry.emit(&mutation);
                true
            }
            Ok(None) => {
                debug!(%path, "write dropped by policy");
                false
            }
            Err(e) => {
                warn!(%path, error = %e, "write rejected");
                false
            }
        }
    }
}
