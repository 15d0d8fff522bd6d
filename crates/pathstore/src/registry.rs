//! Store registry — owns the live state of every registered table.
//!
//! Each table gets one store holding its JSON state plus its getters and
//! actions. The merged view across all stores is the core state: a JSON
//! object keyed by table name.
//!
//! Every mutation produces a [`Mutation`]. The public mutating methods emit it
//! to the registered hooks once the registry lock is released, so hooks are
//! free to read (or write) the registry again. The `apply_*` variants return
//! the mutation un-emitted for callers that need to run something in between.
//!
//! Mutations are serialized by a writer gate, separate from the state lock.
//! Caller-supplied mappers and actions run inside the gate but never under
//! the state lock: they may read the registry, and a panic in one leaves the
//! registry usable.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};

use serde_json::{Map, Value};
use tracing::{debug, info};

use pathstore_core::path::{self, Path, WritePolicy};
use pathstore_core::{Action, Getter, TableDef};

use crate::error::{DbError, DbResult};

/// A change to one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub table: String,
    /// Absolute path of the write (first segment is the table).
    pub path: Path,
    /// The value written (the patch, for merges).
    pub value: Value,
}

/// Observer invoked after every mutation.
pub type MutationHook = Arc<dyn Fn(&Mutation) + Send + Sync>;

struct Store {
    state: Value,
    getters: BTreeMap<String, Getter>,
    actions: BTreeMap<String, Action>,
    use_cache: bool,
}

/// Registry of table stores.
pub struct StoreRegistry {
    stores: RwLock<BTreeMap<String, Store>>,
    hooks: RwLock<Vec<MutationHook>>,
    writer: Mutex<()>,
    /// Thread currently inside the writer gate.
    writer_thread: Mutex<Option<ThreadId>>,
    policy: WritePolicy,
}

/// Held while a mutation runs. Dropping it (also on unwind) reopens the gate.
struct WriterGuard<'a> {
    _gate: MutexGuard<'a, ()>,
    thread: &'a Mutex<Option<ThreadId>>,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl StoreRegistry {
    pub fn new(policy: WritePolicy) -> Self {
        Self {
            stores: RwLock::new(BTreeMap::new()),
            hooks: RwLock::new(Vec::new()),
            writer: Mutex::new(()),
            writer_thread: Mutex::new(None),
            policy,
        }
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    /// Create (or redefine) the store for `table`. Returns true if a store
    /// with that name was replaced.
    pub fn register(&self, table: TableDef) -> DbResult<bool> {
        validate_name(&table.name)?;
        let name = table.name;
        let store = Store {
            state: table.state,
            getters: table.getters,
            actions: table.actions,
            use_cache: table.use_cache,
        };
        let replaced = self
            .stores
            .write()
            .expect("stores lock")
            .insert(name.clone(), store)
            .is_some();
        info!(table = %name, replaced, "table registered");
        Ok(replaced)
    }

    /// Remove a table's store. Returns false if it was never registered.
    pub fn drop(&self, name: &str) -> bool {
        let existed = self.stores.write().expect("stores lock").remove(name).is_some();
        if existed {
            info!(table = %name, "table dropped");
        }
        existed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stores.read().expect("stores lock").contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.stores.read().expect("stores lock").is_empty()
    }

    /// Registered table names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.stores.read().expect("stores lock").keys().cloned().collect()
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.stores
            .read()
            .expect("stores lock")
            .get(name)
            .is_some_and(|store| store.use_cache)
    }

    pub fn set_cached(&self, name: &str, use_cache: bool) {
        if let Some(store) = self.stores.write().expect("stores lock").get_mut(name) {
            store.use_cache = use_cache;
        }
    }

    /// Copy of one table's state.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.stores
            .read()
            .expect("stores lock")
            .get(name)
            .map(|store| store.state.clone())
    }

    /// The merged core state: `{ table: state, .. }`.
    pub fn snapshot(&self) -> Value {
        let stores = self.stores.read().expect("stores lock");
        let merged: Map<String, Value> = stores
            .iter()
            .map(|(name, store)| (name.clone(), store.state.clone()))
            .collect();
        Value::Object(merged)
    }

    /// Read `path` against the core state. The root path yields the snapshot.
    pub fn read(&self, path: &Path) -> Option<Value> {
        let Some(table) = path.first() else {
            return Some(self.snapshot());
        };
        let stores = self.stores.read().expect("stores lock");
        let store = stores.get(table)?;
        path::read(&store.state, &path.tail()).cloned()
    }

    /// Whether `path` resolves to a value, without copying it.
    pub fn contains_path(&self, path: &Path) -> bool {
        let Some(table) = path.first() else {
            return true;
        };
        let stores = self.stores.read().expect("stores lock");
        stores
            .get(table)
            .is_some_and(|store| path::read(&store.state, &path.tail()).is_some())
    }

    pub fn on_mutation<F>(&self, hook: F)
    where
        F: Fn(&Mutation) + Send + Sync + 'static,
    {
        self.hooks.write().expect("hooks lock").push(Arc::new(hook));
    }

    /// Run every hook for `mutation`.
    pub fn emit(&self, mutation: &Mutation) {
        let hooks: Vec<MutationHook> = self.hooks.read().expect("hooks lock").clone();
        for hook in hooks {
            hook(mutation);
        }
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Write `value` at `path` and emit. Returns false if the write policy
    /// dropped it.
    pub fn write(&self, path: &Path, value: Value) -> DbResult<bool> {
        let mutation = self.apply_write(path, value)?;
        Ok(self.emit_some(mutation))
    }

    /// Write without emitting.
    pub fn apply_write(&self, path: &Path, value: Value) -> DbResult<Option<Mutation>> {
        let _writer = self.enter_writer();
        let table = path.first().ok_or(DbError::EmptyPath)?;
        let mut stores = self.stores.write().expect("stores lock");
        let store = stores
            .get_mut(table)
            .ok_or_else(|| DbError::UnknownTable(table.to_string()))?;
        let written = path::write(&mut store.state, &path.tail(), value.clone(), self.policy)?;
        debug!(%path, written, "store write");
        Ok(written.then(|| Mutation {
            table: table.to_string(),
            path: path.clone(),
            value,
        }))
    }

    /// Read-modify-write at `path` and emit.
    ///
    /// No other thread's write interleaves between the read and the write.
    /// `mapper` runs without the state lock, so it may read the registry; a
    /// write it makes itself lands before the outer one. A missing value is
    /// passed as `null`.
    pub fn update<F>(&self, path: &Path, mapper: F) -> DbResult<Option<Value>>
    where
        F: FnOnce(Value) -> Value,
    {
        let mutation = self.apply_update(path, mapper)?;
        let written = mutation.as_ref().map(|m| m.value.clone());
        self.emit_some(mutation);
        Ok(written)
    }

    /// Read-modify-write without emitting.
    pub fn apply_update<F>(&self, path: &Path, mapper: F) -> DbResult<Option<Mutation>>
    where
        F: FnOnce(Value) -> Value,
    {
        let _writer = self.enter_writer();
        let table = path.first().ok_or(DbError::EmptyPath)?;
        let tail = path.tail();
        let current = {
            let stores = self.stores.read().expect("stores lock");
            let store = stores
                .get(table)
                .ok_or_else(|| DbError::UnknownTable(table.to_string()))?;
            path::read(&store.state, &tail).cloned().unwrap_or(Value::Null)
        };
        let value = mapper(current);
        let mut stores = self.stores.write().expect("stores lock");
        let store = stores
            .get_mut(table)
            .ok_or_else(|| DbError::UnknownTable(table.to_string()))?;
        let written = path::write(&mut store.state, &tail, value.clone(), self.policy)?;
        debug!(%path, written, "store update");
        Ok(written.then(|| Mutation {
            table: table.to_string(),
            path: path.clone(),
            value,
        }))
    }

    /// Deep-merge `patch` into a table's state and emit.
    ///
    /// Objects merge key by key; anything else replaces the target.
    pub fn patch(&self, name: &str, patch: Value) -> DbResult<()> {
        {
            let _writer = self.enter_writer();
            let mut stores = self.stores.write().expect("stores lock");
            let store = stores
                .get_mut(name)
                .ok_or_else(|| DbError::UnknownTable(name.to_string()))?;
            merge(&mut store.state, patch.clone());
        }
        debug!(table = %name, "store patched");
        self.emit(&Mutation {
            table: name.to_string(),
            path: Path::parse(name),
            value: patch,
        });
        Ok(())
    }

    /// Replace a table's whole state without emitting.
    pub fn replace_quiet(&self, name: &str, state: Value) -> DbResult<()> {
        let _writer = self.enter_writer();
        let mut stores = self.stores.write().expect("stores lock");
        let store = stores
            .get_mut(name)
            .ok_or_else(|| DbError::UnknownTable(name.to_string()))?;
        store.state = state;
        Ok(())
    }

    /// Remove the value at `path` and emit `null` for it.
    pub fn remove(&self, path: &Path) -> DbResult<Option<Value>> {
        let table = path.first().ok_or(DbError::EmptyPath)?;
        let tail = path.tail();
        if tail.is_root() {
            return Err(DbError::EmptyPath);
        }
        let removed = {
            let _writer = self.enter_writer();
            let mut stores = self.stores.write().expect("stores lock");
            let store = stores
                .get_mut(table)
                .ok_or_else(|| DbError::UnknownTable(table.to_string()))?;
            path::remove(&mut store.state, &tail)
        };
        if removed.is_some() {
            self.emit(&Mutation {
                table: table.to_string(),
                path: path.clone(),
                value: Value::Null,
            });
        }
        Ok(removed)
    }

    // ── Getters and actions ────────────────────────────────────────

    /// Evaluate a named getter against the current state.
    pub fn getter(&self, table: &str, name: &str) -> DbResult<Value> {
        let (getter, state) = {
            let stores = self.stores.read().expect("stores lock");
            let store = stores
                .get(table)
                .ok_or_else(|| DbError::UnknownTable(table.to_string()))?;
            let getter = store.getters.get(name).cloned().ok_or_else(|| {
                DbError::UnknownGetter {
                    table: table.to_string(),
                    name: name.to_string(),
                }
            })?;
            (getter, store.state.clone())
        };
        Ok(getter(&state))
    }

    /// Run a named action on a copy of a table's state, store the result and
    /// emit it. Like an update mapper, the action runs inside the writer gate
    /// but without the state lock.
    pub fn dispatch(&self, table: &str, name: &str, payload: Value) -> DbResult<Value> {
        let state = {
            let _writer = self.enter_writer();
            let (action, mut state) = {
                let stores = self.stores.read().expect("stores lock");
                let store = stores
                    .get(table)
                    .ok_or_else(|| DbError::UnknownTable(table.to_string()))?;
                let action = store.actions.get(name).cloned().ok_or_else(|| {
                    DbError::UnknownAction {
                        table: table.to_string(),
                        name: name.to_string(),
                    }
                })?;
                (action, store.state.clone())
            };
            action(&mut state, payload);
            self.replace_quiet(table, state.clone())?;
            state
        };
        debug!(%table, action = %name, "action dispatched");
        self.emit(&Mutation {
            table: table.to_string(),
            path: Path::parse(table),
            value: state.clone(),
        });
        Ok(state)
    }

    /// Enter the writer gate. A thread already inside it (a mapper or action
    /// writing back into the registry) passes straight through.
    fn enter_writer(&self) -> Option<WriterGuard<'_>> {
        let current = thread::current().id();
        if *self.writer_thread.lock().expect("writer lock") == Some(current) {
            return None;
        }
        let gate = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        *self.writer_thread.lock().expect("writer lock") = Some(current);
        Some(WriterGuard {
            _gate: gate,
            thread: &self.writer_thread,
        })
    }

    fn emit_some(&self, mutation: Option<Mutation>) -> bool {
        match mutation {
            Some(mutation) => {
                self.emit(&mutation);
                true
            }
            None => false,
        }
    }
}

/// Table names are a single path segment.
fn validate_name(name: &str) -> DbResult<()> {
    if name.is_empty() || name.contains(path::SEPARATOR) {
        return Err(DbError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

/// Recursive object merge. Non-object patches replace the target.
fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Mutex;

    fn registry() -> StoreRegistry {
        let registry = StoreRegistry::new(WritePolicy::Always);
        registry
            .register(TableDef::new("users", json!({ "name": "ada", "age": 36 })))
            .unwrap();
        registry
            .register(TableDef::new("posts", json!({ "list": [] })))
            .unwrap();
        registry
    }

    fn recorded(registry: &StoreRegistry) -> Arc<Mutex<Vec<Mutation>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.on_mutation(move |m| sink.lock().unwrap().push(m.clone()));
        seen
    }

    #[test]
    fn snapshot_has_one_entry_per_table() {
        let registry = registry();
        assert_eq!(
            registry.snapshot(),
            json!({ "users": { "name": "ada", "age": 36 }, "posts": { "list": [] } })
        );
        assert_eq!(registry.names(), vec!["posts", "users"]);
    }

    #[test]
    fn register_same_name_redefines() {
        let registry = registry();
        let replaced = registry.register(TableDef::new("users", json!({}))).unwrap();
        assert!(replaced);
        assert_eq!(registry.get("users"), Some(json!({})));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.register(TableDef::empty("a.b")),
            Err(DbError::InvalidTableName(_))
        ));
        assert!(registry.register(TableDef::empty("")).is_err());
    }

    #[test]
    fn write_is_isolated_per_table() {
        let registry = registry();
        registry.write(&Path::parse("users.name"), json!("grace")).unwrap();

        assert_eq!(registry.read(&Path::parse("users.name")), Some(json!("grace")));
        assert_eq!(registry.get("posts"), Some(json!({ "list": [] })));
    }

    #[test]
    fn write_to_unknown_table_fails() {
        let registry = registry();
        let err = registry.write(&Path::parse("nope.x"), json!(1)).unwrap_err();
        assert!(matches!(err, DbError::UnknownTable(name) if name == "nope"));
        assert!(matches!(
            registry.write(&Path::root(), json!(1)),
            Err(DbError::EmptyPath)
        ));
    }

    #[test]
    fn write_at_table_path_replaces_state() {
        let registry = registry();
        registry.write(&Path::parse("users"), json!({ "fresh": true })).unwrap();
        assert_eq!(registry.get("users"), Some(json!({ "fresh": true })));
    }

    #[test]
    fn mutations_are_emitted_after_writes() {
        let registry = registry();
        let seen = recorded(&registry);

        registry.write(&Path::parse("users.age"), json!(37)).unwrap();
        registry
            .update(&Path::parse("users.age"), |age| json!(age.as_i64().unwrap() + 1))
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].table, "users");
        assert_eq!(seen[0].path, Path::parse("users.age"));
        assert_eq!(seen[1].value, json!(38));
    }

    #[test]
    fn apply_write_does_not_emit() {
        let registry = registry();
        let seen = recorded(&registry);

        let mutation = registry.apply_write(&Path::parse("users.age"), json!(1)).unwrap();
        assert!(mutation.is_some());
        assert!(seen.lock().unwrap().is_empty());

        registry.emit(&mutation.unwrap());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn hooks_may_read_the_registry() {
        let registry = Arc::new(registry());
        let seen = Arc::new(Mutex::new(None));
        let (reader, sink) = (Arc::downgrade(&registry), seen.clone());
        registry.on_mutation(move |m| {
            let registry = reader.upgrade().unwrap();
            *sink.lock().unwrap() = registry.read(&m.path);
        });

        registry.write(&Path::parse("users.name"), json!("linus")).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(json!("linus")));
    }

    #[test]
    fn update_sees_null_for_missing_value() {
        let registry = registry();
        let written = registry
            .update(&Path::parse("users.visits"), |v| {
                assert!(v.is_null());
                json!(1)
            })
            .unwrap();
        assert_eq!(written, Some(json!(1)));
    }

    #[test]
    fn skip_falsy_policy_suppresses_mutation() {
        let registry = StoreRegistry::new(WritePolicy::SkipFalsy);
        registry.register(TableDef::new("t", json!({ "n": 5 }))).unwrap();
        let seen = recorded(&registry);

        assert!(!registry.write(&Path::parse("t.n"), json!(0)).unwrap());
        assert_eq!(registry.read(&Path::parse("t.n")), Some(json!(5)));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn patch_deep_merges() {
        let registry = StoreRegistry::new(WritePolicy::Always);
        registry
            .register(TableDef::new("t", json!({ "a": { "x": 1, "y": 2 }, "list": [1, 2] })))
            .unwrap();
        registry
            .patch("t", json!({ "a": { "y": 3 }, "list": [9], "new": true }))
            .unwrap();
        assert_eq!(
            registry.get("t"),
            Some(json!({ "a": { "x": 1, "y": 3 }, "list": [9], "new": true }))
        );
    }

    #[test]
    fn remove_emits_null() {
        let registry = registry();
        let seen = recorded(&registry);

        let removed = registry.remove(&Path::parse("users.age")).unwrap();
        assert_eq!(removed, Some(json!(36)));
        assert!(!registry.contains_path(&Path::parse("users.age")));
        assert_eq!(seen.lock().unwrap()[0].value, Value::Null);

        assert_eq!(registry.remove(&Path::parse("users.age")).unwrap(), None);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn drop_removes_table() {
        let registry = registry();
        assert!(registry.drop("users"));
        assert!(!registry.drop("users"));
        assert!(!registry.contains("users"));
        assert_eq!(registry.read(&Path::parse("users.name")), None);
        assert_eq!(registry.snapshot(), json!({ "posts": { "list": [] } }));
    }

    #[test]
    fn getters_and_actions() {
        let registry = StoreRegistry::new(WritePolicy::Always);
        registry
            .register(
                TableDef::new("counter", json!({ "n": 2 }))
                    .with_getter("double", |s| json!(s["n"].as_i64().unwrap() * 2))
                    .with_action("add", |s, by| {
                        let n = s["n"].as_i64().unwrap() + by.as_i64().unwrap();
                        s["n"] = json!(n);
                    }),
            )
            .unwrap();
        let seen = recorded(&registry);

        assert_eq!(registry.getter("counter", "double").unwrap(), json!(4));
        assert_eq!(registry.dispatch("counter", "add", json!(3)).unwrap(), json!({ "n": 5 }));
        assert_eq!(registry.getter("counter", "double").unwrap(), json!(10));
        assert_eq!(seen.lock().unwrap()[0].path, Path::parse("counter"));

        assert!(matches!(
            registry.getter("counter", "nope"),
            Err(DbError::UnknownGetter { .. })
        ));
        assert!(matches!(
            registry.dispatch("counter", "nope", Value::Null),
            Err(DbError::UnknownAction { .. })
        ));
    }

    // ── User closures ──────────────────────────────────────────────

    #[test]
    fn panicking_mapper_leaves_registry_usable() {
        let registry = registry();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            registry.update(&Path::parse("users.age"), |_| panic!("mapper failed"))
        }));
        assert!(outcome.is_err());

        assert_eq!(registry.read(&Path::parse("users.age")), Some(json!(36)));
        registry.write(&Path::parse("users.age"), json!(37)).unwrap();
        assert_eq!(registry.read(&Path::parse("users.age")), Some(json!(37)));
    }

    #[test]
    fn panicking_action_leaves_registry_usable() {
        let registry = StoreRegistry::new(WritePolicy::Always);
        let table = TableDef::new("t", json!({ "n": 1 }))
            .with_action("boom", |_, _| panic!("action failed"));
        registry.register(table).unwrap();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            registry.dispatch("t", "boom", Value::Null)
        }));
        assert!(outcome.is_err());

        assert_eq!(registry.get("t"), Some(json!({ "n": 1 })));
        registry.write(&Path::parse("t.n"), json!(2)).unwrap();
        assert_eq!(registry.get("t"), Some(json!({ "n": 2 })));
    }

    #[test]
    fn mapper_may_read_and_write_the_registry() {
        let registry = StoreRegistry::new(WritePolicy::Always);
        registry
            .register(TableDef::new("counter", json!({ "n": 1, "step": 5 })))
            .unwrap();

        registry
            .update(&Path::parse("counter.n"), |n| {
                let step = registry.read(&Path::parse("counter.step")).unwrap();
                registry.write(&Path::parse("counter.touched"), json!(true)).unwrap();
                json!(n.as_i64().unwrap() + step.as_i64().unwrap())
            })
            .unwrap();

        assert_eq!(
            registry.get("counter"),
            Some(json!({ "n": 6, "step": 5, "touched": true }))
        );
    }

    #[test]
    fn concurrent_updates_do_not_interleave() {
        let registry = Arc::new(StoreRegistry::new(WritePolicy::Always));
        registry.register(TableDef::new("c", json!({ "n": 0 }))).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        registry
                            .update(&Path::parse("c.n"), |n| json!(n.as_i64().unwrap() + 1))
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(registry.read(&Path::parse("c.n")), Some(json!(200)));
    }

    #[test]
    fn cache_flag_round_trip() {
        let registry = registry();
        assert!(!registry.is_cached("users"));
        registry.set_cached("users", true);
        assert!(registry.is_cached("users"));
        assert!(!registry.is_cached("missing"));
    }
}
