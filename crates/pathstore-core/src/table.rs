//! Table definitions.
//!
//! A table is a named unit of JSON state with optional derived getters,
//! named actions and a cache policy. [`TableSpec`] is the serializable subset
//! used by the TOML config; [`TableDef`] adds the closures.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Derived value computed from a table's current state.
pub type Getter = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Named mutation applied to a table's state with a payload.
pub type Action = Arc<dyn Fn(&mut Value, Value) + Send + Sync>;

/// Serializable table description, as found under `[[tables]]` in config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default = "empty_state")]
    pub state: Value,
    #[serde(default)]
    pub use_cache: bool,
}

fn empty_state() -> Value {
    Value::Object(Map::new())
}

/// A table ready for registration.
#[derive(Clone)]
pub struct TableDef {
    pub name: String,
    /// Initial state snapshot.
    pub state: Value,
    pub getters: BTreeMap<String, Getter>,
    pub actions: BTreeMap<String, Action>,
    /// Persist this table's state to the cache on every write.
    pub use_cache: bool,
}

impl TableDef {
    pub fn new(name: impl Into<String>, state: Value) -> Self {
        Self {
            name: name.into(),
            state,
            getters: BTreeMap::new(),
            actions: BTreeMap::new(),
            use_cache: false,
        }
    }

    /// A table with an empty object as state.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, empty_state())
    }

    /// Builder method: set the cache policy.
    pub fn with_cache(self, use_cache: bool) -> Self {
        Self { use_cache, ..self }
    }

    /// Builder method: add a derived getter.
    pub fn with_getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }

    /// Builder method: add a named action.
    pub fn with_action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut Value, Value) + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }
}

impl fmt::Debug for TableDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDef")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("use_cache", &self.use_cache)
            .finish()
    }
}

impl From<TableSpec> for TableDef {
    fn from(spec: TableSpec) -> Self {
        Self::new(spec.name, spec.state).with_cache(spec.use_cache)
    }
}
