//! pathstore — path-addressed JSON tables with change subscriptions.
//!
//! State is split into named tables, each holding one JSON document. Values
//! are addressed with dotted paths whose first segment names the table
//! (`"users.profile.name"`). Writes notify subscribers registered at exact
//! paths, under a path (`"users.*"`), or globally (`""`), and tables can opt
//! into a persistent redb-backed cache that hydrates them on the next start.
//!
//! ```no_run
//! use pathstore::{Db, TableDef};
//! use serde_json::json;
//!
//! let db = Db::new();
//! db.init(vec![TableDef::new("counter", json!({ "n": 0 }))], false);
//! db.add_subscriber("counter.n", |n| println!("n = {n}"));
//! db.write_update("counter.n", |n| json!(n.as_i64().unwrap_or(0) + 1));
//! assert_eq!(db.get("counter.n").value(), Some(json!(1)));
//! ```

pub mod db;
pub mod error;
pub mod registry;
pub mod request;
pub mod subscription;

pub use db::{Db, DbBuilder, SharedBackend};
pub use error::{DbError, DbResult};
pub use registry::{Mutation, MutationHook, StoreRegistry};
pub use request::{ReadRequest, WriteRequest};
pub use subscription::{SubscriptionId, SubscriptionKey, SubscriptionRegistry};

pub use pathstore_cache::{CacheAdapter, CacheError, KvBackend, RedbBackend, TableCache};
pub use pathstore_core::{
    CacheConfig, CacheLayout, Path, PathError, StoreConfig, TableDef, TableSpec, WritePolicy,
};
