//! pathstore-cache — persistent table cache for pathstore.
//!
//! Backed by [redb](https://docs.rs/redb). Each cache slot holds one JSON
//! document; [`CacheAdapter`] reads and writes whole documents or dotted
//! sub-keys within them, and [`TableCache`] lays table snapshots out either
//! in one token-stamped record or one slot per table.
//!
//! Backend errors are typed ([`CacheError`]) but stop at the adapter, which
//! logs them and degrades to `None`/`false`.

pub mod adapter;
pub mod backend;
pub mod error;
pub mod record;
pub mod tables;

pub use adapter::CacheAdapter;
pub use backend::{KvBackend, RedbBackend};
pub use error::{CacheError, CacheResult};
pub use record::{CacheRecord, TableCache};
