//! redb table definitions for the pathstore cache.

use redb::TableDefinition;

/// Cache blobs keyed by slot name. Values are JSON documents.
pub const SLOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("slots");
