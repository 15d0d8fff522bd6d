//! pathstore-core — shared types for the pathstore workspace.
//!
//! Dotted-path addressing over `serde_json::Value`, table definitions,
//! `pathstore.toml` parsing and cache token generation.

pub mod config;
pub mod error;
pub mod path;
pub mod table;
pub mod token;

pub use config::{CacheConfig, CacheLayout, StoreConfig, WriteConfig};
pub use error::PathError;
pub use path::{Path, WritePolicy};
pub use table::{Action, Getter, TableDef, TableSpec};
pub use token::random_string;
