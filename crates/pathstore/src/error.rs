//! Error types for the store and facade internals.
//!
//! The public `Db` API does not return these: it logs them and degrades to
//! `None`/`false`. `StoreRegistry` and `Db::from_config` surface them.

use thiserror::Error;

use pathstore_cache::CacheError;
use pathstore_core::PathError;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("invalid table name `{0}`: must be non-empty and contain no `.`")]
    InvalidTableName(String),

    #[error("path must name a table")]
    EmptyPath,

    #[error("table `{table}` has no getter `{name}`")]
    UnknownGetter { table: String, name: String },

    #[error("table `{table}` has no action `{name}`")]
    UnknownAction { table: String, name: String },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
