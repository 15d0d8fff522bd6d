//! Error types for path traversal.

use thiserror::Error;

/// Errors raised while writing through a [`Path`](crate::Path).
///
/// Reads never fail; a missing segment is simply `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("cannot descend into {found} at segment `{segment}`")]
    NotAContainer { segment: String, found: &'static str },

    #[error("invalid array index `{0}`")]
    InvalidIndex(String),

    #[error("array index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
}
