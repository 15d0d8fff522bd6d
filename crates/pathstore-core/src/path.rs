//! Dotted-path addressing over JSON values.
//!
//! A [`Path`] is an ordered list of segments parsed from a dot-delimited
//! string (`"users.profile.name"`). The empty string is the root path and
//! addresses the container itself.
//!
//! Object segments index by key; array segments index by a decimal position.
//! Reads never fail: a missing segment yields `None`. Writes create empty
//! objects for absent (or `null`) intermediate segments and report a
//! [`PathError`] when traversal hits a scalar.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PathError;

/// Separator between path segments.
pub const SEPARATOR: char = '.';

/// Suffix that turns a path into a deep-wildcard subscription key.
pub const DEEP_WILDCARD: &str = ".*";

/// An ordered sequence of path segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// The root path (no segments).
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dot-delimited string. `""` parses to the root path.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::root();
        }
        Self {
            segments: raw.split(SEPARATOR).map(str::to_string).collect(),
        }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// First segment. For store paths this is the table name.
    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Everything after the first segment.
    pub fn tail(&self) -> Path {
        Self {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    /// Append the segments of `other`.
    pub fn join(&self, other: &Path) -> Path {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Segment-aware prefix test: `user` is a prefix of `user.name` but not
    /// of `userList`. Every path starts with the root path.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments.iter().zip(&prefix.segments).all(|(a, b)| a == b)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for Path {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for Path {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&String> for Path {
    fn from(raw: &String) -> Self {
        Self::parse(raw)
    }
}

impl From<&Path> for Path {
    fn from(path: &Path) -> Self {
        path.clone()
    }
}

/// Whether a write of a "falsy" value goes through.
///
/// JSON falsy values are `null`, `false`, `0` and `""`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Every value is written.
    #[default]
    Always,
    /// Falsy values are dropped and the container is left untouched.
    SkipFalsy,
}

impl WritePolicy {
    fn skips(self, value: &Value) -> bool {
        matches!(self, WritePolicy::SkipFalsy) && is_falsy(value)
    }
}

/// `null`, `false`, numeric zero and the empty string.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Read the value at `path`, or `None` if any segment is missing.
pub fn read<'a>(container: &'a Value, path: &Path) -> Option<&'a Value> {
    path.segments.iter().try_fold(container, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Mutable variant of [`read`].
pub fn read_mut<'a>(container: &'a mut Value, path: &Path) -> Option<&'a mut Value> {
    path.segments.iter().try_fold(container, |node, segment| match node {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => match segment.parse::<usize>() {
            Ok(index) => items.get_mut(index),
            Err(_) => None,
        },
        _ => None,
    })
}

/// Write `value` at `path`, creating intermediate objects as needed.
///
/// Returns `Ok(false)` when `policy` dropped the write. Writing at the root
/// path replaces the whole container.
pub fn write(
    container: &mut Value,
    path: &Path,
    value: Value,
    policy: WritePolicy,
) -> Result<bool, PathError> {
    if policy.skips(&value) {
        return Ok(false);
    }
    let Some((last, parents)) = path.segments.split_last() else {
        *container = value;
        return Ok(true);
    };
    let mut node = container;
    for segment in parents {
        node = descend(node, segment)?;
    }
    assign(node, last, value)?;
    Ok(true)
}

/// Remove and return the value at `path`. Removing the root takes the whole
/// container and leaves `null` behind.
pub fn remove(container: &mut Value, path: &Path) -> Option<Value> {
    let Some((last, parents)) = path.segments.split_last() else {
        return Some(container.take());
    };
    let parent = read_mut(container, &Path::from_segments(parents.iter().cloned()))?;
    match parent {
        Value::Object(map) => map.remove(last),
        Value::Array(items) => {
            let index = last.parse::<usize>().ok()?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}

fn descend<'a>(node: &'a mut Value, segment: &str) -> Result<&'a mut Value, PathError> {
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => Ok(map.entry(segment.to_string()).or_insert(Value::Null)),
        Value::Array(items) => {
            let index = array_index(segment, items.len())?;
            if index == items.len() {
                items.push(Value::Null);
            }
            Ok(&mut items[index])
        }
        other => Err(PathError::NotAContainer {
            segment: segment.to_string(),
            found: kind(other),
        }),
    }
}

fn assign(node: &mut Value, segment: &str, value: Value) -> Result<(), PathError> {
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => {
            map.insert(segment.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = array_index(segment, items.len())?;
            if index == items.len() {
                items.push(value);
            } else {
                items[index] = value;
            }
            Ok(())
        }
        other => Err(PathError::NotAContainer {
            segment: segment.to_string(),
            found: kind(other),
        }),
    }
}

/// Parse an array segment. `len` itself is accepted (append).
pub fn array_index(segment: &str, len: usize) -> Result<usize, PathError> {
    let index = segment
        .parse::<usize>()
        .map_err(|_| PathError::InvalidIndex(segment.to_string()))?;
    if index > len {
        return Err(PathError::IndexOutOfBounds { index, len });
    }
    Ok(index)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
