//! Path engine: dot-separated addressing into the state tree

use lexis_core::{StateError, StateMutator, StateResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::marker::PhantomData;

/// Split a path into its non-empty segments
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Canonical form of a path (`a..b.` becomes `a.b`)
pub fn normalize_path(path: &str) -> String {
    split_path(path).join(".")
}

/// Join a prefix and a sub-path; an empty sub-path yields the bare prefix
pub fn join_path(prefix: &str, sub: &str) -> String {
    let prefix = normalize_path(prefix);
    let sub = normalize_path(sub);
    match (prefix.is_empty(), sub.is_empty()) {
        (true, _) => sub,
        (_, true) => prefix,
        _ => format!("{}.{}", prefix, sub),
    }
}

/// Strict ancestors of a path, nearest first
///
/// `a.b.c` yields `["a.b", "a"]`.
pub fn ancestors(path: &str) -> Vec<String> {
    let segments = split_path(path);
    (1..segments.len())
        .rev()
        .map(|len| segments[..len].join("."))
        .collect()
}

/// Resolve a path; `None` as soon as a segment is absent or a node is not an object
pub fn get_at<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = tree;
    for segment in split_path(path) {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Write `value` at `path`, creating intermediate objects
///
/// A non-object intermediate is replaced by an empty object unless `strict`
/// is set, in which case the write fails with `PathConflict`.
pub fn set_at(tree: &mut Value, path: &str, value: Value, strict: bool) -> StateResult<()> {
    let segments = split_path(path);
    let Some((last, parents)) = segments.split_last() else {
        if !value.is_object() {
            return Err(StateError::InvalidPath(
                "root value must be an object".to_string(),
            ));
        }
        *tree = value;
        return Ok(());
    };

    let mut node = tree;
    for segment in parents {
        let map = node
            .as_object_mut()
            .ok_or_else(|| StateError::Internal("state tree root is not an object".to_string()))?;
        let child = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            if strict {
                return Err(StateError::PathConflict {
                    path: path.to_string(),
                    segment: segment.to_string(),
                });
            }
            *child = Value::Object(Map::new());
        }
        node = child;
    }

    node.as_object_mut()
        .ok_or_else(|| StateError::Internal("state tree root is not an object".to_string()))?
        .insert(last.to_string(), value);
    Ok(())
}

/// Remove the value at `path`, returning it if it existed
pub fn remove_at(tree: &mut Value, path: &str) -> Option<Value> {
    let segments = split_path(path);
    let (last, parents) = segments.split_last()?;

    let mut node = tree;
    for segment in parents {
        node = node.as_object_mut()?.get_mut(*segment)?;
    }
    node.as_object_mut()?.remove(*last)
}

/// Shallow merge of `incoming` over `existing` when both are objects
///
/// Returns the resulting value and whether a merge took place.
pub fn merge_values(existing: Option<&Value>, incoming: Value) -> (Value, bool) {
    match (existing, incoming) {
        (Some(Value::Object(current)), Value::Object(update)) => {
            let mut merged = current.clone();
            for (key, value) in update {
                merged.insert(key, value);
            }
            (Value::Object(merged), true)
        }
        (_, incoming) => (incoming, false),
    }
}

/// Builder for state paths
///
/// Renders to the same dot-separated string the runtime contract uses.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct StatePath {
    segments: Vec<String>,
}

impl StatePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(path: &str) -> Self {
        Self {
            segments: split_path(path).into_iter().map(String::from).collect(),
        }
    }

    /// Path of a module scope under the default namespace
    pub fn module(name: &str) -> Self {
        Self::root().key(lexis_core::MODULES_NAMESPACE).key(name)
    }

    pub fn key(mut self, segment: &str) -> Self {
        self.segments
            .extend(split_path(segment).into_iter().map(String::from));
        self
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn starts_with(&self, other: &StatePath) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// Bind this path to a value type
    pub fn typed<T>(self) -> TypedPath<T> {
        TypedPath {
            path: self,
            _marker: PhantomData,
        }
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl fmt::Debug for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatePath({})", self)
    }
}

impl From<&str> for StatePath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

/// A state path bound to the type stored there
pub struct TypedPath<T> {
    path: StatePath,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedPath<T> {
    pub fn new(path: impl Into<StatePath>) -> Self {
        path.into().typed()
    }

    pub fn path(&self) -> &StatePath {
        &self.path
    }
}

impl<T> Clone for TypedPath<T> {
    fn clone(&self) -> Self {
        self.path.clone().typed()
    }
}

impl<T> fmt::Debug for TypedPath<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedPath({})", self.path)
    }
}

/// Typed reads and writes over any path-addressed store
pub trait TypedStateExt: StateMutator {
    fn get_typed<T: DeserializeOwned>(&self, path: &TypedPath<T>) -> StateResult<Option<T>> {
        let key = path.path().to_string();
        match self.get(&key) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StateError::TypeMismatch {
                    path: key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn set_typed<T: Serialize>(&self, path: &TypedPath<T>, value: &T) -> StateResult<()> {
        let value = serde_json::to_value(value)?;
        self.set(&path.path().to_string(), value)
    }
}

impl<S: StateMutator + ?Sized> TypedStateExt for S {}
