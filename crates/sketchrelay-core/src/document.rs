//! Untyped session documents and field-level writes.
//!
//! A store holds one JSON object per key. Writes address fields by path
//! segments rather than dotted strings, so a player called `"a.b"` maps to a
//! single key instead of a nested one.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::SessionError;

/// A stored document: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Path to a (possibly nested) field inside a [`Document`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Path to a top-level field.
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self(vec![field.into()])
    }

    /// Returns this path extended by one segment.
    #[must_use]
    pub fn child(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    /// The path segments, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// A single field-level mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    /// Replace the value at the path, creating missing parent objects.
    Set(FieldPath, Value),
    /// Remove the value at the path. Missing paths are ignored.
    Delete(FieldPath),
}

impl FieldWrite {
    /// Shorthand for a top-level [`FieldWrite::Set`].
    #[must_use]
    pub fn set(field: impl Into<String>, value: Value) -> Self {
        Self::Set(FieldPath::new(field), value)
    }

    /// The path this write touches.
    #[must_use]
    pub fn path(&self) -> &FieldPath {
        match self {
            Self::Set(path, _) | Self::Delete(path) => path,
        }
    }
}

/// Looks up the value at `path`, if present.
#[must_use]
pub fn get_path<'a>(doc: &'a Document, path: &FieldPath) -> Option<&'a Value> {
    let (first, rest) = path.segments().split_first()?;
    let mut current = doc.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Applies `writes` to `doc` in order.
///
/// # Errors
///
/// Returns `SessionError::InvalidState` if a write would have to descend
/// through a non-object value, or if a path is empty. `doc` may be partially
/// modified in that case; callers apply writes to a scratch copy.
pub fn apply_writes(doc: &mut Document, writes: &[FieldWrite]) -> Result<(), SessionError> {
    for write in writes {
        match write {
            FieldWrite::Set(path, value) => set_path(doc, path, value.clone())?,
            FieldWrite::Delete(path) => delete_path(doc, path)?,
        }
    }
    Ok(())
}

fn set_path(doc: &mut Document, path: &FieldPath, value: Value) -> Result<(), SessionError> {
    let Some((last, parents)) = path.segments().split_last() else {
        return Err(SessionError::InvalidState("empty field path".to_owned()));
    };
    let mut current = doc;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry.as_object_mut().ok_or_else(|| {
            SessionError::InvalidState(format!("{path}: {segment} is not an object"))
        })?;
    }
    current.insert(last.clone(), value);
    Ok(())
}

fn delete_path(doc: &mut Document, path: &FieldPath) -> Result<(), SessionError> {
    let Some((last, parents)) = path.segments().split_last() else {
        return Err(SessionError::InvalidState("empty field path".to_owned()));
    };
    let mut current = doc;
    for segment in parents {
        match current.get_mut(segment) {
            Some(Value::Object(next)) => current = next,
            Some(_) => {
                return Err(SessionError::InvalidState(format!(
                    "{path}: {segment} is not an object"
                )));
            }
            None => return Ok(()),
        }
    }
    current.remove(last);
    Ok(())
}
