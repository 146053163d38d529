//! Path-addressable wrapper over JSON trees.
//!
//! Every API response and cache entry is carried as a [`PathValue`] so nested
//! fields can be addressed uniformly with dotted paths such as
//! `"snippet.title"` or `"items.0.id"`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Write-time failure when a path cannot be materialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
  #[error("invalid path '{path}': segment '{segment}' {reason}")]
  InvalidPath {
    path: String,
    segment: String,
    reason: &'static str,
  },
}

impl PathError {
  fn invalid(path: &str, segment: &str, reason: &'static str) -> Self {
    Self::InvalidPath {
      path: path.to_string(),
      segment: segment.to_string(),
      reason,
    }
  }
}

/// A tree of maps, lists and scalars addressable by dotted paths.
///
/// Serializes as the plain wrapped tree; the wrapper never shows up on the
/// wire or on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathValue(Value);

impl Default for PathValue {
  fn default() -> Self {
    Self(Value::Object(Map::new()))
  }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
  path.split('.').filter(move |_| !path.is_empty())
}

impl PathValue {
  pub fn new(value: Value) -> Self {
    Self(value)
  }

  /// Look up the value at `path`. Missing segments yield `None`; an empty
  /// path addresses the root.
  pub fn get(&self, path: &str) -> Option<&Value> {
    let mut current = &self.0;
    for segment in segments(path) {
      current = match current {
        Value::Object(map) => map.get(segment)?,
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
        _ => return None,
      };
    }
    Some(current)
  }

  /// Convenience accessor for string leaves.
  pub fn str_at(&self, path: &str) -> Option<&str> {
    self.get(path).and_then(Value::as_str)
  }

  pub fn contains(&self, path: &str) -> bool {
    self.get(path).is_some()
  }

  /// Store `value` at `path`, creating intermediate maps for missing keys.
  ///
  /// List segments must be numeric and either address an existing element
  /// or, for the final segment only, the position one past the end.
  pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<(), PathError> {
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = parts.split_last() else {
      self.0 = value.into();
      return Ok(());
    };

    let mut current = &mut self.0;
    for segment in parents {
      current = match current {
        Value::Object(map) => map
          .entry((*segment).to_string())
          .or_insert_with(|| Value::Object(Map::new())),
        Value::Array(items) => {
          let index = list_index(path, segment)?;
          items
            .get_mut(index)
            .ok_or_else(|| PathError::invalid(path, segment, "is out of range"))?
        }
        _ => return Err(PathError::invalid(path, segment, "descends into a scalar")),
      };
    }

    match current {
      Value::Object(map) => {
        map.insert((*last).to_string(), value.into());
        Ok(())
      }
      Value::Array(items) => {
        let index = list_index(path, last)?;
        if index < items.len() {
          items[index] = value.into();
        } else if index == items.len() {
          items.push(value.into());
        } else {
          return Err(PathError::invalid(path, last, "is out of range"));
        }
        Ok(())
      }
      _ => Err(PathError::invalid(path, last, "descends into a scalar")),
    }
  }

  /// Borrow the plain tree.
  pub fn as_value(&self) -> &Value {
    &self.0
  }

  /// Unwrap back into the plain tree.
  pub fn into_value(self) -> Value {
    self.0
  }

  pub fn as_array(&self) -> Option<&Vec<Value>> {
    self.0.as_array()
  }

  /// Key-sorted, whitespace-free JSON rendering. Two values with the same
  /// contents always render identically.
  pub fn canonical_json(&self) -> String {
    canonical_json(&self.0)
  }
}

/// Key-sorted, whitespace-free JSON rendering of any tree.
pub fn canonical_json(value: &Value) -> String {
  let mut out = String::new();
  write_canonical(value, &mut out);
  out
}

fn list_index(path: &str, segment: &str) -> Result<usize, PathError> {
  segment
    .parse::<usize>()
    .map_err(|_| PathError::invalid(path, segment, "is not a list index"))
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      out.push('{');
      for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&map[key.as_str()], out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}

impl Hash for PathValue {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.canonical_json().hash(state);
  }
}

impl From<Value> for PathValue {
  fn from(value: Value) -> Self {
    Self(value)
  }
}

impl From<PathValue> for Value {
  fn from(value: PathValue) -> Self {
    value.0
  }
}

impl From<Vec<PathValue>> for PathValue {
  fn from(items: Vec<PathValue>) -> Self {
    Self(Value::Array(items.into_iter().map(Value::from).collect()))
  }
}

impl fmt::Display for PathValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match serde_json::to_string_pretty(self.as_value()) {
      Ok(text) => f.write_str(&text),
      Err(_) => Err(fmt::Error),
    }
  }
}
