//! Dotted path addressing for basemirror snapshots.
//!
//! A snapshot is a single `serde_json::Value` tree. Every node in it is
//! addressed by a list of string segments such as
//! `["tablesById", "tbl1", "fieldsById", "fld1", "name"]`, written in dotted
//! form as `tablesById.tbl1.fieldsById.fld1.name`.
//!
//! # Example
//!
//! ```
//! use basemirror_path::{format_path, get, parse_path, set};
//! use serde_json::json;
//!
//! let path = parse_path("tablesById.tbl1.name");
//! assert_eq!(path, vec!["tablesById", "tbl1", "name"]);
//! assert_eq!(format_path(&path), "tablesById.tbl1.name");
//!
//! let mut doc = json!({});
//! set(&mut doc, &path, json!("Tasks")).unwrap();
//! assert_eq!(get(&doc, &path), Some(&json!("Tasks")));
//! ```

use serde_json::{Map, Value};
use thiserror::Error;

/// An owned path into a snapshot.
pub type Path = Vec<String>;

/// Separator between segments in the dotted form.
pub const SEPARATOR: char = '.';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("NOT_A_CONTAINER: {path} does not resolve to an object")]
    NotContainer { path: String },
    #[error("EMPTY_SEGMENT: {path}")]
    EmptySegment { path: String },
    #[error("ROOT_REMOVE")]
    RootRemove,
    #[error("NO_PARENT")]
    NoParent,
}

/// Parse a dotted path into segments.
///
/// The empty string is the root path.
///
/// ```
/// use basemirror_path::parse_path;
///
/// assert_eq!(parse_path(""), Vec::<String>::new());
/// assert_eq!(parse_path("a.b"), vec!["a", "b"]);
/// ```
pub fn parse_path(dotted: &str) -> Path {
    if dotted.is_empty() {
        return Vec::new();
    }
    dotted.split(SEPARATOR).map(str::to_string).collect()
}

/// Parse a dotted path, rejecting empty segments (`a..b`, `.a`, `a.`).
pub fn parse_path_strict(dotted: &str) -> Result<Path, PathError> {
    let path = parse_path(dotted);
    if path.iter().any(String::is_empty) {
        return Err(PathError::EmptySegment {
            path: dotted.to_string(),
        });
    }
    Ok(path)
}

/// Format segments into the dotted form.
///
/// ```
/// use basemirror_path::format_path;
///
/// assert_eq!(format_path::<&str>(&[]), "");
/// assert_eq!(format_path(&["tablesById", "tbl1"]), "tablesById.tbl1");
/// ```
pub fn format_path<S: AsRef<str>>(path: &[S]) -> String {
    let mut out = String::new();
    for (i, segment) in path.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(segment.as_ref());
    }
    out
}

/// Build an owned path from borrowed segments.
pub fn to_path<S: AsRef<str>>(segments: &[S]) -> Path {
    segments.iter().map(|s| s.as_ref().to_string()).collect()
}

pub fn is_root<S: AsRef<str>>(path: &[S]) -> bool {
    path.is_empty()
}

/// `true` when `prefix` is a (non-strict) prefix of `path`.
pub fn starts_with<A: AsRef<str>, B: AsRef<str>>(path: &[A], prefix: &[B]) -> bool {
    prefix.len() <= path.len()
        && prefix
            .iter()
            .zip(path.iter())
            .all(|(a, b)| a.as_ref() == b.as_ref())
}

/// `true` when `child` lies strictly below `parent`.
pub fn is_child<A: AsRef<str>, B: AsRef<str>>(parent: &[A], child: &[B]) -> bool {
    parent.len() < child.len() && starts_with(child, parent)
}

pub fn parent<S: AsRef<str>>(path: &[S]) -> Result<Path, PathError> {
    if path.is_empty() {
        return Err(PathError::NoParent);
    }
    Ok(to_path(&path[..path.len() - 1]))
}

/// Read the value at `path`.
///
/// Objects are traversed by key and arrays by decimal index. Returns `None`
/// when any segment is missing or passes through a scalar.
pub fn get<'a, S: AsRef<str>>(val: &'a Value, path: &[S]) -> Option<&'a Value> {
    let mut current = val;
    for segment in path {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn get_mut<'a, S: AsRef<str>>(val: &'a mut Value, path: &[S]) -> Option<&'a mut Value> {
    let mut current = val;
    for segment in path {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(arr) => arr.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// `true` when `path` resolves to a value.
pub fn exists<S: AsRef<str>>(val: &Value, path: &[S]) -> bool {
    get(val, path).is_some()
}

/// Write `new_value` at `path`, returning the previous value.
///
/// Missing intermediate objects (and intermediate `null`s) are created.
/// Walking through any other non-object value is an error; the path is
/// checked before anything is created, so a failed write leaves the document
/// untouched. An empty path replaces the whole document.
pub fn set<S: AsRef<str>>(
    val: &mut Value,
    path: &[S],
    new_value: Value,
) -> Result<Option<Value>, PathError> {
    let Some((leaf, parents)) = path.split_last() else {
        return Ok(Some(std::mem::replace(val, new_value)));
    };
    check_writable(val, parents)?;
    let mut current = val;
    for (depth, segment) in parents.iter().enumerate() {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map
                .entry(segment.as_ref().to_string())
                .or_insert(Value::Null),
            _ => {
                return Err(PathError::NotContainer {
                    path: format_path(&parents[..depth]),
                })
            }
        };
    }
    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    match current {
        Value::Object(map) => Ok(map.insert(leaf.as_ref().to_string(), new_value)),
        _ => Err(PathError::NotContainer {
            path: format_path(parents),
        }),
    }
}

/// Remove the value at `path`, returning it.
///
/// Removing below a missing intermediate is a no-op returning `Ok(None)`;
/// removing below a scalar is an error.
pub fn remove<S: AsRef<str>>(val: &mut Value, path: &[S]) -> Result<Option<Value>, PathError> {
    let Some((leaf, parents)) = path.split_last() else {
        return Err(PathError::RootRemove);
    };
    let mut current = val;
    for (depth, segment) in parents.iter().enumerate() {
        current = match current {
            Value::Object(map) => match map.get_mut(segment.as_ref()) {
                Some(next) => next,
                None => return Ok(None),
            },
            Value::Null => return Ok(None),
            _ => {
                return Err(PathError::NotContainer {
                    path: format_path(&parents[..depth]),
                })
            }
        };
    }
    match current {
        Value::Object(map) => Ok(map.shift_remove(leaf.as_ref())),
        Value::Null => Ok(None),
        _ => Err(PathError::NotContainer {
            path: format_path(parents),
        }),
    }
}

fn check_writable<S: AsRef<str>>(val: &Value, parents: &[S]) -> Result<(), PathError> {
    let mut current = val;
    for (depth, segment) in parents.iter().enumerate() {
        match current {
            Value::Object(map) => match map.get(segment.as_ref()) {
                Some(next) => current = next,
                None => return Ok(()),
            },
            Value::Null => return Ok(()),
            _ => {
                return Err(PathError::NotContainer {
                    path: format_path(&parents[..depth]),
                })
            }
        }
    }
    match current {
        Value::Object(_) | Value::Null => Ok(()),
        _ => Err(PathError::NotContainer {
            path: format_path(parents),
        }),
    }
}
