// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Restricted patch algebra for meta updates.
//!
//! Store `update` operations accept a list of [`PatchOp`]s whose paths are
//! confined to the `meta.*` namespace. Anything outside the algebra is
//! rejected before any change is applied.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const META_PREFIX: &str = "meta.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch path `{0}` is outside the meta namespace")]
    OutsideMeta(String),

    #[error("patch path `{0}` is malformed")]
    MalformedPath(String),

    #[error("patch field `{0}` is not an array")]
    NotAnArray(String),

    #[error("patch path `{0}` traverses a non-object")]
    NotAnObject(String),
}

/// A single patch entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Assign a scalar (or any value) at `path`.
    Set { path: String, value: Value },
    /// Drop the field at `path`.
    Unset { path: String },
    /// Append `value` to the array at `path`, skipping duplicates.
    Add { path: String, value: Value },
    /// Remove all occurrences of `value` from the array at `path`.
    Remove { path: String, value: Value },
}

impl PatchOp {
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        Self::Set {
            path: path.into(),
            value,
        }
    }

    pub fn unset(path: impl Into<String>) -> Self {
        Self::Unset { path: path.into() }
    }

    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self::Add {
            path: path.into(),
            value,
        }
    }

    pub fn remove(path: impl Into<String>, value: Value) -> Self {
        Self::Remove {
            path: path.into(),
            value,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. }
            | Self::Unset { path }
            | Self::Add { path, .. }
            | Self::Remove { path, .. } => path,
        }
    }

    /// Path segments below the mandatory `meta.` prefix.
    fn meta_segments(&self) -> Result<Vec<&str>, PatchError> {
        let path = self.path();
        let Some(rest) = path.strip_prefix(META_PREFIX) else {
            return Err(PatchError::OutsideMeta(path.to_owned()));
        };
        if rest.is_empty() {
            return Err(PatchError::MalformedPath(path.to_owned()));
        }
        let segments: Vec<&str> = rest.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PatchError::MalformedPath(path.to_owned()));
        }
        Ok(segments)
    }
}

/// Applies `ops` to a meta document, in order.
///
/// Every op is validated before the first one is applied, so a rejected
/// patch leaves the document untouched.
pub fn apply(
    meta: &mut Map<String, Value>,
    ops: &[PatchOp],
) -> Result<(), PatchError> {
    let mut parsed = Vec::with_capacity(ops.len());
    for op in ops {
        parsed.push((op, op.meta_segments()?));
    }

    for (op, segments) in parsed {
        let (leaf, parent) = descend(meta, &segments, op.path())?;
        match op {
            PatchOp::Set { value, .. } => {
                parent.insert(leaf.to_owned(), value.clone());
            }
            PatchOp::Unset { .. } => {
                parent.remove(leaf);
            }
            PatchOp::Add { value, .. } => {
                let slot = parent
                    .entry(leaf.to_owned())
                    .or_insert_with(|| Value::Array(vec![]));
                let Value::Array(items) = slot else {
                    return Err(PatchError::NotAnArray(op.path().to_owned()));
                };
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            PatchOp::Remove { value, .. } => match parent.get_mut(leaf) {
                Some(Value::Array(items)) => {
                    items.retain(|item| item != value);
                }
                Some(_) => {
                    return Err(PatchError::NotAnArray(op.path().to_owned()));
                }
                None => {}
            },
        }
    }

    Ok(())
}

/// Walks to the parent object of the last path segment, creating
/// intermediate objects as needed.
fn descend<'m, 's>(
    meta: &'m mut Map<String, Value>,
    segments: &[&'s str],
    path: &str,
) -> Result<(&'s str, &'m mut Map<String, Value>), PatchError> {
    let (leaf, intermediate) =
        segments.split_last().expect("segments are never empty");

    let mut current = meta;
    for segment in intermediate {
        let slot = current
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        match slot {
            Value::Object(map) => current = map,
            _ => return Err(PatchError::NotAnObject(path.to_owned())),
        }
    }

    Ok((leaf, current))
}
