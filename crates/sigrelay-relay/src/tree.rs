//! Folds a drained batch of flat dotted-path entries into one `set` payload.
//!
//! Every name splits on its first `.` into `schema` and a relative path.
//!
//! - One entry: flat `(schema, path, data)` triple, `data` is the scalar.
//! - Several entries: `path` omitted, `data` is a nested object with one
//!   level per intermediate segment and the value at the last segment.
//!
//! `metadata` holds one timestamp record per leaf, keyed by the relative
//! path (`"b.c"`), in both forms.
//!
//! Pure and deterministic: no I/O, no shared state.

use serde_json::{Map, Value};
use sigrelay_core::{TreeError, WireTimestamp};
use sigrelay_settings::SchemaPolicy;
use tracing::warn;

use crate::buffer::{BatchEntry, RelayBatch};
use crate::protocol::{RelayPayload, SET_MESSAGE_TYPE};

/// Build the payload for `batch` addressed to `instance`.
pub fn build_payload(
    batch: &RelayBatch,
    instance: &str,
    policy: SchemaPolicy,
) -> Result<RelayPayload, TreeError> {
    let entries = batch.entries();
    let schema = split_schema(&entries[0].name).0;

    let mut kept: Vec<(&BatchEntry, &str)> = Vec::with_capacity(entries.len());
    for entry in entries {
        let (entry_schema, rest) = split_schema(&entry.name);
        if entry_schema != schema {
            match policy {
                SchemaPolicy::Reject => {
                    return Err(TreeError::SchemaMismatch {
                        expected: schema.to_string(),
                        found: entry_schema.to_string(),
                        name: entry.name.clone(),
                    });
                }
                SchemaPolicy::FirstWins => {
                    warn!(name = %entry.name, schema, "dropping entry outside batch schema");
                    continue;
                }
            }
        }
        let rest = rest
            .filter(|r| !r.is_empty())
            .ok_or_else(|| TreeError::MissingLeaf {
                name: entry.name.clone(),
            })?;
        kept.push((entry, rest));
    }

    let mut metadata = Map::with_capacity(kept.len());
    let (path, data) = if let [(entry, rest)] = kept.as_slice() {
        let _ = metadata.insert(
            (*rest).to_string(),
            WireTimestamp::from_millis(entry.timestamp_ms).to_metadata(),
        );
        (Some((*rest).to_string()), entry.value.to_json())
    } else {
        let mut tree = Map::new();
        for (entry, rest) in &kept {
            insert_leaf(&mut tree, rest, entry.value.to_json())?;
            let _ = metadata.insert(
                (*rest).to_string(),
                WireTimestamp::from_millis(entry.timestamp_ms).to_metadata(),
            );
        }
        (None, Value::Object(tree))
    };

    Ok(RelayPayload {
        kind: SET_MESSAGE_TYPE.to_string(),
        instance: instance.to_string(),
        schema: schema.to_string(),
        path,
        data,
        metadata,
    })
}

/// Split `name` at its first `.` into `(schema, remainder)`.
pub fn split_schema(name: &str) -> (&str, Option<&str>) {
    match name.split_once('.') {
        Some((schema, rest)) => (schema, Some(rest)),
        None => (name, None),
    }
}

fn insert_leaf(tree: &mut Map<String, Value>, relative: &str, value: Value) -> Result<(), TreeError> {
    let conflict = || TreeError::PathConflict {
        path: relative.to_string(),
    };

    let segments: Vec<&str> = relative.split('.').collect();
    let Some((leaf, branches)) = segments.split_last() else {
        return Err(conflict());
    };

    let mut node = tree;
    for segment in branches {
        let child = node
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        node = match child {
            Value::Object(map) => map,
            _ => return Err(conflict()),
        };
    }

    if node.contains_key(*leaf) {
        return Err(conflict());
    }
    let _ = node.insert((*leaf).to_string(), value);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
