//! Flattening of per-deployment billing payloads.
//!
//! The items endpoint nests costs in `type`-keyed lists, which a search index
//! cannot aggregate on. Normalization projects them into flat maps:
//!
//! - `costs.dimensions: [{type, cost}]` becomes `costs.<type> = cost`
//! - `data_transfer_and_storage: [{type, ...}]` becomes `dts.<type> = {...}`
//!
//! `type` values are expected to be unique within a list. When they are not,
//! the later entry wins. Resource-level breakdowns are passed through untouched.

use serde_json::{Map, Value};
use thiserror::Error;

const COSTS: &str = "costs";
const DIMENSIONS: &str = "dimensions";
const TRANSFER_AND_STORAGE: &str = "data_transfer_and_storage";
const DTS: &str = "dts";
const TYPE: &str = "type";
const COST: &str = "cost";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("`{field}` should be {expected}")]
    UnexpectedShape {
        field: &'static str,
        expected: &'static str,
    },

    #[error("entry {index} of `{field}` has no string `type`")]
    MissingType { field: &'static str, index: usize },
}

/// Normalize one items payload. Absent sections are left alone.
pub fn normalize(mut payload: Value) -> Result<Value, NormalizeError> {
    let root = payload
        .as_object_mut()
        .ok_or(NormalizeError::UnexpectedShape {
            field: "payload",
            expected: "an object",
        })?;

    if let Some(costs) = root.get_mut(COSTS) {
        let costs = costs.as_object_mut().ok_or(NormalizeError::UnexpectedShape {
            field: COSTS,
            expected: "an object",
        })?;
        if let Some(dimensions) = costs.remove(DIMENSIONS) {
            flatten_dimensions(dimensions, costs)?;
        }
    }

    if let Some(items) = root.remove(TRANSFER_AND_STORAGE) {
        let dts = flatten_transfer_and_storage(items)?;
        root.insert(DTS.to_string(), Value::Object(dts));
    }

    Ok(payload)
}

fn flatten_dimensions(
    dimensions: Value,
    costs: &mut Map<String, Value>,
) -> Result<(), NormalizeError> {
    let Value::Array(dimensions) = dimensions else {
        return Err(NormalizeError::UnexpectedShape {
            field: DIMENSIONS,
            expected: "a list",
        });
    };

    for (index, dimension) in dimensions.into_iter().enumerate() {
        let Value::Object(mut dimension) = dimension else {
            return Err(NormalizeError::MissingType {
                field: DIMENSIONS,
                index,
            });
        };
        let kind = take_type(&mut dimension, DIMENSIONS, index)?;
        let cost = dimension.remove(COST).unwrap_or(Value::Null);
        if costs.insert(kind.clone(), cost).is_some() {
            tracing::debug!(dimension = %kind, "Duplicate cost dimension, keeping the later entry");
        }
    }
    Ok(())
}

fn flatten_transfer_and_storage(items: Value) -> Result<Map<String, Value>, NormalizeError> {
    let Value::Array(items) = items else {
        return Err(NormalizeError::UnexpectedShape {
            field: TRANSFER_AND_STORAGE,
            expected: "a list",
        });
    };

    let mut dts = Map::new();
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(mut item) = item else {
            return Err(NormalizeError::MissingType {
                field: TRANSFER_AND_STORAGE,
                index,
            });
        };
        let kind = take_type(&mut item, TRANSFER_AND_STORAGE, index)?;
        if dts.insert(kind.clone(), Value::Object(item)).is_some() {
            tracing::debug!(
                item_type = %kind,
                "Duplicate transfer/storage item, keeping the later entry"
            );
        }
    }
    Ok(dts)
}

fn take_type(
    entry: &mut Map<String, Value>,
    field: &'static str,
    index: usize,
) -> Result<String, NormalizeError> {
    match entry.remove(TYPE) {
        Some(Value::String(kind)) => Ok(kind),
        _ => Err(NormalizeError::MissingType { field, index }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flattens_cost_dimensions() {
        let payload = json!({
            "costs": {
                "total": 7,
                "dimensions": [
                    {"type": "compute", "cost": 5},
                    {"type": "storage", "cost": 2}
                ]
            },
            "data_transfer_and_storage": []
        });

        let out = normalize(payload).unwrap();
        assert_eq!(out["costs"], json!({"total": 7, "compute": 5, "storage": 2}));
        assert!(out["costs"].get("dimensions").is_none());
    }

    #[test]
    fn test_flattens_transfer_and_storage() {
        let payload = json!({
            "costs": {"total": 0, "dimensions": []},
            "data_transfer_and_storage": [
                {"type": "transfer", "bytes": 100},
                {"type": "snapshot_storage", "bytes": 5, "cost": 0.1}
            ]
        });

        let out = normalize(payload).unwrap();
        assert_eq!(
            out["dts"],
            json!({
                "transfer": {"bytes": 100},
                "snapshot_storage": {"bytes": 5, "cost": 0.1}
            })
        );
        assert!(out.get("data_transfer_and_storage").is_none());
    }

    #[test]
    fn test_preserves_unrelated_fields() {
        let payload = json!({
            "costs": {"total": 1, "dimensions": []},
            "data_transfer_and_storage": [],
            "resources": [{"id": "r1", "price": 1}]
        });

        let out = normalize(payload).unwrap();
        assert_eq!(out["resources"], json!([{"id": "r1", "price": 1}]));
        assert_eq!(out["dts"], json!({}));
    }

    #[test]
    fn test_duplicate_types_keep_last() {
        let payload = json!({
            "costs": {"dimensions": [
                {"type": "compute", "cost": 1},
                {"type": "compute", "cost": 9}
            ]},
            "data_transfer_and_storage": [
                {"type": "transfer", "bytes": 1},
                {"type": "transfer", "bytes": 2}
            ]
        });

        let out = normalize(payload).unwrap();
        assert_eq!(out["costs"]["compute"], json!(9));
        assert_eq!(out["dts"]["transfer"], json!({"bytes": 2}));
    }

    #[test]
    fn test_absent_sections_are_left_alone() {
        let payload = json!({"costs": {"total": 3}});
        let out = normalize(payload.clone()).unwrap();
        assert_eq!(out, payload);
        assert!(out.get("dts").is_none());
    }

    #[test]
    fn test_rejects_ill_typed_sections() {
        assert_eq!(
            normalize(json!({"costs": {"dimensions": {"type": "x"}}})),
            Err(NormalizeError::UnexpectedShape {
                field: "dimensions",
                expected: "a list"
            })
        );
        assert_eq!(
            normalize(json!({"data_transfer_and_storage": [{"bytes": 1}]})),
            Err(NormalizeError::MissingType {
                field: "data_transfer_and_storage",
                index: 0
            })
        );
        assert!(normalize(json!([])).is_err());
    }
}
