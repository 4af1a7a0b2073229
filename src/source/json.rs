//! JSON sweep files.
//!
//! Objects are groups, arrays and scalars are leaves. `null` inside a
//! numeric array reads as NaN; booleans read as 0/1.

use ndarray::{ArrayD, IxDyn};
use serde_json::Value;

use super::{LeafData, TreeNode};
use crate::{Error, Result};

/// Borrowed view of one node in a parsed JSON document.
#[derive(Debug, Clone, Copy)]
pub struct JsonNode<'a> {
    value: &'a Value,
}

impl<'a> JsonNode<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &'a Value {
        self.value
    }
}

impl<'a> TreeNode for JsonNode<'a> {
    fn has_keys(&self) -> bool {
        self.value.is_object()
    }

    fn keys(&self) -> Vec<String> {
        match self.value {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<Self> {
        self.value.as_object()?.get(key).map(JsonNode::new)
    }

    fn leaf_value(&self) -> Result<Option<LeafData>> {
        json_to_leaf(self.value)
    }

    fn leaf_units(&self) -> Option<String> {
        match self.value {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) if items.len() == 1 => items[0].as_str().map(str::to_owned),
            _ => None,
        }
    }
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(f64::NAN),
        _ => None,
    }
}

/// Shape of a rectangular nested array, or `None` when ragged.
fn nested_shape(value: &Value) -> Option<Vec<usize>> {
    match value {
        Value::Array(items) => {
            let Some(first) = items.first() else {
                return Some(vec![0]);
            };
            let inner = nested_shape(first)?;
            for item in &items[1..] {
                if nested_shape(item)? != inner {
                    return None;
                }
            }
            let mut shape = vec![items.len()];
            shape.extend(inner);
            Some(shape)
        }
        _ => Some(Vec::new()),
    }
}

fn flatten_numbers(value: &Value, out: &mut Vec<f64>) -> Option<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_numbers(item, out)?;
            }
            Some(())
        }
        other => {
            out.push(json_number(other)?);
            Some(())
        }
    }
}

/// Convert a JSON leaf to numbers, or to text when it holds strings.
pub(crate) fn json_to_leaf(value: &Value) -> Result<Option<LeafData>> {
    match value {
        Value::Object(_) => Ok(None),
        Value::String(s) => Ok(Some(LeafData::Text(vec![s.clone()]))),
        Value::Array(items) if items.iter().any(Value::is_string) => {
            let text = items.iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            Ok(Some(LeafData::Text(text)))
        }
        _ => {
            let Some(shape) = nested_shape(value) else {
                return Err(Error::Format("ragged nested array in JSON leaf".into()));
            };
            let mut flat = Vec::new();
            if flatten_numbers(value, &mut flat).is_none() {
                return Ok(None);
            }
            let array = ArrayD::from_shape_vec(IxDyn(&shape), flat)
                .map_err(|e| Error::Format(format!("JSON leaf shape {shape:?}: {e}")))?;
            Ok(Some(LeafData::Numbers(array)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_navigation() {
        let doc = json!({"a": {"b": {"values": [1, 2], "units": "m"}}});
        let root = JsonNode::new(&doc);
        assert!(root.has_keys());
        let b = root.descend(&["a", "b"]).unwrap();
        assert_eq!(b.keys(), vec!["units".to_string(), "values".to_string()]);
        assert_eq!(b.get("units").unwrap().leaf_units().as_deref(), Some("m"));
        assert!(root.get("missing").is_none());
    }

    #[test]
    fn test_numeric_leaf_with_nulls() {
        let doc = json!([1.0, null, true]);
        match json_to_leaf(&doc).unwrap() {
            Some(LeafData::Numbers(a)) => {
                let values: Vec<f64> = a.iter().copied().collect();
                assert_eq!(a.shape(), &[3]);
                assert_eq!(values[0], 1.0);
                assert!(values[1].is_nan());
                assert_eq!(values[2], 1.0);
            }
            other => panic!("unexpected leaf {other:?}"),
        }
    }

    #[test]
    fn test_nested_leaf_shape() {
        let doc = json!([[1, 2, 3], [4, 5, 6]]);
        let Some(LeafData::Numbers(a)) = json_to_leaf(&doc).unwrap() else {
            panic!("expected numbers");
        };
        assert_eq!(a.shape(), &[2, 3]);
        assert!(json_to_leaf(&json!([[1, 2], [3]])).is_err());
    }

    #[test]
    fn test_text_leaf() {
        let doc = json!(["2024-01-01T00:00:00", "2024-01-01T01:00:00"]);
        assert!(matches!(json_to_leaf(&doc).unwrap(), Some(LeafData::Text(t)) if t.len() == 2));
    }
}
