use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::{child_path, index_path, PRIVATE_KEY_PREFIX};

const CONFIDENCE_KEY: &str = "confidence";
const VALUE_KEY: &str = "value";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    /// The two trees differ in structure at `path` (empty path = root).
    #[error("Confidence trees differ at '{path}': {reason}")]
    ShapeMismatch { path: String, reason: String },
}

fn mismatch(path: &str, reason: impl Into<String>) -> MergeError {
    MergeError::ShapeMismatch {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// How the surviving confidences of one leaf are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreResolver {
    #[default]
    Min,
    Max,
    Average,
}

impl ScoreResolver {
    /// `scores` must not be empty.
    fn resolve(self, scores: &[f64]) -> f64 {
        match self {
            ScoreResolver::Min => scores.iter().copied().fold(f64::INFINITY, f64::min),
            ScoreResolver::Max => scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ScoreResolver::Average => scores.iter().sum::<f64>() / scores.len() as f64,
        }
    }
}

/// A merged confidence tree with its root-level aggregates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MergedConfidence {
    /// The merged tree, shaped like the first operand.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub total_evaluated_fields_count: usize,
    pub overall_confidence: f64,
    pub min_extracted_field_confidence: f64,
    /// Paths of the leaves holding the minimum confidence.
    #[serde(default)]
    pub min_extracted_field_confidence_field: Vec<String>,
    pub zero_confidence_fields: Vec<String>,
    pub zero_confidence_fields_count: usize,
}

impl MergedConfidence {
    /// Every leaf's path and merged confidence, in tree order.
    pub fn leaf_confidences(&self) -> Vec<(String, f64)> {
        let mut leaves = Vec::new();
        for (key, value) in &self.fields {
            collect_leaves(value, &child_path("", key), &mut leaves);
        }
        leaves
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(self.fields.clone()))
    }
}

/// Merges two confidence trees leaf by leaf. `a` decides the shape and the
/// values; `b` only contributes confidences.
pub fn merge(a: &Value, b: &Value, resolver: ScoreResolver) -> Result<MergedConfidence, MergeError> {
    let fields = match merge_node(a, b, "", resolver)? {
        Value::Object(map) => map,
        _ => return Err(mismatch("", "the root of a confidence tree must be a mapping")),
    };

    let mut merged = MergedConfidence {
        fields,
        ..Default::default()
    };

    let leaves = merged.leaf_confidences();
    let scored: Vec<f64> = leaves.iter().map(|(_, c)| *c).filter(|c| *c != 0.0).collect();
    if scored.is_empty() {
        return Ok(merged);
    }

    let min = scored.iter().copied().fold(f64::INFINITY, f64::min);
    merged.total_evaluated_fields_count = scored.len();
    merged.overall_confidence = round3(scored.iter().sum::<f64>() / scored.len() as f64);
    merged.min_extracted_field_confidence = min;
    merged.min_extracted_field_confidence_field = leaves
        .iter()
        .filter(|(_, c)| *c == min)
        .map(|(p, _)| p.clone())
        .collect();
    merged.zero_confidence_fields = leaves
        .iter()
        .filter(|(_, c)| *c == 0.0)
        .map(|(p, _)| p.clone())
        .collect();
    merged.zero_confidence_fields_count = merged.zero_confidence_fields.len();

    Ok(merged)
}

fn merge_node(a: &Value, b: &Value, path: &str, resolver: ScoreResolver) -> Result<Value, MergeError> {
    match a {
        Value::Object(map_a) if !map_a.contains_key(CONFIDENCE_KEY) => {
            let map_b = match b {
                Value::Object(map_b) if !map_b.contains_key(CONFIDENCE_KEY) => map_b,
                _ => return Err(mismatch(path, "expected a mapping in both trees")),
            };

            let mut merged = Map::new();
            for (key, child_a) in map_a {
                if key.starts_with(PRIVATE_KEY_PREFIX) {
                    continue;
                }
                let child = child_path(path, key);
                let child_b = map_b
                    .get(key)
                    .ok_or_else(|| mismatch(&child, "key missing from the second tree"))?;
                merged.insert(key.clone(), merge_node(child_a, child_b, &child, resolver)?);
            }
            Ok(Value::Object(merged))
        }
        Value::Array(items_a) => {
            let items_b = match b {
                Value::Array(items_b) => items_b,
                _ => return Err(mismatch(path, "expected a sequence in both trees")),
            };
            if items_a.len() != items_b.len() {
                return Err(mismatch(
                    path,
                    format!("sequence lengths differ ({} vs {})", items_a.len(), items_b.len()),
                ));
            }

            items_a
                .iter()
                .zip(items_b)
                .enumerate()
                .map(|(i, (item_a, item_b))| merge_node(item_a, item_b, &index_path(path, i), resolver))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        Value::Object(leaf_a) => {
            let leaf_b = match b {
                Value::Object(leaf_b) if leaf_b.contains_key(CONFIDENCE_KEY) => leaf_b,
                _ => return Err(mismatch(path, "expected a confidence leaf in both trees")),
            };

            let survivors: Vec<f64> = [leaf_a, leaf_b]
                .into_iter()
                .map(|leaf| leaf_score(leaf, path))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .flatten()
                .filter(|c| *c != 0.0)
                .collect();

            let confidence = if survivors.is_empty() {
                0.0
            } else {
                round3(resolver.resolve(&survivors))
            };

            let mut leaf = Map::new();
            leaf.insert(CONFIDENCE_KEY.to_string(), Value::from(confidence));
            leaf.insert(
                VALUE_KEY.to_string(),
                leaf_a.get(VALUE_KEY).cloned().unwrap_or(Value::Null),
            );
            Ok(Value::Object(leaf))
        }
        _ => Err(mismatch(path, "expected a mapping, sequence or confidence leaf")),
    }
}

/// `None` for a null confidence.
fn leaf_score(leaf: &Map<String, Value>, path: &str) -> Result<Option<f64>, MergeError> {
    match leaf.get(CONFIDENCE_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| mismatch(path, "confidence is not representable as a float")),
        Some(other) => Err(mismatch(path, format!("confidence is not numeric: {}", other))),
    }
}

fn collect_leaves(node: &Value, path: &str, out: &mut Vec<(String, f64)>) {
    match node {
        Value::Object(map) => match map.get(CONFIDENCE_KEY) {
            Some(confidence) => out.push((path.to_string(), confidence.as_f64().unwrap_or(0.0))),
            None => {
                for (key, child) in map {
                    collect_leaves(child, &child_path(path, key), out);
                }
            }
        },
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_leaves(item, &index_path(path, i), out);
            }
        }
        _ => {}
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn confidences(merged: &MergedConfidence) -> Vec<(String, f64)> {
        let mut leaves = merged.leaf_confidences();
        leaves.sort_by(|a, b| a.0.cmp(&b.0));
        leaves
    }

    #[test]
    fn test_single_field_min() {
        let a = json!({"f": {"confidence": 0.9, "value": "x"}});
        let b = json!({"f": {"confidence": 0.5, "value": "x"}});
        let merged = merge(&a, &b, ScoreResolver::Min).unwrap();

        assert_eq!(merged.fields["f"], json!({"confidence": 0.5, "value": "x"}));
        assert_eq!(merged.total_evaluated_fields_count, 1);
        assert_eq!(merged.overall_confidence, 0.5);
        assert_eq!(merged.min_extracted_field_confidence, 0.5);
        assert_eq!(merged.min_extracted_field_confidence_field, vec!["f"]);
        assert!(merged.zero_confidence_fields.is_empty());
        assert_eq!(merged.zero_confidence_fields_count, 0);
    }

    #[test]
    fn test_serialized_shape() {
        let a = json!({"f": {"confidence": 0.9, "value": "x"}});
        let b = json!({"f": {"confidence": 0.5, "value": "x"}});
        let value = merge(&a, &b, ScoreResolver::Min).unwrap().to_value();

        assert_eq!(value["f"]["confidence"], 0.5);
        assert_eq!(value["total_evaluated_fields_count"], 1);
        assert_eq!(value["overall_confidence"], 0.5);
        assert_eq!(value["zero_confidence_fields"], json!([]));

        let back: MergedConfidence = serde_json::from_value(value).unwrap();
        assert_eq!(back.fields.len(), 1);
        assert_eq!(back.total_evaluated_fields_count, 1);
    }

    #[test]
    fn test_null_and_zero_confidences_are_ignored() {
        let a = json!({
            "name": {"confidence": null, "value": "Ann"},
            "age": {"confidence": 0, "value": 41},
            "city": {"confidence": 0.7, "value": "Oslo"}
        });
        let b = json!({
            "name": {"confidence": 0.6, "value": "Anne"},
            "age": {"confidence": null, "value": 41},
            "city": {"confidence": 0, "value": "Oslo"}
        });
        let merged = merge(&a, &b, ScoreResolver::Min).unwrap();

        assert_eq!(merged.fields["name"], json!({"confidence": 0.6, "value": "Ann"}));
        assert_eq!(merged.fields["age"]["confidence"], 0.0);
        assert_eq!(merged.fields["city"]["confidence"], 0.7);
        assert_eq!(merged.total_evaluated_fields_count, 2);
        assert_eq!(merged.overall_confidence, 0.65);
        assert_eq!(merged.min_extracted_field_confidence, 0.6);
        assert_eq!(merged.zero_confidence_fields, vec!["age"]);
        assert_eq!(merged.zero_confidence_fields_count, 1);
    }

    #[test]
    fn test_nested_paths() {
        let a = json!({
            "customer": {
                "address": {"street": {"confidence": 0.8, "value": "Main"}},
                "phones": [
                    {"confidence": 0.9, "value": "1"},
                    {"confidence": 0.4, "value": "2"}
                ]
            },
            "_meta": {"ignored": true}
        });
        let b = json!({
            "customer": {
                "address": {"street": {"confidence": 0.95, "value": "Main St"}},
                "phones": [
                    {"confidence": 0.7, "value": "1"},
                    {"confidence": 0.0, "value": "2"}
                ]
            }
        });
        let merged = merge(&a, &b, ScoreResolver::Max).unwrap();

        assert!(!merged.fields.contains_key("_meta"));
        assert_eq!(
            confidences(&merged),
            vec![
                ("customer.address.street".to_string(), 0.95),
                ("customer.phones[0]".to_string(), 0.9),
                ("customer.phones[1]".to_string(), 0.4),
            ]
        );
        assert_eq!(merged.min_extracted_field_confidence_field, vec!["customer.phones[1]"]);
        assert_eq!(merged.fields["customer"]["address"]["street"]["value"], "Main");
    }

    #[test]
    fn test_average_rounds_to_three_places() {
        let a = json!({"f": {"confidence": 0.3331, "value": 1}});
        let b = json!({"f": {"confidence": 0.6662, "value": 1}});
        let merged = merge(&a, &b, ScoreResolver::Average).unwrap();
        assert_eq!(merged.fields["f"]["confidence"], 0.5);

        let a = json!({"f": {"confidence": 0.12345, "value": 1}});
        let merged = merge(&a, &a, ScoreResolver::Min).unwrap();
        assert_eq!(merged.fields["f"]["confidence"], 0.123);
    }

    #[test]
    fn test_no_qualifying_leaves_defaults_aggregates() {
        let a = json!({"f": {"confidence": 0, "value": "x"}});
        let b = json!({"f": {"confidence": null, "value": "x"}});
        let merged = merge(&a, &b, ScoreResolver::Min).unwrap();

        assert_eq!(merged.total_evaluated_fields_count, 0);
        assert_eq!(merged.overall_confidence, 0.0);
        assert_eq!(merged.min_extracted_field_confidence, 0.0);
        assert!(merged.zero_confidence_fields.is_empty());
        assert_eq!(merged.zero_confidence_fields_count, 0);
    }

    #[test]
    fn test_merge_is_commutative_for_min_and_max() {
        let a = json!({
            "a": {"confidence": 0.91, "value": "x"},
            "b": [{"confidence": 0.2, "value": 1}, {"confidence": null, "value": 2}],
            "c": {"d": {"confidence": 0, "value": true}}
        });
        let b = json!({
            "a": {"confidence": 0.55, "value": "y"},
            "b": [{"confidence": 0.8, "value": 1}, {"confidence": 0.3, "value": 2}],
            "c": {"d": {"confidence": 0.66, "value": false}}
        });

        for resolver in [ScoreResolver::Min, ScoreResolver::Max, ScoreResolver::Average] {
            let ab = merge(&a, &b, resolver).unwrap();
            let ba = merge(&b, &a, resolver).unwrap();
            assert_eq!(confidences(&ab), confidences(&ba), "{:?}", resolver);
            assert_eq!(ab.overall_confidence, ba.overall_confidence);
        }
    }

    #[test]
    fn test_missing_key_is_shape_mismatch() {
        let a = json!({"f": {"confidence": 0.9, "value": "x"}, "g": {"confidence": 0.9, "value": 1}});
        let b = json!({"f": {"confidence": 0.5, "value": "x"}});
        let err = merge(&a, &b, ScoreResolver::Min).unwrap_err();
        assert_eq!(
            err,
            MergeError::ShapeMismatch {
                path: "g".to_string(),
                reason: "key missing from the second tree".to_string()
            }
        );
    }

    #[test]
    fn test_sequence_length_mismatch() {
        let a = json!({"items": [{"confidence": 0.9, "value": 1}, {"confidence": 0.9, "value": 2}]});
        let b = json!({"items": [{"confidence": 0.9, "value": 1}]});
        let err = merge(&a, &b, ScoreResolver::Min).unwrap_err();
        assert!(matches!(err, MergeError::ShapeMismatch { ref path, .. } if path == "items"));
    }

    #[test]
    fn test_leaf_versus_mapping_mismatch() {
        let a = json!({"f": {"confidence": 0.9, "value": 1}});
        let b = json!({"f": {"nested": {"confidence": 0.9, "value": 1}}});
        assert!(merge(&a, &b, ScoreResolver::Min).is_err());
        assert!(merge(&b, &a, ScoreResolver::Min).is_err());
    }

    #[test]
    fn test_non_numeric_confidence() {
        let a = json!({"f": {"confidence": "high", "value": 1}});
        let b = json!({"f": {"confidence": 0.9, "value": 1}});
        let err = merge(&a, &b, ScoreResolver::Min).unwrap_err();
        assert!(err.to_string().contains("not numeric"));
    }

    #[test]
    fn test_scalar_root_is_rejected() {
        assert!(merge(&json!(1), &json!(1), ScoreResolver::Min).is_err());
        assert!(merge(&json!([]), &json!([]), ScoreResolver::Min).is_err());
    }
}
