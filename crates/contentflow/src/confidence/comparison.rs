use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{child_path, index_path};

/// One extracted field next to its merged confidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionComparisonItem {
    #[serde(rename = "Field")]
    pub field: String,
    #[serde(rename = "Extracted")]
    pub extracted: Value,
    /// Percentage with two decimals, e.g. `"87.50%"`.
    #[serde(rename = "Confidence")]
    pub confidence: String,
    #[serde(rename = "IsAboveThreshold")]
    pub is_above_threshold: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractionComparisonData {
    pub items: Vec<ExtractionComparisonItem>,
}

/// Lists every scalar of `extracted` by path, paired with the confidence found
/// at the same path in `confidence` (0 when absent). Sorted by path.
pub fn flatten_for_comparison(
    extracted: &Value,
    confidence: &Value,
    threshold: f64,
) -> ExtractionComparisonData {
    let mut values = BTreeMap::new();
    flatten_values(extracted, "", &mut values);

    let mut scores = BTreeMap::new();
    flatten_confidences(confidence, "", &mut scores);

    let items = values
        .into_iter()
        .map(|(path, value)| {
            let score = scores.get(&path).copied().unwrap_or(0.0);
            ExtractionComparisonItem {
                confidence: format!("{:.2}%", score * 100.0),
                is_above_threshold: score > threshold,
                extracted: value.clone(),
                field: path,
            }
        })
        .collect();

    ExtractionComparisonData { items }
}

fn flatten_values<'a>(node: &'a Value, path: &str, out: &mut BTreeMap<String, &'a Value>) {
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_values(child, &child_path(path, key), out);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_values(item, &index_path(path, i), out);
            }
        }
        scalar => {
            if !path.is_empty() {
                out.insert(path.to_string(), scalar);
            }
        }
    }
}

fn flatten_confidences(node: &Value, path: &str, out: &mut BTreeMap<String, f64>) {
    match node {
        Value::Object(map) => match map.get("confidence") {
            Some(score) if !path.is_empty() => {
                out.insert(path.to_string(), score.as_f64().unwrap_or(0.0));
            }
            _ => {
                for (key, child) in map {
                    flatten_confidences(child, &child_path(path, key), out);
                }
            }
        },
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_confidences(item, &index_path(path, i), out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::{merge, ScoreResolver};
    use serde_json::json;

    #[test]
    fn test_rows_sorted_with_percentages() {
        let extracted = json!({"total": 120.5, "customer": {"name": "Ann"}});
        let confidence = json!({
            "total": {"confidence": 0.875, "value": 120.5},
            "customer": {"name": {"confidence": 0.8, "value": "Ann"}}
        });
        let data = flatten_for_comparison(&extracted, &confidence, 0.8);

        assert_eq!(data.items.len(), 2);
        assert_eq!(data.items[0].field, "customer.name");
        assert_eq!(data.items[0].confidence, "80.00%");
        // Strictly above the threshold only.
        assert!(!data.items[0].is_above_threshold);

        assert_eq!(data.items[1].field, "total");
        assert_eq!(data.items[1].extracted, json!(120.5));
        assert_eq!(data.items[1].confidence, "87.50%");
        assert!(data.items[1].is_above_threshold);
    }

    #[test]
    fn test_missing_confidence_is_zero() {
        let extracted = json!({"lines": ["a", "b"], "note": null});
        let confidence = json!({"lines": [{"confidence": 0.95, "value": "a"}]});
        let data = flatten_for_comparison(&extracted, &confidence, 0.8);

        let fields: Vec<_> = data.items.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["lines[0]", "lines[1]", "note"]);
        assert_eq!(data.items[0].confidence, "95.00%");
        assert_eq!(data.items[1].confidence, "0.00%");
        assert_eq!(data.items[2].extracted, Value::Null);
    }

    #[test]
    fn test_against_merged_tree() {
        let a = json!({"f": {"confidence": 0.9, "value": "x"}});
        let b = json!({"f": {"confidence": 0.85, "value": "x"}});
        let merged = merge(&a, &b, ScoreResolver::Min).unwrap();

        let data = flatten_for_comparison(&json!({"f": "x"}), &merged.to_value(), 0.8);
        assert_eq!(data.items.len(), 1);
        assert_eq!(data.items[0].confidence, "85.00%");
        assert!(data.items[0].is_above_threshold);
    }

    #[test]
    fn test_wire_names() {
        let data = ExtractionComparisonData {
            items: vec![ExtractionComparisonItem {
                field: "f".into(),
                extracted: json!("x"),
                confidence: "50.00%".into(),
                is_above_threshold: false,
            }],
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(
            value,
            json!({"items": [{"Field": "f", "Extracted": "x", "Confidence": "50.00%", "IsAboveThreshold": false}]})
        );
    }
}
