use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const SENTINELS: &[&str] = &[
    "n/a",
    "na",
    "null",
    "none",
    "undefined",
    "unknown",
    "not found",
    "not available",
];

/// A single extracted field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
    List(Vec<String>),
    /// Objects and nested arrays. Never produced by the extractor itself.
    Other(Value),
}

pub type ExtractedRecord = BTreeMap<String, FieldValue>;

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldValue::List(items.into_iter().map(Into::into).collect())
    }

    /// The value a failed field is replaced with.
    pub fn blanked(&self) -> FieldValue {
        match self {
            FieldValue::List(_) => FieldValue::List(Vec::new()),
            FieldValue::Other(Value::Array(_)) => FieldValue::List(Vec::new()),
            _ => FieldValue::Null,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Text(_) => "string",
            FieldValue::List(_) => "array",
            FieldValue::Other(Value::Object(_)) => "object",
            FieldValue::Other(_) => "nested array",
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::String(s) => FieldValue::Text(s),
            Value::Number(n) => FieldValue::Text(n.to_string()),
            Value::Bool(b) => FieldValue::Text(b.to_string()),
            Value::Array(items) => {
                let scalars: Option<Vec<String>> = items.iter().map(scalar_to_string).collect();
                match scalars {
                    Some(list) => FieldValue::List(list),
                    None => FieldValue::Other(Value::Array(items)),
                }
            }
            other => FieldValue::Other(other),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(FieldValue::from)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Convert a JSON object into a record. Non-objects yield an empty record.
pub fn record_from_json(value: Value) -> ExtractedRecord {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (k, FieldValue::from(v)))
            .collect(),
        _ => ExtractedRecord::new(),
    }
}

pub fn is_text_populated(s: &str) -> bool {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return false;
    }
    let lower = trimmed.to_lowercase();
    !SENTINELS.contains(&lower.as_str())
}

pub fn is_field_populated(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => false,
        FieldValue::Text(s) => is_text_populated(s),
        FieldValue::List(items) => items.iter().any(|s| is_text_populated(s)),
        FieldValue::Other(Value::Object(map)) => !map.is_empty(),
        FieldValue::Other(Value::Array(items)) => !items.is_empty(),
        FieldValue::Other(_) => true,
    }
}

/// Percentage of populated fields, unrounded.
pub fn accuracy(record: &ExtractedRecord) -> f64 {
    let populated = record.values().filter(|v| is_field_populated(v)).count();
    percent(populated as f64, record.len() as f64)
}

/// Percentage of populated fields, rounded to the nearest integer.
pub fn calculate_accuracy(record: &ExtractedRecord) -> u32 {
    round_percent(accuracy(record))
}

pub fn percent(part: f64, total: f64) -> f64 {
    if total <= 0.0 {
        0.0
    } else {
        (part / total * 100.0).clamp(0.0, 100.0)
    }
}

pub fn round_percent(value: f64) -> u32 {
    if value.is_finite() {
        value.round().clamp(0.0, 100.0) as u32
    } else {
        0
    }
}
