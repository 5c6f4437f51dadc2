use serde::Serialize;
use serde_json::{Map, Number, Value};

use super::field::{FieldKind, SpecificationField};
use super::SchemaError;

/// An item's values keyed by field key. Keys the category no longer defines
/// are kept as-is.
pub type SpecificationValues = Map<String, Value>;

/// Prefix of form inputs carrying one specification value each (`spec.rpm`).
pub const FORM_FIELD_PREFIX: &str = "spec.";

/// One displayable value, resolved against the category's current fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderedSpecification {
    pub key: String,
    pub label: String,
    pub value: Value,
    pub display_order: i32,
}

/// Accepts an object, or a string holding an object (multipart and form posts
/// send the blob as text). An empty string is an empty map.
pub fn parse_values(raw: Value) -> Result<SpecificationValues, SchemaError> {
    match raw {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        Value::String(text) => parse_values_str(&text),
        _ => Err(SchemaError::InvalidValues),
    }
}

pub fn parse_values_str(text: &str) -> Result<SpecificationValues, SchemaError> {
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SchemaError::InvalidValues),
        Err(e) => Err(SchemaError::InvalidJson(e.to_string())),
    }
}

/// Walks the fields in display order and emits the ones the item has a value for.
pub fn ordered_specifications(
    fields: &[SpecificationField],
    values: &SpecificationValues,
) -> Vec<OrderedSpecification> {
    let mut sorted: Vec<&SpecificationField> = fields.iter().collect();
    sorted.sort_by_key(|f| f.display_order);

    sorted
        .into_iter()
        .filter_map(|field| {
            values.get(&field.key).map(|value| OrderedSpecification {
                key: field.key.clone(),
                label: field.label.clone(),
                value: value.clone(),
                display_order: field.display_order,
            })
        })
        .collect()
}

/// Text form of a value for templates and legacy string members.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Legacy top-level item members (`brand`, `serial_number`, `description`)
/// live inside the values blob.
pub fn legacy_text(values: &SpecificationValues, key: &str) -> String {
    values.get(key).map(display_value).unwrap_or_default()
}

/// Merges `spec.<key>` form inputs into `existing`. Blank inputs clear the
/// value; number fields store a JSON number when the input parses as one.
/// Keys outside the current field list are left untouched.
pub fn collect_form_values(
    fields: &[SpecificationField],
    existing: &SpecificationValues,
    inputs: &[(String, String)],
) -> SpecificationValues {
    let mut values = existing.clone();
    for field in fields {
        let input_name = format!("{}{}", FORM_FIELD_PREFIX, field.key);
        let Some((_, raw)) = inputs.iter().find(|(name, _)| *name == input_name) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            values.remove(&field.key);
            continue;
        }
        let value = match field.kind {
            FieldKind::Number { .. } => number_value(raw),
            _ => Value::String(raw.to_string()),
        };
        values.insert(field.key.clone(), value);
    }
    values
}

fn number_value(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}
