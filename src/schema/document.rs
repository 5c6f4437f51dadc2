use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::field::{FieldKind, SpecificationField};
use super::SchemaError;

/// Body of a single field definition as posted by clients. Every member is
/// optional; defaults are applied during normalisation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldBody {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub display_order: Option<i32>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
    #[serde(default)]
    pub options: Option<Vec<Value>>,
}

/// A schema document in either accepted representation.
#[derive(Debug, Clone)]
pub enum SchemaDocument {
    /// `{key: body}`; order of appearance is the display order.
    Legacy(Vec<(String, FieldBody)>),
    /// `[body]`; `display_order` falls back to the list position.
    Ordered(Vec<FieldBody>),
}

impl SchemaDocument {
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        match value {
            Value::Null => Ok(SchemaDocument::Ordered(Vec::new())),
            Value::Object(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, body) in map {
                    let body = parse_body(&key, body)?;
                    entries.push((key, body));
                }
                Ok(SchemaDocument::Legacy(entries))
            }
            Value::Array(list) => {
                let mut bodies = Vec::with_capacity(list.len());
                for (index, body) in list.into_iter().enumerate() {
                    let label = body
                        .get("key")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("#{}", index));
                    bodies.push(parse_body(&label, body)?);
                }
                Ok(SchemaDocument::Ordered(bodies))
            }
            _ => Err(SchemaError::UnsupportedShape),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| SchemaError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, SchemaDocument::Legacy(_))
    }

    /// Validates the document and returns its fields sorted by display order.
    pub fn into_fields(self) -> Result<Vec<SpecificationField>, SchemaError> {
        let mut fields = match self {
            SchemaDocument::Legacy(entries) => entries
                .into_iter()
                .enumerate()
                .map(|(position, (key, body))| build_field(key, body, position as i32))
                .collect::<Result<Vec<_>, _>>()?,
            SchemaDocument::Ordered(bodies) => bodies
                .into_iter()
                .enumerate()
                .map(|(position, body)| {
                    let key = body.key.clone().ok_or(SchemaError::MissingKey(position))?;
                    let order = body.display_order.unwrap_or(position as i32);
                    build_field(key, body, order)
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.key.as_str()) {
                return Err(SchemaError::DuplicateKey(field.key.clone()));
            }
        }

        fields.sort_by_key(|f| f.display_order);
        Ok(fields)
    }
}

fn parse_body(key: &str, body: Value) -> Result<FieldBody, SchemaError> {
    if !body.is_object() {
        return Err(SchemaError::MalformedField {
            key: key.to_string(),
            reason: "field definition must be an object".to_string(),
        });
    }
    serde_json::from_value(body).map_err(|e| SchemaError::MalformedField {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn build_field(key: String, body: FieldBody, display_order: i32) -> Result<SpecificationField, SchemaError> {
    let key = key.trim().to_string();
    if key.is_empty() {
        return Err(SchemaError::EmptyKey);
    }

    let field_type = body
        .field_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(FieldKind::TEXT);

    let kind = match field_type {
        FieldKind::TEXT => FieldKind::Text,
        FieldKind::NUMBER => {
            if let (Some(min), Some(max)) = (body.min, body.max) {
                if min > max {
                    return Err(SchemaError::InvalidBounds(key));
                }
            }
            let step = body.step.unwrap_or(1.0);
            if step <= 0.0 {
                return Err(SchemaError::InvalidStep(key));
            }
            FieldKind::Number {
                min: body.min,
                max: body.max,
                step,
            }
        }
        FieldKind::SELECT => FieldKind::Select {
            options: body
                .options
                .unwrap_or_default()
                .into_iter()
                .filter(|o| !o.is_null())
                .map(|o| match o {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
        },
        other => {
            return Err(SchemaError::UnknownType {
                key,
                field_type: other.to_string(),
            })
        }
    };

    let label = body
        .label
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| key.clone());

    Ok(SpecificationField {
        id: None,
        key,
        label,
        placeholder: body.placeholder.unwrap_or_default(),
        display_order,
        kind,
    })
}

/// Keyed representation of a field list, in display order.
pub fn to_legacy_map(fields: &[SpecificationField]) -> Map<String, Value> {
    fields
        .iter()
        .map(|f| (f.key.clone(), serde_json::to_value(f).unwrap_or_default()))
        .collect()
}

/// Converts a stored legacy schema column into fields. Returns `None` when the
/// column holds nothing worth migrating (blank, `null`, `{}` or `[]`).
pub fn migrate_legacy_text(text: &str) -> Result<Option<Vec<SpecificationField>>, SchemaError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let fields = SchemaDocument::from_json_str(text)?.into_fields()?;
    if fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(fields))
}
