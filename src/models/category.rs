use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::schema::{to_legacy_map, FieldKind, SpecificationField};

#[derive(Debug, Clone, FromRow)]
pub struct CategoryRow {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub item_count: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct SpecificationRow {
    pub id: i64,
    pub category_id: i64,
    pub key: String,
    pub label: Option<String>,
    #[sqlx(rename = "type")]
    pub field_type: String,
    pub placeholder: Option<String>,
    pub display_order: i32,
    pub options: Option<Json<Vec<String>>>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub step_value: Option<f64>,
}

impl SpecificationRow {
    /// Unknown stored types read back as text so old rows stay displayable.
    pub fn into_field(self) -> SpecificationField {
        let kind = match self.field_type.as_str() {
            FieldKind::NUMBER => FieldKind::Number {
                min: self.min_value,
                max: self.max_value,
                step: self.step_value.unwrap_or(1.0),
            },
            FieldKind::SELECT => FieldKind::Select {
                options: self.options.map(|o| o.0).unwrap_or_default(),
            },
            _ => FieldKind::Text,
        };
        let label = self
            .label
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.key.clone());

        SpecificationField {
            id: Some(self.id),
            key: self.key,
            label,
            placeholder: self.placeholder.unwrap_or_default(),
            display_order: self.display_order,
            kind,
        }
    }
}

/// A category together with its ordered fields.
#[derive(Debug, Clone)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub item_count: i64,
    pub fields: Vec<SpecificationField>,
}

impl Category {
    pub fn from_row(row: CategoryRow, fields: Vec<SpecificationField>) -> Self {
        Self {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
            item_count: row.item_count,
            fields,
        }
    }

    pub fn to_response(&self) -> CategoryResponse {
        CategoryResponse {
            id: self.id,
            name: self.name.clone(),
            specifications_schema: to_legacy_map(&self.fields),
            specifications: self.fields.clone(),
            created_at: self.created_at.to_rfc3339(),
            item_count: self.item_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryResponse {
    pub id: i64,
    pub name: String,
    /// Keyed form, kept for clients written against the legacy format.
    pub specifications_schema: Map<String, Value>,
    pub specifications: Vec<SpecificationField>,
    pub created_at: String,
    pub item_count: i64,
}
