use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use crate::schema::{
    legacy_text, ordered_specifications, OrderedSpecification, SpecificationField,
    SpecificationValues,
};

#[derive(Debug, Clone, FromRow)]
pub struct ItemRow {
    pub id: i64,
    pub category_id: i64,
    pub category_name: String,
    pub name: String,
    pub specification_values: Json<SpecificationValues>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PhotoModel {
    pub id: i64,
    pub item_id: i64,
    pub file_path: String,
    pub filename: Option<String>,
    pub is_primary: bool,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UrlModel {
    pub id: i64,
    pub item_id: i64,
    pub url: String,
}

/// An item with its children and the fields of its current category.
#[derive(Debug, Clone)]
pub struct ItemDetail {
    pub item: ItemRow,
    pub fields: Vec<SpecificationField>,
    pub photos: Vec<PhotoModel>,
    pub urls: Vec<UrlModel>,
}

impl ItemDetail {
    pub fn values(&self) -> &SpecificationValues {
        &self.item.specification_values.0
    }

    pub fn ordered_specifications(&self) -> Vec<OrderedSpecification> {
        ordered_specifications(&self.fields, self.values())
    }

    /// The flagged primary photo, else the first one.
    pub fn primary_photo(&self) -> Option<&PhotoModel> {
        self.photos
            .iter()
            .find(|p| p.is_primary)
            .or_else(|| self.photos.first())
    }

    pub fn to_response(&self) -> ItemResponse {
        let values = self.values();
        ItemResponse {
            id: self.item.id,
            category_id: self.item.category_id,
            category_name: self.item.category_name.clone(),
            name: self.item.name.clone(),
            brand: legacy_text(values, "brand"),
            serial_number: legacy_text(values, "serial_number"),
            description: legacy_text(values, "description"),
            specification_values: values.clone(),
            ordered_specifications: self.ordered_specifications(),
            photos: self
                .photos
                .iter()
                .map(|p| PhotoRef {
                    id: p.id,
                    filename: p.file_path.clone(),
                })
                .collect(),
            urls: self
                .urls
                .iter()
                .map(|u| UrlRef {
                    id: u.id,
                    url: u.url.clone(),
                })
                .collect(),
            primary_photo: self.primary_photo().map(|p| p.file_path.clone()),
            created_at: self.item.created_at.to_rfc3339(),
            updated_at: self.item.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoRef {
    pub id: i64,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlRef {
    pub id: i64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemResponse {
    pub id: i64,
    pub category_id: i64,
    pub category_name: String,
    pub name: String,
    pub brand: String,
    pub serial_number: String,
    pub description: String,
    pub specification_values: SpecificationValues,
    pub ordered_specifications: Vec<OrderedSpecification>,
    pub photos: Vec<PhotoRef>,
    pub urls: Vec<UrlRef>,
    pub primary_photo: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
