use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db;
use crate::error::{unique_violation, AppError, AppResult};
use crate::extract::{non_empty, JsonBody};
use crate::middleware::AdminUser;
use crate::models::CategoryResponse;
use crate::schema::{SchemaDocument, SpecificationField};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub specifications_schema: Option<Value>,
}

/// Normalises a schema document and returns it with the text to keep in the
/// legacy column. A JSON string is parsed as the document itself.
pub fn parse_schema(value: Value) -> AppResult<(Vec<SpecificationField>, String)> {
    let (document, text) = match value {
        Value::String(text) => (SchemaDocument::from_json_str(&text)?, text),
        other => {
            let text = other.to_string();
            (SchemaDocument::from_value(other)?, text)
        }
    };
    tracing::debug!(
        "Parsing {} specifications schema",
        if document.is_legacy() { "legacy" } else { "ordered" }
    );
    Ok((document.into_fields()?, text))
}

/// Schema bodies may be sent bare or wrapped as `{"specifications_schema": ...}`.
/// A legacy document whose only field is named like a wrapper stays as it is.
fn unwrap_schema_body(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.len() == 1 => {
            for wrapper in ["specifications_schema", "specifications"] {
                if let Some(inner) = map.remove(wrapper) {
                    if is_wrapped_document(&inner) {
                        return inner;
                    }
                    map.insert(wrapper.to_string(), inner);
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}

/// Lists and strings are documents; an object is one only when every member
/// is itself a field definition.
fn is_wrapped_document(inner: &Value) -> bool {
    match inner {
        Value::Array(_) | Value::String(_) => true,
        Value::Object(members) => members.values().all(Value::is_object),
        _ => false,
    }
}

async fn load_response(state: &AppState, id: i64) -> AppResult<CategoryResponse> {
    db::categories::get_category(&state.pool, id)
        .await?
        .map(|c| c.to_response())
        .ok_or_else(|| AppError::NotFound("Category not found".to_string()))
}

pub async fn list_categories(State(state): State<AppState>) -> AppResult<Json<Vec<CategoryResponse>>> {
    let categories = db::categories::list_categories(&state.pool).await?;
    Ok(Json(categories.iter().map(|c| c.to_response()).collect()))
}

pub async fn create_category(
    State(state): State<AppState>,
    _admin: AdminUser,
    JsonBody(req): JsonBody<CategoryRequest>,
) -> AppResult<(StatusCode, Json<CategoryResponse>)> {
    let name = non_empty(&req.name)
        .ok_or_else(|| AppError::InvalidInput("Name is required".to_string()))?;
    let schema = req.specifications_schema.map(parse_schema).transpose()?;

    let mut tx = state.pool.begin().await?;
    if db::categories::name_taken(&mut *tx, name, None).await? {
        tracing::warn!("Category name '{}' already exists", name);
        return Err(AppError::InvalidInput("Category already exists".to_string()));
    }

    let id = db::categories::insert_category(&mut *tx, name)
        .await
        .map_err(|e| unique_violation(e, "Category already exists"))?;
    if let Some((fields, text)) = &schema {
        db::categories::replace_fields(&mut *tx, id, fields, Some(text)).await?;
    }
    tx.commit().await?;

    tracing::info!(
        "Created category {} '{}' with {} specifications",
        id,
        name,
        schema.as_ref().map(|(f, _)| f.len()).unwrap_or(0)
    );
    Ok((StatusCode::CREATED, Json(load_response(&state, id).await?)))
}

pub async fn update_category(
    State(state): State<AppState>,
    Path(category_id): Path<i64>,
    _admin: AdminUser,
    JsonBody(req): JsonBody<CategoryRequest>,
) -> AppResult<Json<CategoryResponse>> {
    let name = non_empty(&req.name)
        .ok_or_else(|| AppError::InvalidInput("Name is required".to_string()))?;
    let schema = req.specifications_schema.map(parse_schema).transpose()?;

    let mut tx = state.pool.begin().await?;
    if !db::categories::exists(&mut *tx, category_id).await? {
        return Err(AppError::NotFound("Category not found".to_string()));
    }
    if db::categories::name_taken(&mut *tx, name, Some(category_id)).await? {
        tracing::warn!("Category name '{}' already exists", name);
        return Err(AppError::InvalidInput("Category already exists".to_string()));
    }

    db::categories::rename_category(&mut *tx, category_id, name)
        .await
        .map_err(|e| unique_violation(e, "Category already exists"))?;
    if let Some((fields, text)) = &schema {
        db::categories::replace_fields(&mut *tx, category_id, fields, Some(text)).await?;
    }
    tx.commit().await?;

    tracing::info!("Updated category {} '{}'", category_id, name);
    Ok(Json(load_response(&state, category_id).await?))
}

pub async fn delete_category(
    State(state): State<AppState>,
    Path(category_id): Path<i64>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let mut tx = state.pool.begin().await?;
    if !db::categories::exists(&mut *tx, category_id).await? {
        return Err(AppError::NotFound("Category not found".to_string()));
    }

    let items = db::categories::count_items(&mut *tx, category_id).await?;
    if items > 0 {
        tracing::warn!("Refusing to delete category {} with {} items", category_id, items);
        return Err(AppError::Conflict(format!(
            "Category still has {} item(s); move or delete them first",
            items
        )));
    }

    db::categories::delete_category(&mut *tx, category_id).await?;
    tx.commit().await?;

    tracing::info!("Deleted category {}", category_id);
    Ok(Json(json!({ "result": "success" })))
}

pub async fn get_schema(
    State(state): State<AppState>,
    Path(category_id): Path<i64>,
) -> AppResult<Json<Vec<SpecificationField>>> {
    let category = db::categories::get_category(&state.pool, category_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Category not found".to_string()))?;
    Ok(Json(category.fields))
}

pub async fn put_schema(
    State(state): State<AppState>,
    Path(category_id): Path<i64>,
    _admin: AdminUser,
    JsonBody(body): JsonBody<Value>,
) -> AppResult<Json<Vec<SpecificationField>>> {
    let (fields, text) = parse_schema(unwrap_schema_body(body))?;

    let mut tx = state.pool.begin().await?;
    if !db::categories::exists(&mut *tx, category_id).await? {
        return Err(AppError::NotFound("Category not found".to_string()));
    }
    db::categories::replace_fields(&mut *tx, category_id, &fields, Some(&text)).await?;
    tx.commit().await?;

    tracing::info!(
        "Replaced specifications for category {} ({} fields)",
        category_id,
        fields.len()
    );
    Ok(Json(db::categories::load_fields(&state.pool, category_id).await?))
}
