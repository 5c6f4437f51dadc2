use async_trait::async_trait;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{Postgres, Transaction};

use crate::db;
use crate::db::items::ItemFilter;
use crate::error::{AppError, AppResult};
use crate::extract::{non_empty, JsonBody};
use crate::middleware::AdminUser;
use crate::models::{ItemResponse, PhotoModel, PhotoRef, UrlRef};
use crate::schema::{
    collect_form_values, parse_values, parse_values_str, SpecificationField, SpecificationValues,
    FORM_FIELD_PREFIX,
};
use crate::state::AppState;
use crate::storage::{allowed_extension, content_type_for, photo_key};

/// Item members kept at the top level by older clients; stored in the values blob.
const LEGACY_MEMBERS: &[&str] = &["brand", "serial_number", "description"];

/// One uploaded file from a multipart body.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub data: Bytes,
}

/// Create/update body, accepted as JSON or as multipart form data.
#[derive(Debug, Default)]
pub struct ItemPayload {
    pub name: Option<String>,
    pub category_id: Option<i64>,
    pub specification_values: Option<SpecificationValues>,
    /// `spec.<key>` form inputs.
    pub spec_inputs: Vec<(String, String)>,
    /// `brand`, `serial_number` and `description` sent as their own members.
    pub legacy: Vec<(String, String)>,
    /// `None` leaves an item's URLs alone; `Some` replaces them.
    pub urls: Option<Vec<String>>,
    pub photos: Vec<Upload>,
}

fn parse_id_str(raw: &str) -> AppResult<Option<i64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| AppError::InvalidInput(format!("Invalid category_id: {}", raw)))
}

fn url_entry(value: &Value) -> Option<String> {
    match value {
        Value::String(url) => Some(url.clone()),
        Value::Object(obj) => obj.get("url").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

impl ItemPayload {
    fn push_urls(&mut self, urls: impl IntoIterator<Item = String>) {
        let list = self.urls.get_or_insert_with(Vec::new);
        list.extend(
            urls.into_iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
        );
    }

    /// `urls` in a form post: a JSON list, or else a single URL.
    fn push_urls_text(&mut self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(entries)) => self.push_urls(entries.iter().filter_map(url_entry)),
            _ => self.push_urls([text.to_string()]),
        }
    }

    fn apply_text(&mut self, name: &str, text: String) -> AppResult<()> {
        match name {
            "name" => self.name = Some(text),
            "category_id" => self.category_id = parse_id_str(&text)?,
            "specification_values" => {
                self.specification_values = Some(parse_values_str(&text)?);
            }
            "urls" => self.push_urls_text(&text),
            "urls[]" => self.push_urls([text]),
            _ if LEGACY_MEMBERS.contains(&name) => self.legacy.push((name.to_string(), text)),
            _ if name.starts_with(FORM_FIELD_PREFIX) => {
                self.spec_inputs.push((name.to_string(), text));
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn from_multipart(multipart: &mut Multipart) -> AppResult<Self> {
        let mut payload = ItemPayload::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if matches!(name.as_str(), "photos[]" | "photos" | "photo") {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                // Browsers send an empty part for an untouched file input.
                if filename.is_empty() && data.is_empty() {
                    continue;
                }
                payload.photos.push(Upload { filename, data });
            } else {
                let text = field.text().await?;
                payload.apply_text(&name, text)?;
            }
        }
        Ok(payload)
    }

    pub fn from_json(body: Value) -> AppResult<Self> {
        let Value::Object(body) = body else {
            return Err(AppError::InvalidInput("Request body must be a JSON object".to_string()));
        };

        let mut payload = ItemPayload::default();
        for (name, value) in body {
            match (name.as_str(), value) {
                (_, Value::Null) => {}
                ("name", Value::String(text)) => payload.name = Some(text),
                ("category_id", Value::Number(n)) => {
                    payload.category_id = Some(n.as_i64().ok_or_else(|| {
                        AppError::InvalidInput(format!("Invalid category_id: {}", n))
                    })?);
                }
                ("category_id", Value::String(text)) => payload.category_id = parse_id_str(&text)?,
                ("specification_values", value) => {
                    payload.specification_values = Some(parse_values(value)?);
                }
                ("urls", Value::Array(entries)) => {
                    payload.push_urls(entries.iter().filter_map(url_entry));
                }
                ("urls", Value::String(text)) => payload.push_urls_text(&text),
                (member, Value::String(text)) if LEGACY_MEMBERS.contains(&member) => {
                    payload.legacy.push((member.to_string(), text));
                }
                ("name" | "category_id" | "urls", other) => {
                    return Err(AppError::InvalidInput(format!("Invalid {}: {}", name, other)));
                }
                _ => {}
            }
        }
        Ok(payload)
    }

    /// Values after applying this payload on top of `existing`, or `None`
    /// when the payload carries no value changes.
    pub fn resolve_values(
        &self,
        fields: &[SpecificationField],
        existing: Option<&SpecificationValues>,
    ) -> Option<SpecificationValues> {
        if self.specification_values.is_none() && self.spec_inputs.is_empty() && self.legacy.is_empty() {
            return None;
        }

        let base = self
            .specification_values
            .clone()
            .or_else(|| existing.cloned())
            .unwrap_or_default();
        let mut values = collect_form_values(fields, &base, &self.spec_inputs);

        for (key, text) in &self.legacy {
            let text = text.trim();
            if text.is_empty() {
                values.remove(key);
            } else {
                values.insert(key.clone(), Value::String(text.to_string()));
            }
        }
        Some(values)
    }
}

#[async_trait]
impl<S> FromRequest<S> for ItemPayload
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_multipart {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::InvalidInput(e.body_text()))?;
            ItemPayload::from_multipart(&mut multipart).await
        } else {
            let JsonBody(body) = JsonBody::<Value>::from_request(req, state).await?;
            ItemPayload::from_json(body)
        }
    }
}

/// A photo already written to storage but not yet recorded.
#[derive(Debug, Clone)]
pub struct StoredPhoto {
    pub key: String,
    pub filename: String,
}

/// Uploads the accepted photos; files with other extensions are skipped.
/// On failure the files already written are removed again.
pub async fn upload_photos(state: &AppState, item_id: i64, uploads: &[Upload]) -> AppResult<Vec<StoredPhoto>> {
    let mut stored: Vec<StoredPhoto> = Vec::new();
    for upload in uploads {
        let Some(key) = photo_key(item_id, &upload.filename) else {
            tracing::warn!("Skipping photo '{}' for item {}: file type not allowed", upload.filename, item_id);
            continue;
        };
        if let Err(e) = state.storage.upload(&key, &upload.data, content_type_for(&key)).await {
            discard_files(state, &stored_keys(&stored)).await;
            return Err(e);
        }
        stored.push(StoredPhoto {
            key,
            filename: upload.filename.clone(),
        });
    }
    Ok(stored)
}

/// Records the uploaded photos and commits. Uploaded files are removed if
/// the commit does not happen.
pub async fn record_photos_and_commit(
    state: &AppState,
    mut tx: Transaction<'_, Postgres>,
    item_id: i64,
    stored: &[StoredPhoto],
) -> AppResult<Vec<PhotoModel>> {
    let result: Result<Vec<PhotoModel>, sqlx::Error> = async move {
        let mut photos = Vec::with_capacity(stored.len());
        for photo in stored {
            photos.push(db::items::add_photo(&mut *tx, item_id, &photo.key, &photo.filename).await?);
        }
        tx.commit().await?;
        Ok(photos)
    }
    .await;

    match result {
        Ok(photos) => Ok(photos),
        Err(e) => {
            discard_files(state, &stored_keys(stored)).await;
            Err(e.into())
        }
    }
}

fn stored_keys(stored: &[StoredPhoto]) -> Vec<String> {
    stored.iter().map(|p| p.key.clone()).collect()
}

/// Deletes stored files; failures are logged and otherwise ignored.
pub async fn discard_files(state: &AppState, keys: &[String]) {
    for key in keys {
        if let Err(e) = state.storage.delete(key).await {
            tracing::warn!("Failed to delete photo file {}: {}", key, e);
        }
    }
}

async fn load_response(state: &AppState, id: i64) -> AppResult<ItemResponse> {
    db::items::get_item(&state.pool, id)
        .await?
        .map(|item| item.to_response())
        .ok_or_else(|| AppError::NotFound("Item not found".to_string()))
}

/// Creates an item from a validated payload and returns its id.
pub async fn create_from_payload(state: &AppState, payload: &ItemPayload) -> AppResult<i64> {
    let name = non_empty(&payload.name)
        .ok_or_else(|| AppError::InvalidInput("Name is required".to_string()))?;
    let category_id = payload
        .category_id
        .ok_or_else(|| AppError::InvalidInput("Category is required".to_string()))?;

    let mut tx = state.pool.begin().await?;
    if !db::categories::exists(&mut *tx, category_id).await? {
        tracing::warn!("Item '{}' references missing category {}", name, category_id);
        return Err(AppError::InvalidInput("Selected category does not exist".to_string()));
    }

    let fields = db::categories::load_fields(&mut *tx, category_id).await?;
    let values = payload.resolve_values(&fields, None).unwrap_or_default();

    let item_id = db::items::insert_item(&mut *tx, category_id, name, &values).await?;
    if let Some(urls) = &payload.urls {
        db::items::replace_urls(&mut *tx, item_id, urls).await?;
    }

    let stored = upload_photos(state, item_id, &payload.photos).await?;
    record_photos_and_commit(state, tx, item_id, &stored).await?;

    tracing::info!(
        "Created item {} '{}' in category {} with {} photos",
        item_id,
        name,
        category_id,
        stored.len()
    );
    Ok(item_id)
}

/// Applies a partial update; only members present in the payload change.
pub async fn update_from_payload(state: &AppState, item_id: i64, payload: &ItemPayload) -> AppResult<()> {
    let name = match &payload.name {
        Some(_) => Some(
            non_empty(&payload.name)
                .ok_or_else(|| AppError::InvalidInput("Name is required".to_string()))?,
        ),
        None => None,
    };

    let mut tx = state.pool.begin().await?;
    let (current_category, existing) = db::items::lock_item(&mut *tx, item_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Item not found".to_string()))?;

    if let Some(category_id) = payload.category_id {
        if !db::categories::exists(&mut *tx, category_id).await? {
            return Err(AppError::InvalidInput("Selected category does not exist".to_string()));
        }
    }

    let category_id = payload.category_id.unwrap_or(current_category);
    let fields = db::categories::load_fields(&mut *tx, category_id).await?;
    let values = payload.resolve_values(&fields, Some(&existing));

    db::items::update_item(&mut *tx, item_id, payload.category_id, name, values.as_ref()).await?;
    if let Some(urls) = &payload.urls {
        db::items::replace_urls(&mut *tx, item_id, urls).await?;
    }

    let stored = upload_photos(state, item_id, &payload.photos).await?;
    record_photos_and_commit(state, tx, item_id, &stored).await?;

    tracing::info!("Updated item {} with {} new photos", item_id, stored.len());
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ListItemsQuery {
    pub category_id: Option<i64>,
    pub search: Option<String>,
}

pub async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ListItemsQuery>,
) -> AppResult<Json<Vec<ItemResponse>>> {
    let filter = ItemFilter {
        category_id: query.category_id,
        search: query.search,
    };
    let items = db::items::list_items(&state.pool, &filter).await?;
    Ok(Json(items.iter().map(|i| i.to_response()).collect()))
}

pub async fn get_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> AppResult<Json<ItemResponse>> {
    Ok(Json(load_response(&state, item_id).await?))
}

pub async fn create_item(
    State(state): State<AppState>,
    _admin: AdminUser,
    payload: ItemPayload,
) -> AppResult<(StatusCode, Json<ItemResponse>)> {
    let item_id = create_from_payload(&state, &payload).await?;
    Ok((StatusCode::CREATED, Json(load_response(&state, item_id).await?)))
}

pub async fn update_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    _admin: AdminUser,
    payload: ItemPayload,
) -> AppResult<Json<ItemResponse>> {
    update_from_payload(&state, item_id, &payload).await?;
    Ok(Json(load_response(&state, item_id).await?))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let mut tx = state.pool.begin().await?;
    let keys = db::items::delete_item(&mut *tx, item_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Item not found".to_string()))?;
    tx.commit().await?;

    discard_files(&state, &keys).await;

    tracing::info!("Deleted item {} and {} photos", item_id, keys.len());
    Ok(Json(json!({ "message": "Item deleted" })))
}

#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: Option<String>,
}

pub async fn add_url(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    _admin: AdminUser,
    JsonBody(req): JsonBody<UrlRequest>,
) -> AppResult<(StatusCode, Json<UrlRef>)> {
    let mut tx = state.pool.begin().await?;
    if !db::items::exists(&mut *tx, item_id).await? {
        return Err(AppError::NotFound("Item not found".to_string()));
    }
    let url = non_empty(&req.url)
        .ok_or_else(|| AppError::InvalidInput("URL is required".to_string()))?;

    let created = db::items::add_url(&mut *tx, item_id, url).await?;
    tx.commit().await?;

    tracing::info!("Added URL {} to item {}", created.id, item_id);
    Ok((
        StatusCode::CREATED,
        Json(UrlRef {
            id: created.id,
            url: created.url,
        }),
    ))
}

pub async fn delete_url(
    State(state): State<AppState>,
    Path((item_id, url_id)): Path<(i64, i64)>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let mut tx = state.pool.begin().await?;
    if !db::items::exists(&mut *tx, item_id).await? {
        return Err(AppError::NotFound("Item not found".to_string()));
    }
    if !db::items::delete_url(&mut *tx, item_id, url_id).await? {
        return Err(AppError::NotFound("URL not found for this item".to_string()));
    }
    tx.commit().await?;

    tracing::info!("Removed URL {} from item {}", url_id, item_id);
    Ok(Json(json!({ "result": "success" })))
}

pub async fn add_photo(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    _admin: AdminUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<PhotoRef>)> {
    let payload = ItemPayload::from_multipart(&mut multipart).await?;
    let upload = payload
        .photos
        .into_iter()
        .next()
        .ok_or_else(|| AppError::InvalidInput("No photo provided".to_string()))?;
    if allowed_extension(&upload.filename).is_none() {
        return Err(AppError::InvalidInput("Invalid file format".to_string()));
    }

    let mut tx = state.pool.begin().await?;
    if !db::items::exists(&mut *tx, item_id).await? {
        return Err(AppError::NotFound("Item not found".to_string()));
    }

    let stored = upload_photos(&state, item_id, std::slice::from_ref(&upload)).await?;
    let photo = record_photos_and_commit(&state, tx, item_id, &stored)
        .await?
        .pop()
        .ok_or_else(|| AppError::Internal("photo was not recorded".to_string()))?;

    tracing::info!("Added photo {} ({}) to item {}", photo.id, photo.file_path, item_id);
    Ok((
        StatusCode::CREATED,
        Json(PhotoRef {
            id: photo.id,
            filename: photo.file_path,
        }),
    ))
}

pub async fn delete_photo(
    State(state): State<AppState>,
    Path((item_id, photo_id)): Path<(i64, i64)>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let mut tx = state.pool.begin().await?;
    let key = db::items::delete_photo(&mut *tx, item_id, photo_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Photo not found for this item".to_string()))?;
    tx.commit().await?;

    discard_files(&state, std::slice::from_ref(&key)).await;

    tracing::info!("Removed photo {} from item {}", photo_id, item_id);
    Ok(Json(json!({ "result": "success" })))
}
