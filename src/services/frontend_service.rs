use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;

use crate::db;
use crate::db::items::ItemFilter;
use crate::error::{AppError, AppResult};
use crate::extract::non_empty;
use crate::middleware::{AdminUser, AuthenticatedUser, OptionalUser};
use crate::services::items_service::{update_from_payload, ItemPayload};
use crate::state::AppState;
use crate::storage::content_type_for;
use crate::views;
use crate::views::items::IndexPage;

pub const EDIT_SUCCESS_REDIRECT: &str = "/?success=Item+updated+successfully";

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Html(views::not_found_page(message))).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexQuery {
    pub category_id: Option<String>,
    pub search: Option<String>,
    pub success: Option<String>,
    pub error: Option<String>,
}

pub async fn index(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Query(query): Query<IndexQuery>,
) -> AppResult<Html<String>> {
    // The "All categories" option submits an empty value.
    let category_id = non_empty(&query.category_id).and_then(|id| id.parse::<i64>().ok());
    let search = non_empty(&query.search);

    let categories = db::categories::list_categories(&state.pool).await?;
    let filter = ItemFilter {
        category_id,
        search: search.map(str::to_string),
    };
    let items = db::items::list_items(&state.pool, &filter).await?;

    Ok(Html(views::items::index_page(&IndexPage {
        categories: &categories,
        items: &items,
        category_id,
        search,
        success: query.success.as_deref(),
        error: query.error.as_deref(),
        user: user.as_ref(),
    })))
}

pub async fn view_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    OptionalUser(user): OptionalUser,
) -> AppResult<Response> {
    match db::items::get_item(&state.pool, item_id).await? {
        Some(item) => {
            tracing::debug!("Viewing item {} '{}'", item_id, item.item.name);
            Ok(Html(views::items::item_page(&item, user.as_ref())).into_response())
        }
        None => {
            tracing::warn!("Item not found: {}", item_id);
            Ok(not_found("Item not found"))
        }
    }
}

pub async fn edit_redirect(Path(item_id): Path<i64>) -> Redirect {
    Redirect::to(&format!("/item/{}/edit", item_id))
}

async fn render_edit(
    state: &AppState,
    item_id: i64,
    error: Option<&str>,
    user: &AuthenticatedUser,
) -> AppResult<Option<String>> {
    let Some(item) = db::items::get_item(&state.pool, item_id).await? else {
        return Ok(None);
    };
    let categories = db::categories::list_categories(&state.pool).await?;
    Ok(Some(views::items::edit_page(&item, &categories, error, Some(user))))
}

pub async fn edit_form(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    AdminUser(user): AdminUser,
) -> AppResult<Response> {
    match render_edit(&state, item_id, None, &user).await? {
        Some(html) => Ok(Html(html).into_response()),
        None => Ok(not_found("Item not found")),
    }
}

/// Message shown on the re-rendered form for errors the user can correct.
fn form_error(err: &AppError) -> Option<String> {
    match err {
        AppError::InvalidInput(_) | AppError::Schema(_) => Some(err.to_string()),
        _ => None,
    }
}

pub async fn edit_submit(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    AdminUser(user): AdminUser,
    payload: Result<ItemPayload, AppError>,
) -> AppResult<Response> {
    let result = match payload {
        Ok(mut payload) => {
            if non_empty(&payload.name).is_none() {
                Err(AppError::InvalidInput("Name is required".to_string()))
            } else if payload.category_id.is_none() {
                Err(AppError::InvalidInput("Category is required".to_string()))
            } else {
                // The form always submits the full link list.
                payload.urls.get_or_insert_with(Vec::new);
                update_from_payload(&state, item_id, &payload).await
            }
        }
        Err(e) => Err(e),
    };

    let err = match result {
        Ok(()) => {
            tracing::info!("Item {} updated from the edit form by {}", item_id, user.username);
            return Ok(Redirect::to(EDIT_SUCCESS_REDIRECT).into_response());
        }
        Err(AppError::NotFound(_)) => return Ok(not_found("Item not found")),
        Err(e) => e,
    };

    let Some(message) = form_error(&err) else {
        return Err(err);
    };
    tracing::warn!("Edit item {} failed: {}", item_id, message);
    match render_edit(&state, item_id, Some(&message), &user).await? {
        Some(html) => Ok((StatusCode::BAD_REQUEST, Html(html)).into_response()),
        None => Ok(not_found("Item not found")),
    }
}

pub async fn admin(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
) -> AppResult<Html<String>> {
    let categories = db::categories::list_categories(&state.pool).await?;
    Ok(Html(views::admin::admin_page(&categories, &user)))
}

pub async fn uploaded_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> AppResult<Response> {
    match state.storage.download(&filename).await {
        Ok(data) => Ok(([(header::CONTENT_TYPE, content_type_for(&filename))], data).into_response()),
        Err(AppError::NotFound(_)) | Err(AppError::InvalidInput(_)) => Ok(not_found("File not found")),
        Err(e) => Err(e),
    }
}

pub async fn fallback() -> Response {
    not_found("The requested page does not exist")
}
