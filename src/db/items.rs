use std::collections::HashMap;

use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use crate::db::categories::load_fields_for;
use crate::models::{ItemDetail, ItemRow, PhotoModel, UrlModel};
use crate::schema::SpecificationValues;

const ITEM_SELECT: &str = "SELECT i.id, i.category_id, c.name AS category_name, i.name, \
     i.specification_values, i.created_at, i.updated_at \
     FROM items i JOIN categories c ON c.id = i.category_id";

#[derive(Debug, Default, Clone)]
pub struct ItemFilter {
    pub category_id: Option<i64>,
    pub search: Option<String>,
}

/// `%term%` for ILIKE, with the pattern metacharacters in `term` escaped.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

pub async fn list_items(pool: &PgPool, filter: &ItemFilter) -> Result<Vec<ItemDetail>, sqlx::Error> {
    let pattern = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(like_pattern);

    let rows: Vec<ItemRow> = sqlx::query_as(&format!(
        "{} WHERE ($1::bigint IS NULL OR i.category_id = $1) \
           AND ($2::text IS NULL \
                OR i.name ILIKE $2 \
                OR i.specification_values->>'brand' ILIKE $2 \
                OR i.specification_values->>'description' ILIKE $2) \
         ORDER BY i.name ASC, i.id ASC",
        ITEM_SELECT
    ))
    .bind(filter.category_id)
    .bind(pattern)
    .fetch_all(pool)
    .await?;

    attach_children(pool, rows).await
}

pub async fn get_item(pool: &PgPool, id: i64) -> Result<Option<ItemDetail>, sqlx::Error> {
    let row: Option<ItemRow> = sqlx::query_as(&format!("{} WHERE i.id = $1", ITEM_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(attach_children(pool, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

/// Loads photos, URLs and category fields for a batch of items.
async fn attach_children(pool: &PgPool, rows: Vec<ItemRow>) -> Result<Vec<ItemDetail>, sqlx::Error> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let item_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut category_ids: Vec<i64> = rows.iter().map(|r| r.category_id).collect();
    category_ids.sort_unstable();
    category_ids.dedup();

    let photos: Vec<PhotoModel> = sqlx::query_as(
        "SELECT id, item_id, file_path, filename, is_primary FROM item_photos \
         WHERE item_id = ANY($1) ORDER BY item_id, id",
    )
    .bind(&item_ids)
    .fetch_all(pool)
    .await?;

    let urls: Vec<UrlModel> = sqlx::query_as(
        "SELECT id, item_id, url FROM item_urls WHERE item_id = ANY($1) ORDER BY item_id, id",
    )
    .bind(&item_ids)
    .fetch_all(pool)
    .await?;

    let fields = load_fields_for(pool, &category_ids).await?;

    let mut photos_by_item: HashMap<i64, Vec<PhotoModel>> = HashMap::new();
    for photo in photos {
        photos_by_item.entry(photo.item_id).or_default().push(photo);
    }
    let mut urls_by_item: HashMap<i64, Vec<UrlModel>> = HashMap::new();
    for url in urls {
        urls_by_item.entry(url.item_id).or_default().push(url);
    }

    Ok(rows
        .into_iter()
        .map(|item| ItemDetail {
            fields: fields.get(&item.category_id).cloned().unwrap_or_default(),
            photos: photos_by_item.remove(&item.id).unwrap_or_default(),
            urls: urls_by_item.remove(&item.id).unwrap_or_default(),
            item,
        })
        .collect())
}

pub async fn exists(conn: &mut PgConnection, id: i64) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM items WHERE id = $1)")
        .bind(id)
        .fetch_one(conn)
        .await
}

pub async fn insert_item(
    conn: &mut PgConnection,
    category_id: i64,
    name: &str,
    values: &SpecificationValues,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "INSERT INTO items (category_id, name, specification_values) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(category_id)
    .bind(name)
    .bind(Json(values))
    .fetch_one(conn)
    .await
}

/// Changes only the members that are `Some`.
pub async fn update_item(
    conn: &mut PgConnection,
    id: i64,
    category_id: Option<i64>,
    name: Option<&str>,
    values: Option<&SpecificationValues>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE items SET \
           category_id = COALESCE($1, category_id), \
           name = COALESCE($2, name), \
           specification_values = COALESCE($3, specification_values), \
           updated_at = NOW() \
         WHERE id = $4",
    )
    .bind(category_id)
    .bind(name)
    .bind(values.map(Json))
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Locks the item row for the rest of the transaction and returns its
/// category and stored values.
pub async fn lock_item(
    conn: &mut PgConnection,
    id: i64,
) -> Result<Option<(i64, SpecificationValues)>, sqlx::Error> {
    let row: Option<(i64, Json<SpecificationValues>)> = sqlx::query_as(
        "SELECT category_id, specification_values FROM items WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|(category_id, values)| (category_id, values.0)))
}

/// Deletes the item (photos and URLs cascade) and returns the storage keys of
/// its photos, or `None` if the item did not exist.
pub async fn delete_item(conn: &mut PgConnection, id: i64) -> Result<Option<Vec<String>>, sqlx::Error> {
    let paths: Vec<String> =
        sqlx::query_scalar("SELECT file_path FROM item_photos WHERE item_id = $1 ORDER BY id")
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;

    let result = sqlx::query("DELETE FROM items WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    Ok(Some(paths))
}

pub async fn replace_urls(conn: &mut PgConnection, item_id: i64, urls: &[String]) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM item_urls WHERE item_id = $1")
        .bind(item_id)
        .execute(&mut *conn)
        .await?;
    for url in urls {
        add_url(&mut *conn, item_id, url).await?;
    }
    Ok(())
}

pub async fn add_url(conn: &mut PgConnection, item_id: i64, url: &str) -> Result<UrlModel, sqlx::Error> {
    sqlx::query_as("INSERT INTO item_urls (item_id, url) VALUES ($1, $2) RETURNING id, item_id, url")
        .bind(item_id)
        .bind(url)
        .fetch_one(conn)
        .await
}

/// Removes a URL only if it belongs to `item_id`.
pub async fn delete_url(conn: &mut PgConnection, item_id: i64, url_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM item_urls WHERE id = $1 AND item_id = $2")
        .bind(url_id)
        .bind(item_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn add_photo(
    conn: &mut PgConnection,
    item_id: i64,
    file_path: &str,
    filename: &str,
) -> Result<PhotoModel, sqlx::Error> {
    sqlx::query_as(
        "INSERT INTO item_photos (item_id, file_path, filename) VALUES ($1, $2, $3) \
         RETURNING id, item_id, file_path, filename, is_primary",
    )
    .bind(item_id)
    .bind(file_path)
    .bind(filename)
    .fetch_one(conn)
    .await
}

/// Removes a photo row belonging to `item_id`, returning its storage key.
pub async fn delete_photo(
    conn: &mut PgConnection,
    item_id: i64,
    photo_id: i64,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("DELETE FROM item_photos WHERE id = $1 AND item_id = $2 RETURNING file_path")
        .bind(photo_id)
        .bind(item_id)
        .fetch_optional(conn)
        .await
}
