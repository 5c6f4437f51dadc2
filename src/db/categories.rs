use std::collections::HashMap;

use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor, PgPool};

use crate::models::{Category, CategoryRow, SpecificationRow};
use crate::schema::{migrate_legacy_text, FieldKind, SpecificationField};

/// Name of the category created for an empty catalog.
pub const DEFAULT_CATEGORY_NAME: &str = "Uncategorized";

const CATEGORY_SELECT: &str = "SELECT c.id, c.name, c.created_at, \
     (SELECT COUNT(*) FROM items i WHERE i.category_id = c.id) AS item_count \
     FROM categories c";

const FIELD_SELECT: &str = "SELECT id, category_id, key, label, type, placeholder, display_order, \
     options, min_value, max_value, step_value \
     FROM category_specifications";

pub async fn list_categories(pool: &PgPool) -> Result<Vec<Category>, sqlx::Error> {
    let rows: Vec<CategoryRow> =
        sqlx::query_as(&format!("{} ORDER BY c.name ASC", CATEGORY_SELECT))
            .fetch_all(pool)
            .await?;

    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut fields = load_fields_for(pool, &ids).await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let own = fields.remove(&row.id).unwrap_or_default();
            Category::from_row(row, own)
        })
        .collect())
}

pub async fn get_category(pool: &PgPool, id: i64) -> Result<Option<Category>, sqlx::Error> {
    let row: Option<CategoryRow> =
        sqlx::query_as(&format!("{} WHERE c.id = $1", CATEGORY_SELECT))
            .bind(id)
            .fetch_optional(pool)
            .await?;

    match row {
        Some(row) => {
            let fields = load_fields(pool, row.id).await?;
            Ok(Some(Category::from_row(row, fields)))
        }
        None => Ok(None),
    }
}

/// Takes the pool, or the connection of an open transaction.
pub async fn load_fields<'c>(
    executor: impl PgExecutor<'c>,
    category_id: i64,
) -> Result<Vec<SpecificationField>, sqlx::Error> {
    let mut fields = load_fields_for(executor, &[category_id]).await?;
    Ok(fields.remove(&category_id).unwrap_or_default())
}

/// Fields of several categories at once, each list in display order.
pub async fn load_fields_for<'c>(
    executor: impl PgExecutor<'c>,
    category_ids: &[i64],
) -> Result<HashMap<i64, Vec<SpecificationField>>, sqlx::Error> {
    let mut by_category: HashMap<i64, Vec<SpecificationField>> = HashMap::new();
    if category_ids.is_empty() {
        return Ok(by_category);
    }

    let rows: Vec<SpecificationRow> = sqlx::query_as(&format!(
        "{} WHERE category_id = ANY($1) ORDER BY category_id, display_order, id",
        FIELD_SELECT
    ))
    .bind(category_ids)
    .fetch_all(executor)
    .await?;

    for row in rows {
        by_category
            .entry(row.category_id)
            .or_default()
            .push(row.into_field());
    }
    Ok(by_category)
}

pub async fn exists(conn: &mut PgConnection, id: i64) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categories WHERE id = $1)")
        .bind(id)
        .fetch_one(conn)
        .await
}

/// Whether another category already uses `name`.
pub async fn name_taken(
    conn: &mut PgConnection,
    name: &str,
    exclude_id: Option<i64>,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM categories WHERE name = $1 AND ($2::bigint IS NULL OR id <> $2))",
    )
    .bind(name)
    .bind(exclude_id)
    .fetch_one(conn)
    .await
}

pub async fn insert_category(conn: &mut PgConnection, name: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("INSERT INTO categories (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(conn)
        .await
}

pub async fn rename_category(conn: &mut PgConnection, id: i64, name: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE categories SET name = $1 WHERE id = $2")
        .bind(name)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Replaces a category's fields. `document` is the schema text as received
/// and is stored in the legacy column when given.
pub async fn replace_fields(
    conn: &mut PgConnection,
    category_id: i64,
    fields: &[SpecificationField],
    document: Option<&str>,
) -> Result<(), sqlx::Error> {
    if let Some(document) = document {
        sqlx::query("UPDATE categories SET specifications_schema = $1 WHERE id = $2")
            .bind(document)
            .bind(category_id)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query("DELETE FROM category_specifications WHERE category_id = $1")
        .bind(category_id)
        .execute(&mut *conn)
        .await?;

    for field in fields {
        let (min, max, step, options) = match &field.kind {
            FieldKind::Text => (None, None, None, None),
            FieldKind::Number { min, max, step } => (*min, *max, Some(*step), None),
            FieldKind::Select { options } => (None, None, None, Some(Json(options))),
        };

        sqlx::query(
            "INSERT INTO category_specifications \
             (category_id, key, label, type, placeholder, display_order, options, min_value, max_value, step_value) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, 1))",
        )
        .bind(category_id)
        .bind(&field.key)
        .bind(&field.label)
        .bind(field.type_name())
        .bind(&field.placeholder)
        .bind(field.display_order)
        .bind(options)
        .bind(min)
        .bind(max)
        .bind(step)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn count_items(conn: &mut PgConnection, category_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE category_id = $1")
        .bind(category_id)
        .fetch_one(conn)
        .await
}

pub async fn delete_category(conn: &mut PgConnection, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM categories WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Inserts the default category when the catalog has none. Returns whether
/// a row was created.
pub async fn ensure_default_category(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO categories (name) SELECT $1 WHERE NOT EXISTS (SELECT 1 FROM categories)",
    )
    .bind(DEFAULT_CATEGORY_NAME)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MigrationReport {
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Builds field rows from the legacy `specifications_schema` column for every
/// category that has none yet. Each category migrates in its own transaction.
pub async fn migrate_legacy_schemas(pool: &PgPool) -> Result<MigrationReport, sqlx::Error> {
    let pending: Vec<(i64, String, String)> = sqlx::query_as(
        "SELECT c.id, c.name, c.specifications_schema FROM categories c \
         WHERE c.specifications_schema IS NOT NULL \
           AND NOT EXISTS (SELECT 1 FROM category_specifications s WHERE s.category_id = c.id) \
         ORDER BY c.id",
    )
    .fetch_all(pool)
    .await?;

    let mut report = MigrationReport::default();
    for (id, name, text) in pending {
        let fields = match migrate_legacy_text(&text) {
            Ok(Some(fields)) => fields,
            Ok(None) => {
                report.skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!("Skipping category {} '{}': {}", id, name, e);
                report.failed += 1;
                continue;
            }
        };

        let mut tx = pool.begin().await?;
        replace_fields(&mut *tx, id, &fields, None).await?;
        tx.commit().await?;

        tracing::info!(
            "Migrated {} specifications for category {} '{}'",
            fields.len(),
            id,
            name
        );
        report.migrated += 1;
    }
    Ok(report)
}
