use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Tables in dependency order, children first.
const TABLES: &[&str] = &[
    "item_urls",
    "item_photos",
    "items",
    "category_specifications",
    "categories",
    "users",
    "_sqlx_migrations",
];

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

/// Drops every catalog table, including the migration ledger.
pub async fn drop_all(pool: &PgPool) -> Result<(), sqlx::Error> {
    for table in TABLES {
        tracing::warn!("Dropping table {}", table);
        sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", table))
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// True when the catalog tables exist.
pub async fn is_initialized(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let exists: Option<String> = sqlx::query_scalar("SELECT to_regclass('public.categories')::text")
        .fetch_one(pool)
        .await?;
    Ok(exists.is_some())
}

/// Row counts of the catalog tables, for `check-db`.
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(&'static str, i64)>, sqlx::Error> {
    let mut counts = Vec::new();
    for table in TABLES.iter().filter(|t| !t.starts_with('_')) {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await?;
        counts.push((*table, count));
    }
    Ok(counts)
}
