use sqlx::{PgConnection, PgPool};

use crate::models::UserModel;

const USER_SELECT: &str =
    "SELECT id, username, email, password_hash, is_admin, created_at FROM users";

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<UserModel>, sqlx::Error> {
    sqlx::query_as(&format!("{} WHERE id = $1", USER_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_username(pool: &PgPool, username: &str) -> Result<Option<UserModel>, sqlx::Error> {
    sqlx::query_as(&format!("{} WHERE username = $1", USER_SELECT))
        .bind(username)
        .fetch_optional(pool)
        .await
}

pub async fn list_users(pool: &PgPool) -> Result<Vec<UserModel>, sqlx::Error> {
    sqlx::query_as(&format!("{} ORDER BY id", USER_SELECT))
        .fetch_all(pool)
        .await
}

pub async fn count_users(conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(conn)
        .await
}

/// Locks every admin row until the transaction ends and returns how many
/// there are. Take this before locking a single user row.
pub async fn lock_admins(conn: &mut PgConnection) -> Result<usize, sqlx::Error> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM users WHERE is_admin ORDER BY id FOR UPDATE")
        .fetch_all(conn)
        .await?;
    Ok(ids.len())
}

pub async fn username_taken(
    conn: &mut PgConnection,
    username: &str,
    exclude_id: Option<i64>,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 AND ($2::bigint IS NULL OR id <> $2))",
    )
    .bind(username)
    .bind(exclude_id)
    .fetch_one(conn)
    .await
}

pub async fn email_taken(
    conn: &mut PgConnection,
    email: &str,
    exclude_id: Option<i64>,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 AND ($2::bigint IS NULL OR id <> $2))",
    )
    .bind(email)
    .bind(exclude_id)
    .fetch_one(conn)
    .await
}

pub async fn insert_user(
    conn: &mut PgConnection,
    username: &str,
    email: &str,
    password_hash: &str,
    is_admin: bool,
) -> Result<UserModel, sqlx::Error> {
    sqlx::query_as(
        "INSERT INTO users (username, email, password_hash, is_admin) VALUES ($1, $2, $3, $4) \
         RETURNING id, username, email, password_hash, is_admin, created_at",
    )
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(is_admin)
    .fetch_one(conn)
    .await
}

#[derive(Debug, Default, Clone)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub is_admin: Option<bool>,
}

pub async fn update_user(
    conn: &mut PgConnection,
    id: i64,
    changes: &UserChanges,
) -> Result<Option<UserModel>, sqlx::Error> {
    sqlx::query_as(
        "UPDATE users SET \
           username = COALESCE($1, username), \
           email = COALESCE($2, email), \
           password_hash = COALESCE($3, password_hash), \
           is_admin = COALESCE($4, is_admin) \
         WHERE id = $5 \
         RETURNING id, username, email, password_hash, is_admin, created_at",
    )
    .bind(changes.username.as_deref())
    .bind(changes.email.as_deref())
    .bind(changes.password_hash.as_deref())
    .bind(changes.is_admin)
    .bind(id)
    .fetch_optional(conn)
    .await
}

pub async fn delete_user(conn: &mut PgConnection, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
