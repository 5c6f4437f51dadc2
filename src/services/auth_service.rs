use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::config::AdminBootstrap;
use crate::db;
use crate::error::{unique_violation, AppError, AppResult};
use crate::extract::{non_empty, JsonBody};
use crate::middleware::{AdminUser, CurrentUser};
use crate::models::{UserModel, UserResponse};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub is_admin: bool,
    pub exp: i64,
    pub iat: i64,
}

pub fn issue_jwt(user: &UserModel, jwt_secret: &str, ttl_hours: i64) -> AppResult<(String, chrono::DateTime<Utc>)> {
    let now = Utc::now();
    let exp = now + chrono::Duration::hours(ttl_hours);
    let claims = Claims {
        sub: user.id.to_string(),
        username: user.username.clone(),
        is_admin: user.is_admin,
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("JWT error: {}", e)))?;
    Ok((token, exp))
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("Password hash error: {}", e)))
}

/// False for a wrong password and for an unparseable stored hash.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => {
            tracing::error!("Stored password hash is not a valid PHC string");
            false
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub is_admin: Option<bool>,
}

/// Inserts a user after checking that username and email are free.
async fn create_user(
    pool: &PgPool,
    username: &str,
    email: &str,
    password: &str,
    is_admin: bool,
) -> AppResult<UserModel> {
    let password_hash = hash_password(password)?;
    let mut tx = pool.begin().await?;

    if db::users::username_taken(&mut *tx, username, None).await? {
        return Err(AppError::Conflict("Username already exists".to_string()));
    }
    if db::users::email_taken(&mut *tx, email, None).await? {
        return Err(AppError::Conflict("Email already exists".to_string()));
    }

    // The first account always administers the catalog.
    let is_admin = is_admin || db::users::count_users(&mut *tx).await? == 0;

    let user = db::users::insert_user(&mut *tx, username, email, &password_hash, is_admin)
        .await
        .map_err(|e| unique_violation(e, "Username or email already exists"))?;
    tx.commit().await?;
    Ok(user)
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let (Some(username), Some(email), Some(password)) = (
        non_empty(&req.username),
        non_empty(&req.email),
        req.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::InvalidInput("Missing required fields".to_string()));
    };

    let user = create_user(&state.pool, username, email, password, false).await?;
    tracing::info!("Registered user {} (id={}, admin={})", user.username, user.id, user.is_admin);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User registered successfully", "user": UserResponse::from(&user) })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let (Some(username), Some(password)) = (non_empty(&req.username), req.password.as_deref())
    else {
        return Err(AppError::InvalidInput("Missing username or password".to_string()));
    };

    let user = db::users::find_by_username(&state.pool, username).await?;
    let user = match user {
        Some(user) if verify_password(password, &user.password_hash) => user,
        _ => {
            tracing::warn!("Failed login for {}", username);
            return Err(AppError::Unauthenticated("Invalid username or password".to_string()));
        }
    };

    let (token, exp) = issue_jwt(&user, &state.jwt_secret, state.token_ttl_hours)?;
    tracing::info!("User {} logged in", user.username);

    Ok(Json(LoginResponse {
        token,
        expires_at: exp.to_rfc3339(),
        user: UserResponse::from(&user),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
) -> AppResult<Json<UserResponse>> {
    let user = db::users::find_by_id(&state.pool, current.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("User not found".to_string()))?;
    Ok(Json(UserResponse::from(&user)))
}

pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    let users = db::users::list_users(&state.pool).await?;
    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    _admin: AdminUser,
) -> AppResult<Json<UserResponse>> {
    let user = db::users::find_by_id(&state.pool, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(Json(UserResponse::from(&user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    _admin: AdminUser,
    JsonBody(req): JsonBody<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    let mut tx = state.pool.begin().await?;
    let admins = db::users::lock_admins(&mut *tx).await?;

    let user: UserModel = sqlx::query_as(
        "SELECT id, username, email, password_hash, is_admin, created_at FROM users WHERE id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if user.is_admin && req.is_admin == Some(false) && admins <= 1 {
        return Err(AppError::InvalidInput("Cannot remove the last admin user".to_string()));
    }

    let mut changes = db::users::UserChanges {
        is_admin: req.is_admin,
        ..Default::default()
    };

    if let Some(username) = non_empty(&req.username).filter(|u| *u != user.username) {
        if db::users::username_taken(&mut *tx, username, Some(user_id)).await? {
            return Err(AppError::Conflict("Username already exists".to_string()));
        }
        changes.username = Some(username.to_string());
    }
    if let Some(email) = non_empty(&req.email).filter(|e| *e != user.email) {
        if db::users::email_taken(&mut *tx, email, Some(user_id)).await? {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }
        changes.email = Some(email.to_string());
    }
    if let Some(password) = req.password.as_deref().filter(|p| !p.is_empty()) {
        changes.password_hash = Some(hash_password(password)?);
    }

    let updated = db::users::update_user(&mut *tx, user_id, &changes)
        .await
        .map_err(|e| unique_violation(e, "Username or email already exists"))?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    tx.commit().await?;

    tracing::info!("User {} updated", updated.id);
    Ok(Json(UserResponse::from(&updated)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    AdminUser(admin): AdminUser,
) -> AppResult<Json<Value>> {
    if admin.user_id == user_id {
        return Err(AppError::InvalidInput("Cannot delete your own account".to_string()));
    }

    let mut tx = state.pool.begin().await?;
    let admins = db::users::lock_admins(&mut *tx).await?;
    let is_admin: bool = sqlx::query_scalar("SELECT is_admin FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if is_admin && admins <= 1 {
        return Err(AppError::InvalidInput("Cannot delete the last admin user".to_string()));
    }

    db::users::delete_user(&mut *tx, user_id).await?;
    tx.commit().await?;

    tracing::info!("User {} deleted by {}", user_id, admin.username);
    Ok(Json(json!({ "message": "User deleted successfully" })))
}

/// Creates the first admin account; refused once any admin exists.
pub async fn init_admin(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let has_admin: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE is_admin)")
        .fetch_one(&state.pool)
        .await?;
    if has_admin {
        return Err(AppError::InvalidInput("Admin user already exists".to_string()));
    }

    let (Some(username), Some(email), Some(password)) = (
        non_empty(&req.username),
        non_empty(&req.email),
        req.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::InvalidInput(
            "Missing required fields (username, password, email)".to_string(),
        ));
    };

    let user = create_user(&state.pool, username, email, password, true).await?;
    tracing::info!("Initial admin {} created", user.username);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Admin user created successfully", "user": UserResponse::from(&user) })),
    ))
}

/// Creates an admin account from configuration when there are no users.
pub async fn bootstrap_admin(pool: &PgPool, admin: &AdminBootstrap) -> AppResult<Option<UserModel>> {
    let mut conn = pool.acquire().await?;
    if db::users::count_users(&mut *conn).await? > 0 {
        return Ok(None);
    }
    drop(conn);

    tracing::warn!(
        "No users found; creating admin '{}' from configuration",
        admin.username
    );
    let user = create_user(pool, &admin.username, &admin.email, &admin.password, true).await?;
    Ok(Some(user))
}

/// Creates an admin account, used by the command line.
pub async fn create_admin(pool: &PgPool, username: &str, email: &str, password: &str) -> AppResult<UserModel> {
    if username.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
        return Err(AppError::InvalidInput("username, email and password are required".to_string()));
    }
    create_user(pool, username.trim(), email.trim(), password, true).await
}
