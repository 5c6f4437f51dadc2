use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, Validation};
use sqlx::PgPool;
use tower::{Layer, Service};

use crate::db;
use crate::error::AppError;
use crate::services::auth_service::{verify_password, Claims};

/// Authenticated user info injected by the auth middleware into request extensions.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
}

/// Why a request carries no `AuthenticatedUser`.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthRejection(pub String);

pub const MISSING_CREDENTIALS: &str = "Token is missing";

#[derive(Clone)]
pub struct AuthLayer {
    pool: PgPool,
    jwt_secret: String,
}

impl AuthLayer {
    pub fn new(pool: PgPool, jwt_secret: String) -> Self {
        Self { pool, jwt_secret }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            pool: self.pool.clone(),
            jwt_secret: self.jwt_secret.clone(),
        }
    }
}

/// Resolves the caller from the `Authorization` header. Never rejects a
/// request itself; handlers decide through [`CurrentUser`] and [`AdminUser`].
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    pool: PgPool,
    jwt_secret: String,
}

impl<S> Service<Request> for AuthMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);

        let pool = self.pool.clone();
        let jwt_secret = self.jwt_secret.clone();

        Box::pin(async move {
            match resolve_user(&pool, &jwt_secret, req.headers()).await {
                Ok(user) => {
                    req.extensions_mut().insert(user);
                }
                Err(reason) => {
                    req.extensions_mut().insert(AuthRejection(reason));
                }
            }
            inner.call(req).await
        })
    }
}

enum Credentials {
    Bearer(String),
    Basic { username: String, password: String },
}

fn parse_authorization(headers: &HeaderMap) -> Result<Credentials, String> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    // An empty token or an unknown scheme counts as no credentials at all.
    let (scheme, rest) = value.split_once(' ').unwrap_or((value, ""));
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(MISSING_CREDENTIALS.to_string());
    }

    if scheme.eq_ignore_ascii_case("bearer") {
        return Ok(Credentials::Bearer(rest.to_string()));
    }

    if scheme.eq_ignore_ascii_case("basic") {
        let decoded = STANDARD
            .decode(rest)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| "Invalid credentials".to_string())?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| "Invalid credentials".to_string())?;
        return Ok(Credentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    Err(MISSING_CREDENTIALS.to_string())
}

/// Decodes and validates a token without touching the database.
pub fn decode_token(token: &str, jwt_secret: &str) -> Result<Claims, String> {
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => "Token has expired".to_string(),
        _ => "Invalid token".to_string(),
    })
}

async fn resolve_user(
    pool: &PgPool,
    jwt_secret: &str,
    headers: &HeaderMap,
) -> Result<AuthenticatedUser, String> {
    match parse_authorization(headers)? {
        Credentials::Bearer(token) => {
            let claims = decode_token(&token, jwt_secret)?;
            let user_id: i64 = claims.sub.parse().map_err(|_| "Invalid token".to_string())?;
            let user = db::users::find_by_id(pool, user_id)
                .await
                .map_err(|e| {
                    tracing::error!("User lookup failed during authentication: {}", e);
                    "Authentication unavailable".to_string()
                })?
                .ok_or_else(|| "User not found".to_string())?;
            Ok(AuthenticatedUser {
                user_id: user.id,
                username: user.username,
                is_admin: user.is_admin,
            })
        }
        Credentials::Basic { username, password } => {
            let user = db::users::find_by_username(pool, &username)
                .await
                .map_err(|e| {
                    tracing::error!("User lookup failed during authentication: {}", e);
                    "Authentication unavailable".to_string()
                })?
                .ok_or_else(|| "Invalid credentials".to_string())?;
            if !verify_password(&password, &user.password_hash) {
                tracing::warn!("Basic authentication failed for user {}", username);
                return Err("Invalid credentials".to_string());
            }
            Ok(AuthenticatedUser {
                user_id: user.id,
                username: user.username,
                is_admin: user.is_admin,
            })
        }
    }
}

fn authenticated_user(parts: &Parts) -> Result<AuthenticatedUser, AppError> {
    if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
        return Ok(user.clone());
    }
    let reason = parts
        .extensions
        .get::<AuthRejection>()
        .map(|r| r.0.clone())
        .unwrap_or_else(|| MISSING_CREDENTIALS.to_string());
    Err(AppError::Unauthenticated(reason))
}

/// Any signed-in user.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthenticatedUser);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        authenticated_user(parts).map(CurrentUser)
    }
}

/// A signed-in user with the admin flag.
#[derive(Clone, Debug)]
pub struct AdminUser(pub AuthenticatedUser);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = authenticated_user(parts)?;
        if !user.is_admin {
            tracing::warn!("User {} denied admin access to {}", user.username, parts.uri.path());
            return Err(AppError::PermissionDenied("Admin privileges required".to_string()));
        }
        Ok(AdminUser(user))
    }
}

/// The signed-in user if there is one; never rejects.
#[derive(Clone, Debug)]
pub struct OptionalUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for OptionalUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalUser(parts.extensions.get::<AuthenticatedUser>().cloned()))
    }
}
