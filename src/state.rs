use std::sync::Arc;

use sqlx::PgPool;

use crate::storage::StorageBackend;

/// Shared handles passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub storage: Arc<dyn StorageBackend>,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        storage: Arc<dyn StorageBackend>,
        jwt_secret: String,
        token_ttl_hours: i64,
    ) -> Self {
        Self {
            pool,
            storage,
            jwt_secret,
            token_ttl_hours,
        }
    }
}
