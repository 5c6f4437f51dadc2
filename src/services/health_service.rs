use axum::Json;
use serde_json::{json, Value};

/// Liveness probe; does not touch the database.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "serving" }))
}
