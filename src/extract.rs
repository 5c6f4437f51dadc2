use axum::extract::FromRequest;

use crate::error::AppError;

/// `axum::Json` with rejections reported in the API error shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

/// Trimmed, non-empty value of an optional text member.
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
