// Photo storage: local directory or Cloudflare R2

pub mod local;
pub mod r2;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

pub use local::LocalBackend;
pub use r2::R2Backend;

use crate::error::AppResult;

/// Photo extensions accepted on upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

/// Anything outside this set is replaced in stored file names.
static RE_UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Storage backend shared by the local and R2 implementations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stores `data` under `key` and returns a backend-specific location.
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> AppResult<String>;

    async fn download(&self, key: &str) -> AppResult<Vec<u8>>;

    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Directory or bucket name, for logging.
    fn bucket(&self) -> &str;
}

/// Lower-cased extension of `filename` if it is an accepted photo type.
pub fn allowed_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Storage key for an uploaded photo: `item_<id>_<8 hex>_<sanitised name>`.
/// Returns `None` when the extension is not accepted.
pub fn photo_key(item_id: i64, original_name: &str) -> Option<String> {
    allowed_extension(original_name)?;
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let safe = RE_UNSAFE_CHARS.replace_all(base, "_");
    let safe = safe.trim_start_matches('.');
    let token = uuid::Uuid::new_v4().simple().to_string();
    Some(format!("item_{}_{}_{}", item_id, &token[..8], safe))
}

pub fn content_type_for(filename: &str) -> &'static str {
    match allowed_extension(filename).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
