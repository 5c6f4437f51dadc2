use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::Region;

use crate::config::R2Config;
use crate::error::{AppError, AppResult};

use super::StorageBackend;

/// Photos kept in a Cloudflare R2 bucket under their storage key.
pub struct R2Backend {
    bucket: Box<Bucket>,
    name: String,
}

/// Maps an R2 response status to the error for `action` on `key`.
/// Responses are not turned into errors by the client, so every call checks.
fn check_status(action: &str, key: &str, status: u16) -> AppResult<()> {
    match status {
        200..=299 => Ok(()),
        404 => Err(AppError::NotFound(format!("File not found: {}", key))),
        other => Err(AppError::Storage(format!(
            "R2 {} of {} returned HTTP {}",
            action, key, other
        ))),
    }
}

impl R2Backend {
    pub fn new(config: &R2Config) -> AppResult<Self> {
        let endpoint = format!("https://{}.r2.cloudflarestorage.com", config.account_id);
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| AppError::Storage(format!("invalid R2 credentials: {}", e)))?;

        let bucket = Bucket::new(
            &config.bucket,
            Region::Custom {
                region: "auto".to_string(),
                endpoint,
            },
            credentials,
        )
        .map_err(|e| AppError::Storage(format!("cannot open R2 bucket {}: {}", config.bucket, e)))?;

        Ok(Self {
            bucket,
            name: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl StorageBackend for R2Backend {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> AppResult<String> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(|e| AppError::Storage(format!("R2 upload of {} failed: {}", key, e)))?;
        check_status("upload", key, response.status_code())?;

        tracing::info!("Stored photo {} in R2 bucket {} ({} bytes)", key, self.name, data.len());
        Ok(format!("r2://{}/{}", self.name, key))
    }

    async fn download(&self, key: &str) -> AppResult<Vec<u8>> {
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| AppError::Storage(format!("R2 download of {} failed: {}", key, e)))?;
        check_status("download", key, response.status_code())?;

        Ok(response.bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let response = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| AppError::Storage(format!("R2 delete of {} failed: {}", key, e)))?;
        check_status("delete", key, response.status_code())?;

        tracing::info!("Removed photo {} from R2 bucket {}", key, self.name);
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.name
    }
}
