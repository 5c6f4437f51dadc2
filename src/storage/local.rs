use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{AppError, AppResult};

use super::StorageBackend;

/// Stores photos as flat files in one directory.
pub struct LocalBackend {
    root: PathBuf,
    root_display: String,
}

impl LocalBackend {
    /// Creates `root` if it does not exist.
    pub async fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| AppError::Storage(format!("cannot create {}: {}", root.display(), e)))?;
        let root_display = root.display().to_string();
        Ok(Self { root, root_display })
    }

    fn path_for(&self, key: &str) -> AppResult<PathBuf> {
        if key.is_empty()
            || key.contains('/')
            || key.contains('\\')
            || key.contains("..")
            || key.starts_with('.')
        {
            return Err(AppError::InvalidInput(format!("Invalid file name: {}", key)));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn upload(&self, key: &str, data: &[u8], _content_type: &str) -> AppResult<String> {
        let path = self.path_for(key)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| AppError::Storage(format!("write {} failed: {}", path.display(), e)))?;

        tracing::info!("Local upload: dir={}, key={}, size={}", self.root_display, key, data.len());
        Ok(path.display().to_string())
    }

    async fn download(&self, key: &str) -> AppResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("File not found: {}", key)))
            }
            Err(e) => Err(AppError::Storage(format!("read {} failed: {}", path.display(), e))),
        }
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Local delete: dir={}, key={}", self.root_display, key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("File not found: {}", key)))
            }
            Err(e) => Err(AppError::Storage(format!("remove {} failed: {}", path.display(), e))),
        }
    }

    fn bucket(&self) -> &str {
        &self.root_display
    }
}
