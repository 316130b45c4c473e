//! File system storage backend
//!
//! One file per key: `<data_dir>/<key>.<extension>`. Writes go to a temporary
//! file in the same directory and are renamed into place, so a reader never
//! observes a half-written payload.

use super::{validate_key, StorageBackend, StorageError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Storage rooted at a data directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    extension: String,
}

impl FileStorage {
    /// Create a store rooted at `root`, storing `<key>.json` files
    ///
    /// The directory is created lazily on first write.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self::with_extension(root, "json")
    }

    /// Create a store with a custom file extension (without the leading dot)
    pub fn with_extension<P: AsRef<Path>>(root: P, extension: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    /// Directory holding the payload files
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the payload file for `key`
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        let file_name = if self.extension.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", key, self.extension)
        };
        Ok(self.root.join(file_name))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, payload: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.root).await?;

        let tmp_path = self
            .root
            .join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));
        fs::write(&tmp_path, payload).await?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(key = %key, path = %path.display(), bytes = payload.len(), "Wrote payload file");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
