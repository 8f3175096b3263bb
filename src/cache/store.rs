use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Key and size of one persisted object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: u64,
}

/// Durable key/value storage behind the in-process cache.
///
/// Keys look like `<namespace>/<hash>`. Implementations must tolerate
/// concurrent readers and writers of different keys.
#[async_trait]
pub trait PersistedStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// All objects under a namespace prefix
    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>>;

    fn backend_name(&self) -> &'static str;
}

/// One JSON file per entry under `<root>/<namespace>/`
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            AppError::CacheIo(format!("Failed to create cache dir {}: {}", root.display(), e))
        })?;
        Ok(FsStore { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let (prefix, name) = key
            .split_once('/')
            .ok_or_else(|| AppError::CacheIo(format!("Malformed cache key: {}", key)))?;
        if prefix.is_empty() || name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(AppError::CacheIo(format!("Malformed cache key: {}", key)));
        }
        Ok(self.root.join(prefix).join(format!("{}.json", name)))
    }
}

#[async_trait]
impl PersistedStore for FsStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::CacheIo(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                AppError::CacheIo(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        // Write then rename so a reader never sees a half-written entry
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| AppError::CacheIo(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            AppError::CacheIo(format!("Failed to move {} into place: {}", path.display(), e))
        })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::CacheIo(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let dir = self.root.join(prefix);
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::CacheIo(format!(
                    "Failed to list {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut objects = Vec::new();
        while let Some(item) = read_dir
            .next_entry()
            .await
            .map_err(|e| AppError::CacheIo(format!("Failed to list {}: {}", dir.display(), e)))?
        {
            let file_name = item.file_name();
            let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            let size_bytes = match item.metadata().await {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => continue,
            };
            objects.push(StoredObject {
                key: format!("{}/{}", prefix, name),
                size_bytes,
            });
        }
        Ok(objects)
    }

    fn backend_name(&self) -> &'static str {
        "disk"
    }
}
