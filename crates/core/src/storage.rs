//! Object Storage
//!
//! Assets are addressed by `scheme://bucket/key` paths. Two stores are
//! provided: a filesystem-backed one for real deployments and an in-memory
//! one for tests and ephemeral runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage path '{0}'")]
    InvalidPath(String),
    #[error("path points to bucket '{found}', this store serves '{expected}'")]
    WrongBucket { expected: String, found: String },
    #[error("no object stored at '{0}'")]
    NotFound(String),
}

/// A parsed `scheme://bucket/key` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl StoragePath {
    pub fn parse(path: &str) -> Result<Self, StorageError> {
        let invalid = || StorageError::InvalidPath(path.to_string());
        let (scheme, rest) = path.split_once("://").ok_or_else(invalid)?;
        let (bucket, key) = rest.split_once('/').ok_or_else(invalid)?;
        if scheme.is_empty() || bucket.is_empty() {
            return Err(invalid());
        }
        validate_key(key).map_err(|_| invalid())?;
        Ok(Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl std::fmt::Display for StoragePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        Err(StorageError::InvalidPath(key.to_string()))
    } else {
        Ok(())
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `data` under `key` and returns the object's full path.
    async fn put(&self, data: Bytes, key: &str) -> Result<String>;

    /// Reads the object at `path`.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Uploads a local file under `key`.
    async fn upload_file(&self, file: &Path, key: &str) -> Result<String> {
        let data = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read '{}' for upload", file.display()))?;
        self.put(Bytes::from(data), key).await
    }
}

/// Stores objects as files under `root/bucket/key`.
pub struct LocalObjectStore {
    root: PathBuf,
    bucket: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let parsed = StoragePath::parse(path)?;
        if parsed.scheme != "file" {
            return Err(StorageError::InvalidPath(path.to_string()).into());
        }
        if parsed.bucket != self.bucket {
            return Err(StorageError::WrongBucket {
                expected: self.bucket.clone(),
                found: parsed.bucket,
            }
            .into());
        }
        Ok(self.root.join(&self.bucket).join(parsed.key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, data: Bytes, key: &str) -> Result<String> {
        validate_key(key)?;
        let target = self.root.join(&self.bucket).join(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create '{}'", parent.display()))?;
        }
        tokio::fs::write(&target, &data)
            .await
            .with_context(|| format!("Failed to write '{}'", target.display()))?;
        let path = format!("file://{}/{}", self.bucket, key);
        info!(%path, bytes = data.len(), "Stored object");
        Ok(path)
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()).into())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read '{}'", file.display())),
        }
    }
}

/// Keeps objects in memory under `mem://bucket/key` paths.
pub struct MemoryObjectStore {
    bucket: String,
    objects: RwLock<HashMap<String, Bytes>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, data: Bytes, key: &str) -> Result<String> {
        validate_key(key)?;
        let path = format!("mem://{}/{}", self.bucket, key);
        self.objects.write().await.insert(path.clone(), data);
        Ok(path)
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        StoragePath::parse(path)?;
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_rejects_paths() {
        let path = StoragePath::parse("file://assets/images/cat.png").unwrap();
        assert_eq!(path.bucket, "assets");
        assert_eq!(path.key, "images/cat.png");
        assert_eq!(path.to_string(), "file://assets/images/cat.png");

        for bad in [
            "assets/cat.png",
            "file://assets",
            "file:///cat.png",
            "file://assets/../etc/passwd",
        ] {
            assert!(StoragePath::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn local_store_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "parlare");

        let path = store.put(Bytes::from_static(b"\x89PNG"), "images/cat.png").await.unwrap();
        assert_eq!(path, "file://parlare/images/cat.png");
        assert!(dir.path().join("parlare/images/cat.png").is_file());
        assert_eq!(store.get(&path).await.unwrap(), Bytes::from_static(b"\x89PNG"));
    }

    #[tokio::test]
    async fn local_store_rejects_foreign_buckets_and_missing_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "parlare");

        let err = store.get("file://other/images/cat.png").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::WrongBucket { .. })
        ));

        let err = store.get("file://parlare/images/none.png").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::NotFound(_))
        ));

        assert!(store.put(Bytes::new(), "../escape.png").await.is_err());
    }

    #[tokio::test]
    async fn memory_store_round_trips_and_uploads_files() {
        let store = MemoryObjectStore::new("test");
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp3");
        std::fs::write(&file, b"ID3").unwrap();

        let path = store.upload_file(&file, "audio/clip.mp3").await.unwrap();
        assert_eq!(path, "mem://test/audio/clip.mp3");
        assert_eq!(store.get(&path).await.unwrap(), Bytes::from_static(b"ID3"));
        assert_eq!(store.len().await, 1);
    }
}
