//! Screenshot artifact persistence.
//!
//! The engine hands captured screenshots to a [`ScreenshotStore`] under a
//! stable identifier and forgets about the bytes; the hosting application
//! resolves identifiers back into artifacts however it likes. A filesystem
//! store and an in-memory store ship with the crate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid artifact identifier \"{0}\"")]
    InvalidId(String),
    #[error("failed to access screenshot {id}: {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Persistence for captured screenshots.
#[async_trait]
pub trait ScreenshotStore: Send + Sync {
    async fn persist(&self, id: &str, bytes: Bytes) -> Result<(), ArtifactError>;
    async fn retrieve(&self, id: &str) -> Result<Option<Bytes>, ArtifactError>;
}

/// Filesystem store writing one file per screenshot under a root directory.
pub struct FsScreenshotStore {
    root: PathBuf,
}

impl FsScreenshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Identifiers name files directly, so they must not traverse.
    fn entry(&self, id: &str) -> Result<PathBuf, ArtifactError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(ArtifactError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl ScreenshotStore for FsScreenshotStore {
    async fn persist(&self, id: &str, bytes: Bytes) -> Result<(), ArtifactError> {
        let path = self.entry(id)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ArtifactError::Io {
                id: id.to_string(),
                source,
            })?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| ArtifactError::Io {
                id: id.to_string(),
                source,
            })?;
        log::debug!("persisted screenshot {} ({} bytes)", id, bytes.len());
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> Result<Option<Bytes>, ArtifactError> {
        let path = self.entry(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArtifactError::Io {
                id: id.to_string(),
                source,
            }),
        }
    }
}

/// In-memory store, for tests and short-lived embedders.
#[derive(Default)]
pub struct MemoryScreenshotStore {
    screenshots: RwLock<HashMap<String, Bytes>>,
}

impl MemoryScreenshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.screenshots.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ScreenshotStore for MemoryScreenshotStore {
    async fn persist(&self, id: &str, bytes: Bytes) -> Result<(), ArtifactError> {
        self.screenshots
            .write()
            .expect("screenshot map poisoned")
            .insert(id.to_string(), bytes);
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> Result<Option<Bytes>, ArtifactError> {
        Ok(self
            .screenshots
            .read()
            .ok()
            .and_then(|map| map.get(id).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!(
            "jdscript-artifacts-{}-{}",
            std::process::id(),
            DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        ))
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryScreenshotStore::new();
        store
            .persist("10000-1", Bytes::from_static(b"png"))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        let bytes = store.retrieve("10000-1").await.unwrap().unwrap();
        assert_eq!(bytes.as_ref(), b"png");
        assert!(store.retrieve("10000-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fs_store_writes_under_its_root() {
        let root = scratch_dir();
        let store = FsScreenshotStore::new(&root);
        store
            .persist("10000-1", Bytes::from_static(b"bytes"))
            .await
            .unwrap();
        assert!(root.join("10000-1").exists());
        let bytes = store.retrieve("10000-1").await.unwrap().unwrap();
        assert_eq!(bytes.as_ref(), b"bytes");
        assert!(store.retrieve("10000-9").await.unwrap().is_none());
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn traversing_identifiers_are_rejected() {
        let store = FsScreenshotStore::new(scratch_dir());
        let err = store
            .persist("../escape", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidId(_)));
        let err = store.retrieve("a/b").await.unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidId(_)));
    }
}
