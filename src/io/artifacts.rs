//! Text artifact access on top of an object store.

use crate::error::Result;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};
use std::sync::Arc;

/// Reads and writes UTF-8 artifacts in one container.
#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
}

impl ArtifactStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// The underlying object store.
    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Write (or overwrite) a text artifact.
    pub async fn write_text(&self, path: &Path, contents: impl Into<String>) -> Result<()> {
        let contents: String = contents.into();
        let len = contents.len();
        self.store.put(path, PutPayload::from(contents)).await?;
        tracing::trace!("Wrote {} bytes to {}", len, path);
        Ok(())
    }

    /// Write raw bytes.
    pub async fn write_bytes(&self, path: &Path, contents: Vec<u8>) -> Result<()> {
        self.store.put(path, PutPayload::from(contents)).await?;
        Ok(())
    }

    /// Read raw bytes, or `None` if the object does not exist.
    pub async fn try_read_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match self.store.get(path).await {
            Ok(result) => Ok(Some(result.bytes().await?.to_vec())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a text artifact, or `None` if it does not exist.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub async fn try_read_text(&self, path: &Path) -> Result<Option<String>> {
        Ok(self
            .try_read_bytes(path)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Read a text artifact that must exist.
    pub async fn read_text(&self, path: &Path) -> Result<String> {
        let bytes = self.store.get(path).await?.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// List object paths under a prefix, sorted by name.
    pub async fn list(&self, prefix: &Path) -> Result<Vec<Path>> {
        let mut paths: Vec<Path> = self
            .store
            .list(Some(prefix))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;
        paths.sort();
        Ok(paths)
    }
}
