use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::{ChatError, ExampleInput, ProducerResult};

/// One ready slot as written to a store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub index: usize,
    pub inputs: ExampleInput,
    pub output: ProducerResult,
}

/// Every ready slot of one cache configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedCache {
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<PersistedEntry>,
}

/// Persistence backend for built example caches.
///
/// Documents are keyed by configuration fingerprint, so a store can hold the
/// caches of several configurations side by side.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, fingerprint: &str) -> Result<Option<PersistedCache>, ChatError>;
    async fn save(&self, cache: &PersistedCache) -> Result<(), ChatError>;
    async fn remove(&self, fingerprint: &str) -> Result<(), ChatError>;
}

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, PersistedCache>>,
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn load(&self, fingerprint: &str) -> Result<Option<PersistedCache>, ChatError> {
        Ok(self.documents.read().await.get(fingerprint).cloned())
    }

    async fn save(&self, cache: &PersistedCache) -> Result<(), ChatError> {
        self.documents
            .write()
            .await
            .insert(cache.fingerprint.clone(), cache.clone());
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<(), ChatError> {
        self.documents.write().await.remove(fingerprint);
        Ok(())
    }
}

/// Writes one `<fingerprint>.json` document per configuration into a folder.
#[derive(Clone, Debug)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }
}

#[async_trait]
impl CacheStore for JsonDirStore {
    /// A missing, unreadable-as-JSON or mismatched document reads as `None`
    /// so the cache is rebuilt instead of failing.
    #[tracing::instrument(name = "chat_replay.store.load", level = "trace", skip(self))]
    async fn load(&self, fingerprint: &str) -> Result<Option<PersistedCache>, ChatError> {
        let path = self.path_for(fingerprint);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                trace!("no persisted cache");
                return Ok(None);
            }
            Err(err) => return Err(ChatError::store(path, err)),
        };

        match serde_json::from_str::<PersistedCache>(&raw) {
            Ok(document) if document.fingerprint == fingerprint => {
                debug!(entries = document.entries.len(), "persisted cache loaded");
                Ok(Some(document))
            }
            Ok(document) => {
                warn!(found = %document.fingerprint, "persisted cache fingerprint mismatch");
                Ok(None)
            }
            Err(err) => {
                warn!(error = %err, path = %path.display(), "discarding unreadable cache document");
                Ok(None)
            }
        }
    }

    #[tracing::instrument(
        name = "chat_replay.store.save",
        level = "trace",
        skip(self, cache),
        fields(fingerprint = %cache.fingerprint, entries = cache.entries.len())
    )]
    async fn save(&self, cache: &PersistedCache) -> Result<(), ChatError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| ChatError::store(&self.dir, err))?;

        let path = self.path_for(&cache.fingerprint);
        let body = serde_json::to_vec_pretty(cache).map_err(|err| ChatError::store(&path, err))?;

        // Each save stages into its own file in the same folder, then renames over
        // the document.
        let dir = self.dir.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || {
            let mut staging = tempfile::NamedTempFile::new_in(&dir)
                .map_err(|err| ChatError::store(&dir, err))?;
            staging
                .write_all(&body)
                .map_err(|err| ChatError::store(staging.path(), err))?;
            staging
                .persist(&target)
                .map_err(|err| ChatError::store(&target, err.error))?;
            Ok::<_, ChatError>(())
        })
        .await
        .map_err(|err| ChatError::store(&path, err))??;

        trace!(path = %path.display(), "cache document written");
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<(), ChatError> {
        let path = self.path_for(fingerprint);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ChatError::store(path, err)),
        }
    }
}
