//! Typed, tenant-agnostic collection store.
//!
//! [`CollectionStore`] serializes whole collections of records to JSON and
//! hands the bytes to a [`StorageBackend`]. `load` and `save` absorb every
//! failure: a load that cannot be served yields an empty collection and a
//! save that cannot be applied yields [`SaveAck::Failed`]. `try_load` and
//! `try_save` expose the underlying error instead.

use crate::config::SyndicConfig;
use crate::error::{SyndicError, SyndicErrorCode};
use crate::key::CollectionKey;
use crate::storage::backend::{StorageBackend, WriteReceipt};
use crate::storage::file::FileBackend;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Record shape stored in a collection. The store never looks inside.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveAck {
    Persisted { write_seq: u64 },
    /// A later save to the same key won; the store holds that one.
    Superseded { write_seq: u64 },
    Failed { code: SyndicErrorCode, message: String },
}

impl SaveAck {
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, SaveAck::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct StoreLimits {
    max_key_bytes: usize,
    max_collection_bytes: usize,
}

pub struct CollectionStore<B> {
    backend: Arc<B>,
    keyspace: Arc<str>,
    limits: StoreLimits,
}

impl<B> Clone for CollectionStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            keyspace: Arc::clone(&self.keyspace),
            limits: self.limits,
        }
    }
}

impl<B: StorageBackend> CollectionStore<B> {
    pub fn new(backend: B, config: &SyndicConfig) -> Self {
        Self::from_shared(Arc::new(backend), config)
    }

    pub fn from_shared(backend: Arc<B>, config: &SyndicConfig) -> Self {
        Self {
            backend,
            keyspace: Arc::from(config.default_keyspace.as_str()),
            limits: StoreLimits {
                max_key_bytes: config.max_key_bytes,
                max_collection_bytes: config.max_collection_bytes,
            },
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// View of the same backend pinned to another keyspace.
    pub fn with_keyspace(&self, keyspace: impl Into<String>) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            keyspace: Arc::from(keyspace.into()),
            limits: self.limits,
        }
    }

    fn check_key(&self, key: &CollectionKey) -> Result<(), SyndicError> {
        if key.as_bytes().len() > self.limits.max_key_bytes {
            return Err(SyndicError::InvalidKey {
                key: key.to_string(),
                reason: format!("key exceeds {} bytes", self.limits.max_key_bytes),
            });
        }
        Ok(())
    }

    pub async fn try_load<T: Record>(
        &self,
        key: &CollectionKey,
    ) -> Result<Option<Vec<T>>, SyndicError> {
        self.check_key(key)?;
        let Some(bytes) = self.backend.read(&self.keyspace, key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SyndicError::Decode(e.to_string()))
    }

    /// Collection stored under `key`, or an empty one when nothing usable is stored.
    pub async fn load<T: Record>(&self, key: &CollectionKey) -> Vec<T> {
        match self.try_load(key).await {
            Ok(Some(items)) => items,
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(
                    keyspace = %self.keyspace,
                    key = %key,
                    code = err.code_str(),
                    error = %err,
                    "collection load failed; treating as empty"
                );
                Vec::new()
            }
        }
    }

    /// Encodes now and reserves the write's place in the per-key order before
    /// returning, so saves to one key land in call order.
    pub fn try_save<T: Record>(
        &self,
        key: &CollectionKey,
        collection: &[T],
    ) -> impl Future<Output = Result<WriteReceipt, SyndicError>> + Send + 'static {
        let write = self
            .encode(key, collection)
            .map(|payload| self.backend.write(&self.keyspace, key, payload));
        async move { write?.await }
    }

    pub fn save<T: Record>(
        &self,
        key: &CollectionKey,
        collection: &[T],
    ) -> impl Future<Output = SaveAck> + Send + 'static {
        let attempt = self.try_save(key, collection);
        let keyspace = Arc::clone(&self.keyspace);
        let key = key.clone();
        async move {
            match attempt.await {
                Ok(receipt) if receipt.superseded => SaveAck::Superseded {
                    write_seq: receipt.write_seq,
                },
                Ok(receipt) => SaveAck::Persisted {
                    write_seq: receipt.write_seq,
                },
                Err(err) => {
                    warn!(
                        keyspace = %keyspace,
                        key = %key,
                        code = err.code_str(),
                        error = %err,
                        "collection save failed"
                    );
                    SaveAck::Failed {
                        code: err.code(),
                        message: err.to_string(),
                    }
                }
            }
        }
    }

    fn encode<T: Record>(
        &self,
        key: &CollectionKey,
        collection: &[T],
    ) -> Result<Vec<u8>, SyndicError> {
        self.check_key(key)?;
        let payload =
            serde_json::to_vec(collection).map_err(|e| SyndicError::Encode(e.to_string()))?;
        if payload.len() > self.limits.max_collection_bytes {
            return Err(SyndicError::PayloadTooLarge {
                size: payload.len(),
                limit: self.limits.max_collection_bytes,
            });
        }
        Ok(payload)
    }

    pub async fn keys(&self) -> Result<Vec<CollectionKey>, SyndicError> {
        self.backend.keys(&self.keyspace).await
    }

    pub async fn close(&self) -> Result<(), SyndicError> {
        self.backend.close().await
    }
}

impl CollectionStore<FileBackend> {
    /// Opens `dir` now, applying any pending schema upgrade.
    pub fn open(config: SyndicConfig, dir: &Path) -> Result<Self, SyndicError> {
        let backend = FileBackend::open(config.clone(), dir)?;
        Ok(Self::new(backend, &config))
    }

    /// Defers touching `dir` until the first load or save.
    pub fn open_lazy(config: SyndicConfig, dir: &Path) -> Result<Self, SyndicError> {
        let backend = FileBackend::new(config.clone(), dir)?;
        Ok(Self::new(backend, &config))
    }
}
