use crate::config::{DurabilityMode, SyndicConfig, validate_config};
use crate::error::SyndicError;
use crate::key::CollectionKey;
use crate::lib_helpers::{
    collection_file_name, create_private_dir_all, fsync_dir, key_from_file_name, now_micros,
};
use crate::manifest::atomic::{load_manifest, write_manifest_atomic};
use crate::manifest::reconcile_manifest;
use crate::manifest::schema::StoreManifest;
use crate::storage::backend::{StorageBackend, WriteReceipt};
use crate::storage::frame::{CollectionFrame, decode_frame, encode_frame, pack_payload, unpack_payload};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tempfile::NamedTempFile;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Directory-backed store: one keyspace directory per keyspace and one
/// atomically replaced file per collection.
///
/// The on-disk handle is established on first use unless [`FileBackend::open`]
/// is used. A failed open is retried by the next call.
#[derive(Clone)]
pub struct FileBackend {
    inner: Arc<FileBackendInner>,
}

struct FileBackendInner {
    dir: PathBuf,
    config: SyndicConfig,
    handle: OnceCell<Arc<OpenHandle>>,
    closed: AtomicBool,
    // held shared by every write; close takes it exclusively to drain them
    in_flight: tokio::sync::RwLock<()>,
    next_write_seq: AtomicU64,
}

struct OpenHandle {
    manifest: StoreManifest,
    // last applied write sequence per (keyspace, key)
    key_slots: Mutex<HashMap<(String, CollectionKey), Arc<tokio::sync::Mutex<u64>>>>,
}

impl OpenHandle {
    fn keyspace_dir(&self, root: &Path, keyspace: &str) -> Result<PathBuf, SyndicError> {
        if !self.manifest.has_keyspace(keyspace) {
            return Err(SyndicError::KeyspaceNotFound {
                keyspace: keyspace.to_string(),
            });
        }
        Ok(root.join(keyspace))
    }

    fn key_slot(&self, keyspace: &str, key: &CollectionKey) -> Arc<tokio::sync::Mutex<u64>> {
        let mut slots = self.key_slots.lock();
        Arc::clone(
            slots
                .entry((keyspace.to_string(), key.clone()))
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(0))),
        )
    }
}

impl FileBackend {
    /// Validates the config without touching the directory.
    pub fn new(config: SyndicConfig, dir: &Path) -> Result<Self, SyndicError> {
        validate_config(&config)?;
        Ok(Self::with_handle(config, dir, None))
    }

    /// Opens the directory eagerly, applying any pending schema upgrade.
    pub fn open(config: SyndicConfig, dir: &Path) -> Result<Self, SyndicError> {
        validate_config(&config)?;
        let handle = open_handle(dir, &config)?;
        Ok(Self::with_handle(config, dir, Some(Arc::new(handle))))
    }

    fn with_handle(config: SyndicConfig, dir: &Path, handle: Option<Arc<OpenHandle>>) -> Self {
        Self {
            inner: Arc::new(FileBackendInner {
                dir: dir.to_path_buf(),
                config,
                handle: OnceCell::new_with(handle),
                closed: AtomicBool::new(false),
                in_flight: tokio::sync::RwLock::new(()),
                next_write_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn config(&self) -> &SyndicConfig {
        &self.inner.config
    }

    pub fn is_open(&self) -> bool {
        self.inner.handle.initialized() && !self.inner.closed.load(Ordering::Acquire)
    }

    /// Manifest in effect, once the handle is established.
    pub fn manifest(&self) -> Option<StoreManifest> {
        self.inner.handle.get().map(|h| h.manifest.clone())
    }
}

impl FileBackendInner {
    async fn handle(&self) -> Result<Arc<OpenHandle>, SyndicError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SyndicError::Closed);
        }
        let handle = self
            .handle
            .get_or_try_init(|| async {
                let dir = self.dir.clone();
                let config = self.config.clone();
                let handle = tokio::task::spawn_blocking(move || open_handle(&dir, &config))
                    .await
                    .map_err(join_error)??;
                Ok::<_, SyndicError>(Arc::new(handle))
            })
            .await?;
        Ok(Arc::clone(handle))
    }
}

fn open_handle(dir: &Path, config: &SyndicConfig) -> Result<OpenHandle, SyndicError> {
    create_private_dir_all(dir)?;
    let existing = load_manifest(dir, config.strict_recovery())?;
    let previous_version = existing.as_ref().map(|m| m.schema_version);
    let plan = reconcile_manifest(existing, config)?;
    for keyspace in &plan.manifest.keyspaces {
        let keyspace_dir = dir.join(keyspace);
        create_private_dir_all(&keyspace_dir)?;
        sweep_temp_files(&keyspace_dir)?;
    }
    if plan.needs_write {
        write_manifest_atomic(&plan.manifest, dir, config.durability_mode)?;
        info!(
            dir = %dir.display(),
            previous_schema_version = previous_version.unwrap_or(0),
            schema_version = plan.manifest.schema_version,
            added_keyspaces = ?plan.added_keyspaces,
            "collection store upgraded"
        );
    }
    info!(
        dir = %dir.display(),
        schema_version = plan.manifest.schema_version,
        keyspaces = plan.manifest.keyspaces.len(),
        durability_mode = ?config.durability_mode,
        recovery_mode = ?config.recovery_mode,
        compression_threshold_bytes = config.compression_threshold_bytes,
        "collection store opened"
    );
    Ok(OpenHandle {
        manifest: plan.manifest,
        key_slots: Mutex::new(HashMap::new()),
    })
}

/// Removes temp files left behind by writes interrupted before their rename.
fn sweep_temp_files(dir: &Path) -> Result<(), SyndicError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(".tmp") && entry.file_type()?.is_file() {
            warn!(file = %name, "removing interrupted collection write");
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

pub(crate) fn read_collection_file(
    path: &Path,
    expected_key: &str,
    max_bytes: usize,
) -> Result<Option<Vec<u8>>, SyndicError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let frame = decode_frame(&bytes)?;
    if frame.key != expected_key {
        return Err(SyndicError::IntegrityError {
            message: format!(
                "collection file holds key '{}' instead of '{expected_key}'",
                frame.key
            ),
        });
    }
    Ok(Some(unpack_payload(frame.encoding, frame.payload, max_bytes)?))
}

pub(crate) fn write_collection_file(
    keyspace_dir: &Path,
    key: &str,
    write_seq: u64,
    json: Vec<u8>,
    config: &SyndicConfig,
) -> Result<(), SyndicError> {
    let (encoding, payload) = pack_payload(
        json,
        config.compression_threshold_bytes,
        config.compression_level,
    )?;
    let bytes = encode_frame(&CollectionFrame {
        key: key.to_string(),
        write_seq,
        timestamp_micros: now_micros(),
        encoding,
        payload,
    })?;
    let mut tmp = NamedTempFile::new_in(keyspace_dir)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    if config.durability_mode == DurabilityMode::Full {
        tmp.as_file().sync_all()?;
    }
    tmp.persist(keyspace_dir.join(collection_file_name(key)))
        .map_err(|e| SyndicError::Io(e.error))?;
    fsync_dir(keyspace_dir, config.durability_mode)?;
    Ok(())
}

pub(crate) fn list_keyspace_keys(keyspace_dir: &Path) -> Result<Vec<CollectionKey>, SyndicError> {
    let mut keys = Vec::new();
    for entry in fs::read_dir(keyspace_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(raw) = key_from_file_name(&name) else {
            continue;
        };
        match CollectionKey::from_stored(&raw) {
            Ok(key) => keys.push(key),
            Err(err) => warn!(file = %name, error = %err, "skipping collection file with invalid key"),
        }
    }
    keys.sort();
    Ok(keys)
}

fn join_error(err: tokio::task::JoinError) -> SyndicError {
    SyndicError::Io(std::io::Error::other(format!("storage task failed: {err}")))
}

impl StorageBackend for FileBackend {
    fn read(
        &self,
        keyspace: &str,
        key: &CollectionKey,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, SyndicError>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let keyspace = keyspace.to_string();
        let key = key.clone();
        async move {
            let handle = inner.handle().await?;
            let path = handle
                .keyspace_dir(&inner.dir, &keyspace)?
                .join(collection_file_name(key.as_str()));
            let max_bytes = inner.config.max_collection_bytes;
            tokio::task::spawn_blocking(move || {
                read_collection_file(&path, key.as_str(), max_bytes)
            })
            .await
            .map_err(join_error)?
        }
    }

    fn write(
        &self,
        keyspace: &str,
        key: &CollectionKey,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<WriteReceipt, SyndicError>> + Send + 'static {
        let write_seq = self.inner.next_write_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let inner = Arc::clone(&self.inner);
        let keyspace = keyspace.to_string();
        let key = key.clone();
        async move {
            let _in_flight = inner.in_flight.read().await;
            let handle = inner.handle().await?;
            let keyspace_dir = handle.keyspace_dir(&inner.dir, &keyspace)?;
            let slot = handle.key_slot(&keyspace, &key);
            let mut applied = slot.lock().await;
            if *applied > write_seq {
                return Ok(WriteReceipt {
                    write_seq,
                    superseded: true,
                });
            }
            let config = inner.config.clone();
            let raw_key = key.as_str().to_string();
            tokio::task::spawn_blocking(move || {
                write_collection_file(&keyspace_dir, &raw_key, write_seq, payload, &config)
            })
            .await
            .map_err(join_error)??;
            *applied = write_seq;
            Ok(WriteReceipt {
                write_seq,
                superseded: false,
            })
        }
    }

    fn keys(
        &self,
        keyspace: &str,
    ) -> impl Future<Output = Result<Vec<CollectionKey>, SyndicError>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let keyspace = keyspace.to_string();
        async move {
            let handle = inner.handle().await?;
            let keyspace_dir = handle.keyspace_dir(&inner.dir, &keyspace)?;
            tokio::task::spawn_blocking(move || list_keyspace_keys(&keyspace_dir))
                .await
                .map_err(join_error)?
        }
    }

    fn close(&self) -> impl Future<Output = Result<(), SyndicError>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        async move {
            if inner.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            // writes that got past the closed check finish before this returns
            drop(inner.in_flight.write().await);
            info!(dir = %inner.dir.display(), "collection store closed");
            Ok(())
        }
    }
}
