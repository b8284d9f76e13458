use crate::config::DEFAULT_KEYSPACE;
use crate::error::SyndicError;
use crate::key::CollectionKey;
use crate::storage::backend::{StorageBackend, WriteReceipt};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::watch;

/// One write attempt observed by a [`MemoryBackend`], including failed ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub keyspace: String,
    pub key: CollectionKey,
    pub payload: Vec<u8>,
    pub write_seq: u64,
}

/// Non-persistent backend.
///
/// Used when no durable storage is available, and by tests through its fault
/// injection hooks: failing reads or writes, per-key read gates that hold a
/// load in flight until released, and a log of every write attempt.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    keyspaces: BTreeSet<String>,
    entries: Mutex<HashMap<(String, CollectionKey), (u64, Vec<u8>)>>,
    next_write_seq: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    closed: AtomicBool,
    read_gates: Mutex<HashMap<CollectionKey, watch::Sender<bool>>>,
    write_log: Mutex<Vec<WriteRecord>>,
    write_attempts: watch::Sender<usize>,
    read_attempts: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_keyspaces([DEFAULT_KEYSPACE])
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keyspaces<I, S>(keyspaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (write_attempts, _) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryInner {
                keyspaces: keyspaces.into_iter().map(Into::into).collect(),
                entries: Mutex::new(HashMap::new()),
                next_write_seq: AtomicU64::new(0),
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                read_gates: Mutex::new(HashMap::new()),
                write_log: Mutex::new(Vec::new()),
                write_attempts,
                read_attempts: AtomicUsize::new(0),
            }),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::Release);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::Release);
    }

    /// Reads of `key` started from now on stay pending until [`Self::release_reads`].
    pub fn hold_reads(&self, key: &CollectionKey) {
        let (tx, _) = watch::channel(true);
        self.inner.read_gates.lock().insert(key.clone(), tx);
    }

    pub fn release_reads(&self, key: &CollectionKey) {
        if let Some(gate) = self.inner.read_gates.lock().remove(key) {
            gate.send_replace(false);
        }
    }

    pub fn insert_raw(&self, keyspace: &str, key: &CollectionKey, payload: Vec<u8>) {
        self.inner
            .entries
            .lock()
            .insert((keyspace.to_string(), key.clone()), (0, payload));
    }

    pub fn raw(&self, keyspace: &str, key: &CollectionKey) -> Option<Vec<u8>> {
        self.inner
            .entries
            .lock()
            .get(&(keyspace.to_string(), key.clone()))
            .map(|(_, payload)| payload.clone())
    }

    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.inner.write_log.lock().clone()
    }

    pub fn write_count(&self) -> usize {
        *self.inner.write_attempts.borrow()
    }

    pub fn read_count(&self) -> usize {
        self.inner.read_attempts.load(Ordering::Acquire)
    }

    /// Resolves once at least `count` write attempts have been made.
    pub async fn wait_for_writes(&self, count: usize) {
        let mut rx = self.inner.write_attempts.subscribe();
        let _ = rx.wait_for(|seen| *seen >= count).await;
    }
}

impl MemoryInner {
    fn check_keyspace(&self, keyspace: &str) -> Result<(), SyndicError> {
        if self.keyspaces.contains(keyspace) {
            Ok(())
        } else {
            Err(SyndicError::KeyspaceNotFound {
                keyspace: keyspace.to_string(),
            })
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn read(
        &self,
        keyspace: &str,
        key: &CollectionKey,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, SyndicError>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let gate = inner.read_gates.lock().get(key).map(watch::Sender::subscribe);
        let keyspace = keyspace.to_string();
        let key = key.clone();
        async move {
            inner.read_attempts.fetch_add(1, Ordering::AcqRel);
            if let Some(mut gate) = gate {
                let _ = gate.wait_for(|held| !*held).await;
            }
            tokio::task::yield_now().await;
            if inner.closed.load(Ordering::Acquire) {
                return Err(SyndicError::Closed);
            }
            if inner.fail_reads.load(Ordering::Acquire) {
                return Err(SyndicError::Unavailable {
                    message: "injected read failure".into(),
                });
            }
            inner.check_keyspace(&keyspace)?;
            Ok(inner
                .entries
                .lock()
                .get(&(keyspace, key))
                .map(|(_, payload)| payload.clone()))
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
            inner.write_log.lock().push(WriteRecord {
                keyspace: keyspace.clone(),
                key: key.clone(),
                payload: payload.clone(),
                write_seq,
            });
            inner.write_attempts.send_modify(|n| *n += 1);
            tokio::task::yield_now().await;
            if inner.closed.load(Ordering::Acquire) {
                return Err(SyndicError::Closed);
            }
            if inner.fail_writes.load(Ordering::Acquire) {
                return Err(SyndicError::Unavailable {
                    message: "injected write failure".into(),
                });
            }
            inner.check_keyspace(&keyspace)?;
            let mut entries = inner.entries.lock();
            let slot = entries.entry((keyspace, key)).or_insert((0, Vec::new()));
            if slot.0 > write_seq {
                return Ok(WriteReceipt {
                    write_seq,
                    superseded: true,
                });
            }
            *slot = (write_seq, payload);
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
            inner.check_keyspace(&keyspace)?;
            let mut keys: Vec<_> = inner
                .entries
                .lock()
                .keys()
                .filter(|(ks, _)| *ks == keyspace)
                .map(|(_, key)| key.clone())
                .collect();
            keys.sort();
            Ok(keys)
        }
    }

    fn close(&self) -> impl Future<Output = Result<(), SyndicError>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.closed.store(true, Ordering::Release);
            Ok(())
        }
    }
}
