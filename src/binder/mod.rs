//! Tenant-scoped collection binder.
//!
//! A [`CollectionBinder`] keeps the in-memory snapshot of one logical
//! collection for the active tenant. Changing the tenant starts a new session:
//! the snapshot falls back to the initial value, the collection for the new key
//! is loaded, and a load that belongs to an earlier session is never applied.
//! Writes are persisted through a [`Debouncer`] only once the snapshot has been
//! loaded for the current key, so an unloaded default can never overwrite
//! stored data.

pub mod debounce;

pub use debounce::Debouncer;

use crate::config::BinderConfig;
use crate::key::{CollectionKey, LogicalName, TenantId, scope};
use crate::storage::backend::StorageBackend;
use crate::store::{CollectionStore, Record, SaveAck};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What a UI renders: the snapshot for `key` and whether it is still loading.
#[derive(Debug)]
pub struct BinderView<T> {
    pub key: CollectionKey,
    pub snapshot: Arc<Vec<T>>,
    pub is_loading: bool,
}

impl<T> Clone for BinderView<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            snapshot: Arc::clone(&self.snapshot),
            is_loading: self.is_loading,
        }
    }
}

struct PendingSave<T> {
    key: CollectionKey,
    snapshot: Arc<Vec<T>>,
    done: Option<oneshot::Sender<SaveAck>>,
}

struct BinderState<T> {
    tenant: Option<TenantId>,
    effective_key: CollectionKey,
    snapshot: Arc<Vec<T>>,
    is_loading: bool,
    fresh: bool,
    loaded_key: Option<CollectionKey>,
    generation: u64,
    load_task: Option<JoinHandle<()>>,
    last_save: Option<SaveAck>,
    closed: bool,
}

impl<T> BinderState<T> {
    fn persistable(&self) -> bool {
        !self.is_loading && self.fresh && self.loaded_key.as_ref() == Some(&self.effective_key)
    }
}

struct BinderShared<T: Record, B: StorageBackend> {
    name: LogicalName,
    initial: Arc<Vec<T>>,
    store: CollectionStore<B>,
    state: Mutex<BinderState<T>>,
    views: watch::Sender<BinderView<T>>,
    debouncer: Debouncer<PendingSave<T>>,
}

/// Binds one logical collection to the store for the active tenant.
///
/// Constructing a binder, changing its tenant and writing to it spawn Tokio
/// tasks, so all of these must happen inside a runtime. Dropping the binder
/// aborts its in-flight load and discards any save still waiting out the
/// debounce window; call [`CollectionBinder::flush`] first to keep it.
pub struct CollectionBinder<T: Record, B: StorageBackend> {
    shared: Arc<BinderShared<T, B>>,
}

/// Write handle for a binder's snapshot. Becomes a no-op once the binder is gone.
pub struct SnapshotSetter<T: Record, B: StorageBackend> {
    shared: Weak<BinderShared<T, B>>,
}

impl<T: Record, B: StorageBackend> Clone for SnapshotSetter<T, B> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T: Record, B: StorageBackend> SnapshotSetter<T, B> {
    pub fn set(&self, value: Vec<T>) {
        self.update(move |_| value);
    }

    /// Read-modify-write against the latest snapshot, including earlier
    /// updates made through this or any other setter.
    pub fn update(&self, f: impl FnOnce(&[T]) -> Vec<T>) {
        match self.shared.upgrade() {
            Some(shared) => shared.apply_update(f),
            None => debug!("snapshot update ignored: binder dropped"),
        }
    }
}

impl<T: Record, B: StorageBackend> CollectionBinder<T, B> {
    pub fn new(
        store: CollectionStore<B>,
        name: LogicalName,
        initial: Vec<T>,
        tenant: Option<TenantId>,
        config: BinderConfig,
    ) -> Self {
        let initial = Arc::new(initial);
        let effective_key = scope(&name, tenant);
        let (sink, rx) = mpsc::unbounded_channel();
        let (views, _) = watch::channel(BinderView {
            key: effective_key.clone(),
            snapshot: Arc::clone(&initial),
            is_loading: true,
        });
        let shared = Arc::new(BinderShared {
            name,
            initial: Arc::clone(&initial),
            store: store.clone(),
            state: Mutex::new(BinderState {
                tenant,
                effective_key: effective_key.clone(),
                snapshot: initial,
                is_loading: true,
                fresh: false,
                loaded_key: None,
                generation: 0,
                load_task: None,
                last_save: None,
                closed: false,
            }),
            views,
            debouncer: Debouncer::new(config.debounce, sink),
        });
        tokio::spawn(run_writer(store, Arc::downgrade(&shared), rx));
        {
            let mut state = shared.state.lock();
            BinderShared::begin_session(&shared, &mut state, tenant, effective_key);
        }
        Self { shared }
    }

    /// Switches to `tenant` and returns `(snapshot, setter, is_loading)`.
    pub fn observe(&self, tenant: Option<TenantId>) -> (Arc<Vec<T>>, SnapshotSetter<T, B>, bool) {
        self.set_tenant(tenant);
        let state = self.shared.state.lock();
        (Arc::clone(&state.snapshot), self.setter(), state.is_loading)
    }

    /// Starts a new session if `tenant` changes the effective key.
    pub fn set_tenant(&self, tenant: Option<TenantId>) {
        let key = scope(&self.shared.name, tenant);
        let mut state = self.shared.state.lock();
        if state.closed || state.effective_key == key {
            return;
        }
        BinderShared::begin_session(&self.shared, &mut state, tenant, key);
    }

    pub fn name(&self) -> &LogicalName {
        &self.shared.name
    }

    pub fn tenant(&self) -> Option<TenantId> {
        self.shared.state.lock().tenant
    }

    pub fn key(&self) -> CollectionKey {
        self.shared.state.lock().effective_key.clone()
    }

    pub fn snapshot(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.shared.state.lock().snapshot)
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state.lock().is_loading
    }

    /// True once the snapshot was adopted from a completed load of the current key.
    pub fn is_fresh(&self) -> bool {
        self.shared.state.lock().fresh
    }

    pub fn view(&self) -> BinderView<T> {
        self.shared.views.borrow().clone()
    }

    pub fn last_save(&self) -> Option<SaveAck> {
        self.shared.state.lock().last_save.clone()
    }

    pub fn setter(&self) -> SnapshotSetter<T, B> {
        SnapshotSetter {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn set(&self, value: Vec<T>) {
        self.shared.apply_update(move |_| value);
    }

    /// `f` runs while the binder state is locked and must not call back into
    /// this binder.
    pub fn update(&self, f: impl FnOnce(&[T]) -> Vec<T>) {
        self.shared.apply_update(f);
    }

    pub fn subscribe(&self) -> watch::Receiver<BinderView<T>> {
        self.shared.views.subscribe()
    }

    /// Resolves with the first view that is not loading.
    pub async fn wait_ready(&self) -> BinderView<T> {
        let mut rx = self.subscribe();
        match rx.wait_for(|view| !view.is_loading).await {
            Ok(view) => view.clone(),
            Err(_) => self.view(),
        }
    }

    /// Issues the pending debounced save now and waits for its outcome.
    /// Returns `None` when nothing was pending.
    pub async fn flush(&self) -> Option<SaveAck> {
        let mut pending = self.shared.debouncer.take()?;
        let (done, outcome) = oneshot::channel();
        pending.done = Some(done);
        if self.shared.debouncer.send_now(pending).is_err() {
            warn!(name = %self.shared.name, "flush dropped: writer stopped");
            return None;
        }
        outcome.await.ok()
    }

    /// Tears the binder down; see the type docs for what is discarded.
    pub fn close(self) {}
}

impl<T: Record, B: StorageBackend> Drop for CollectionBinder<T, B> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        if let Some(task) = state.load_task.take() {
            task.abort();
        }
        if self.shared.debouncer.cancel() {
            debug!(key = %state.effective_key, "pending save discarded on teardown");
        }
    }
}

impl<T: Record, B: StorageBackend> BinderShared<T, B> {
    fn begin_session(
        shared: &Arc<Self>,
        state: &mut BinderState<T>,
        tenant: Option<TenantId>,
        key: CollectionKey,
    ) {
        state.generation += 1;
        state.tenant = tenant;
        state.effective_key = key.clone();
        state.snapshot = Arc::clone(&shared.initial);
        state.is_loading = true;
        state.fresh = false;
        if shared.debouncer.cancel() {
            debug!(key = %key, "pending save for previous key cancelled");
        }
        if let Some(task) = state.load_task.take() {
            task.abort();
        }

        let generation = state.generation;
        let weak = Arc::downgrade(shared);
        let store = shared.store.clone();
        state.load_task = Some(tokio::spawn(async move {
            let loaded = store.load::<T>(&key).await;
            if let Some(shared) = weak.upgrade() {
                shared.adopt_load(generation, key, loaded);
            }
        }));
        shared.publish(state);
    }

    fn adopt_load(&self, generation: u64, key: CollectionKey, loaded: Vec<T>) {
        let mut state = self.state.lock();
        if state.closed || state.generation != generation || state.effective_key != key {
            debug!(
                key = %key,
                current = %state.effective_key,
                "discarding load for abandoned session"
            );
            return;
        }
        state.snapshot = if loaded.is_empty() {
            Arc::clone(&self.initial)
        } else {
            Arc::new(loaded)
        };
        state.fresh = true;
        state.loaded_key = Some(key);
        state.is_loading = false;
        state.load_task = None;
        self.publish(&state);
    }

    fn apply_update(&self, f: impl FnOnce(&[T]) -> Vec<T>) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let next = Arc::new(f(state.snapshot.as_slice()));
        state.snapshot = Arc::clone(&next);
        self.publish(&state);
        if !state.persistable() {
            debug!(
                key = %state.effective_key,
                is_loading = state.is_loading,
                fresh = state.fresh,
                "save skipped: collection not loaded for current key"
            );
            return;
        }
        self.debouncer.schedule(PendingSave {
            key: state.effective_key.clone(),
            snapshot: next,
            done: None,
        });
    }

    fn publish(&self, state: &BinderState<T>) {
        self.views.send_replace(BinderView {
            key: state.effective_key.clone(),
            snapshot: Arc::clone(&state.snapshot),
            is_loading: state.is_loading,
        });
    }
}

// Holds only a weak reference so the binder can drop while saves drain.
async fn run_writer<T: Record, B: StorageBackend>(
    store: CollectionStore<B>,
    shared: Weak<BinderShared<T, B>>,
    mut rx: mpsc::UnboundedReceiver<PendingSave<T>>,
) {
    while let Some(pending) = rx.recv().await {
        let ack = store.save(&pending.key, &pending.snapshot).await;
        if let Some(shared) = shared.upgrade() {
            shared.state.lock().last_save = Some(ack.clone());
        }
        if let Some(done) = pending.done {
            let _ = done.send(ack);
        }
    }
}
