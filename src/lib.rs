//! Per-tenant persistence core of a building-association ledger.
//!
//! [`CollectionStore`] persists whole collections of records under scoped
//! keys. [`CollectionBinder`] keeps one collection in memory for the active
//! tenant and saves it back with a debounce, without ever letting a stale
//! snapshot overwrite stored data. [`SyndicWorkspace`] binds every
//! application collection for a signed-in session.

pub mod binder;
pub mod collections;
pub mod config;
pub mod error;
pub mod key;
mod lib_helpers;
pub mod manifest;
pub mod model;
pub mod offline;
pub mod storage;
pub mod store;
pub mod workspace;

pub use binder::{BinderView, CollectionBinder, SnapshotSetter};
pub use collections::{CollectionName, CollectionScope};
pub use config::{BinderConfig, DurabilityMode, RecoveryMode, SyndicConfig};
pub use error::{SyndicError, SyndicErrorCode};
pub use key::{CollectionKey, LogicalName, TenantId, scope};
pub use storage::{FileBackend, MemoryBackend, StorageBackend, WriteReceipt};
pub use store::{CollectionStore, Record, SaveAck};
pub use workspace::{Session, SyndicWorkspace};
