use crate::error::SyndicError;
use crate::key::CollectionKey;
use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    pub write_seq: u64,
    /// A later call to the same key already landed, so this payload was dropped.
    pub superseded: bool,
}

/// Durable byte storage underneath [`crate::store::CollectionStore`].
///
/// `write` reserves its write sequence when it is called, before the returned
/// future is first polled. Writes to one key are applied in that order: a
/// write that reaches the key after a newer one has landed is reported as
/// superseded instead of overwriting it. Writes to different keys must not
/// wait on each other.
pub trait StorageBackend: Send + Sync + 'static {
    fn read(
        &self,
        keyspace: &str,
        key: &CollectionKey,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, SyndicError>> + Send + 'static;

    fn write(
        &self,
        keyspace: &str,
        key: &CollectionKey,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<WriteReceipt, SyndicError>> + Send + 'static;

    fn keys(
        &self,
        keyspace: &str,
    ) -> impl Future<Output = Result<Vec<CollectionKey>, SyndicError>> + Send + 'static;

    /// Waits for in-flight writes, then rejects further calls with `Closed`.
    fn close(&self) -> impl Future<Output = Result<(), SyndicError>> + Send + 'static;
}
