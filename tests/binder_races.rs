use std::time::Duration;
use syndicdb::config::DEFAULT_KEYSPACE;
use syndicdb::{
    BinderConfig, CollectionBinder, CollectionKey, CollectionStore, LogicalName, MemoryBackend,
    SaveAck, SyndicConfig, SyndicErrorCode, TenantId, scope,
};
use tokio::time::sleep;

const NAME: &str = "residents_data";

fn key(tenant: Option<TenantId>) -> CollectionKey {
    scope(&LogicalName::new(NAME).expect("name"), tenant)
}

fn seed(backend: &MemoryBackend, tenant: Option<TenantId>, items: &[&str]) {
    let payload = serde_json::to_vec(items).expect("json");
    backend.insert_raw(DEFAULT_KEYSPACE, &key(tenant), payload);
}

fn binder(backend: &MemoryBackend, tenant: Option<TenantId>) -> CollectionBinder<String, MemoryBackend> {
    let store = CollectionStore::new(backend.clone(), &SyndicConfig::default());
    CollectionBinder::new(
        store,
        LogicalName::new(NAME).expect("name"),
        vec!["initial".to_string()],
        tenant,
        BinderConfig::default(),
    )
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn stored(backend: &MemoryBackend, tenant: Option<TenantId>) -> Option<Vec<String>> {
    backend
        .raw(DEFAULT_KEYSPACE, &key(tenant))
        .map(|bytes| serde_json::from_slice(&bytes).expect("stored json"))
}

#[tokio::test(start_paused = true)]
async fn edits_during_load_are_never_saved() {
    let backend = MemoryBackend::new();
    let tenant = Some(TenantId(1));
    seed(&backend, tenant, &["stored"]);
    backend.hold_reads(&key(tenant));

    let binder = binder(&backend, tenant);
    assert!(binder.is_loading());
    binder.set(strings(&["typed while loading"]));
    binder.update(|prev| {
        let mut next = prev.to_vec();
        next.push("more".into());
        next
    });
    sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.write_count(), 0);

    backend.release_reads(&key(tenant));
    let view = binder.wait_ready().await;
    assert_eq!(*view.snapshot, strings(&["stored"]));
    sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.write_count(), 0);
    assert_eq!(stored(&backend, tenant), Some(strings(&["stored"])));
}

#[tokio::test(start_paused = true)]
async fn late_load_for_previous_tenant_is_discarded() {
    let backend = MemoryBackend::new();
    let (t1, t2) = (Some(TenantId(1)), Some(TenantId(2)));
    seed(&backend, t1, &["tenant one"]);
    seed(&backend, t2, &["tenant two"]);
    backend.hold_reads(&key(t1));

    let binder = binder(&backend, t1);
    binder.set_tenant(t2);
    let view = binder.wait_ready().await;
    assert_eq!(view.key, key(t2));
    assert_eq!(*view.snapshot, strings(&["tenant two"]));

    backend.release_reads(&key(t1));
    sleep(Duration::from_secs(1)).await;
    assert_eq!(*binder.snapshot(), strings(&["tenant two"]));
    assert!(!binder.is_loading());

    binder.set(strings(&["tenant two", "edited"]));
    sleep(Duration::from_secs(1)).await;
    assert_eq!(stored(&backend, t1), Some(strings(&["tenant one"])));
    assert_eq!(
        stored(&backend, t2),
        Some(strings(&["tenant two", "edited"]))
    );
}

#[tokio::test(start_paused = true)]
async fn switching_tenant_hides_previous_snapshot_immediately() {
    let backend = MemoryBackend::new();
    let (t1, t2) = (Some(TenantId(1)), Some(TenantId(2)));
    seed(&backend, t1, &["tenant one"]);
    let binder = binder(&backend, t1);
    binder.wait_ready().await;
    assert_eq!(*binder.snapshot(), strings(&["tenant one"]));

    backend.hold_reads(&key(t2));
    let (snapshot, _setter, loading) = binder.observe(t2);
    assert!(loading);
    assert_eq!(*snapshot, strings(&["initial"]));
    assert!(!binder.is_fresh());

    backend.release_reads(&key(t2));
    let view = binder.wait_ready().await;
    assert_eq!(*view.snapshot, strings(&["initial"]));
}

#[tokio::test(start_paused = true)]
async fn rapid_writes_collapse_into_one_save() {
    let backend = MemoryBackend::new();
    let binder = binder(&backend, Some(TenantId(4)));
    binder.wait_ready().await;
    let setter = binder.setter();

    setter.set(strings(&["a"]));
    sleep(Duration::from_millis(50)).await;
    setter.set(strings(&["a", "b"]));
    sleep(Duration::from_millis(50)).await;
    setter.set(strings(&["a", "b", "c"]));
    sleep(Duration::from_millis(500)).await;

    let log = backend.write_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].key, key(Some(TenantId(4))));
    let saved: Vec<String> = serde_json::from_slice(&log[0].payload).expect("payload");
    assert_eq!(saved, strings(&["a", "b", "c"]));
    assert!(matches!(binder.last_save(), Some(SaveAck::Persisted { .. })));
}

#[tokio::test(start_paused = true)]
async fn failed_load_falls_back_to_initial_value() {
    let backend = MemoryBackend::new();
    seed(&backend, Some(TenantId(1)), &["unreachable"]);
    backend.fail_reads(true);

    let binder = binder(&backend, Some(TenantId(1)));
    let view = binder.wait_ready().await;
    assert!(!view.is_loading);
    assert_eq!(*view.snapshot, strings(&["initial"]));
}

#[tokio::test(start_paused = true)]
async fn failed_save_keeps_snapshot_and_reports_outcome() {
    let backend = MemoryBackend::new();
    let binder = binder(&backend, Some(TenantId(1)));
    binder.wait_ready().await;
    backend.fail_writes(true);

    binder.set(strings(&["kept in memory"]));
    backend.wait_for_writes(1).await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(*binder.snapshot(), strings(&["kept in memory"]));
    match binder.last_save() {
        Some(SaveAck::Failed { code, .. }) => assert_eq!(code, SyndicErrorCode::Unavailable),
        other => panic!("expected failed save, got {other:?}"),
    }
    assert_eq!(backend.write_count(), 1);

    backend.fail_writes(false);
    binder.set(strings(&["kept in memory", "retried by next edit"]));
    backend.wait_for_writes(2).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(
        stored(&backend, Some(TenantId(1))),
        Some(strings(&["kept in memory", "retried by next edit"]))
    );
}

#[tokio::test(start_paused = true)]
async fn switching_tenant_cancels_pending_save() {
    let backend = MemoryBackend::new();
    let binder = binder(&backend, Some(TenantId(1)));
    binder.wait_ready().await;

    binder.set(strings(&["draft for tenant one"]));
    binder.set_tenant(Some(TenantId(2)));
    binder.wait_ready().await;
    sleep(Duration::from_secs(1)).await;

    assert_eq!(backend.write_count(), 0);
    assert_eq!(*binder.snapshot(), strings(&["initial"]));
}

#[tokio::test(start_paused = true)]
async fn teardown_discards_pending_save() {
    let backend = MemoryBackend::new();
    let binder = binder(&backend, None);
    binder.wait_ready().await;
    binder.set(strings(&["never persisted"]));
    binder.close();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn flush_saves_without_waiting_for_the_window() {
    let backend = MemoryBackend::new();
    let binder = binder(&backend, None);
    binder.wait_ready().await;
    assert_eq!(binder.flush().await, None);

    binder.set(strings(&["now"]));
    let ack = binder.flush().await.expect("pending save");
    assert!(matches!(ack, SaveAck::Persisted { .. }), "{ack:?}");
    assert_eq!(stored(&backend, None), Some(strings(&["now"])));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn subscribers_observe_loading_transitions() {
    let backend = MemoryBackend::new();
    seed(&backend, Some(TenantId(7)), &["loaded"]);
    let binder = binder(&backend, Some(TenantId(7)));
    let mut views = binder.subscribe();
    assert!(views.borrow().is_loading);

    views.changed().await.expect("view change");
    let view = views.borrow_and_update().clone();
    assert!(!view.is_loading);
    assert_eq!(*view.snapshot, strings(&["loaded"]));
}
