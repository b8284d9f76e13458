use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use syndicdb::config::DEFAULT_KEYSPACE;
use syndicdb::model::{BankTransaction, Payment, TransactionKind};
use syndicdb::offline::{DumpEnvelope, DumpState};
use syndicdb::{CollectionStore, LogicalName, SyndicConfig, SyndicErrorCode, TenantId, offline, scope};
use tempfile::tempdir;

async fn populate(dir: &std::path::Path, config: &SyndicConfig) {
    let store = CollectionStore::open(config.clone(), dir).expect("open");
    let payments = LogicalName::new("payments_data").expect("name");
    let bank = LogicalName::new("bank_transactions_data").expect("name");
    for tenant in [1, 2] {
        let rows = vec![Payment {
            id: tenant,
            resident_id: 10 + tenant,
            contribution_month: "2024-01".into(),
            amount: 150.0,
            payment_date: "2024-01-05".into(),
            receipt_number: Some(format!("R-{tenant}")),
        }];
        let ack = store.save(&scope(&payments, Some(TenantId(tenant))), &rows).await;
        assert!(ack.is_acknowledged());
    }
    let tx = vec![BankTransaction {
        id: 1,
        kind: TransactionKind::Deposit,
        person: "treasurer".into(),
        subject: "january dues".into(),
        amount: 300.0,
        date: "2024-01-31".into(),
        receipt_image: None,
    }];
    assert!(store.save(&scope(&bank, Some(TenantId(1))), &tx).await.is_acknowledged());
    store.close().await.expect("close");
}

#[tokio::test]
async fn dump_restore_parity_and_invariants_are_deterministic() {
    let data_dir = tempdir().expect("data");
    let restore_dir = tempdir().expect("restore");
    let dump_dir = tempdir().expect("dump");
    let dump_path = dump_dir.path().join("store_dump.json");
    let config = SyndicConfig::development();
    populate(data_dir.path(), &config).await;

    let export = offline::export_dump(data_dir.path(), &config, &dump_path).expect("export");
    assert_eq!(export.collections, 3);
    assert_eq!(export.records, 3);
    assert!(!export.parity_checksum_hex.is_empty());

    let restored = offline::restore_dump(&dump_path, restore_dir.path(), &config).expect("restore");
    assert_eq!(restored, export);

    let parity = offline::parity_report(&dump_path, restore_dir.path(), &config).expect("parity");
    assert!(parity.matches);

    let invariants = offline::invariant_report(restore_dir.path(), &config).expect("invariants");
    assert!(invariants.ok, "violations: {:?}", invariants.violations);
    assert_eq!(invariants.collection_count, 3);
    assert_eq!(invariants.record_count, 3);

    let store = CollectionStore::open(config, restore_dir.path()).expect("open restored");
    let key = scope(&LogicalName::new("payments_data").expect("name"), Some(TenantId(2)));
    let rows: Vec<Payment> = store.load(&key).await;
    assert_eq!(rows[0].receipt_number.as_deref(), Some("R-2"));
}

#[tokio::test]
async fn tampered_dump_and_non_empty_target_are_rejected() {
    let data_dir = tempdir().expect("data");
    let dump_dir = tempdir().expect("dump");
    let dump_path = dump_dir.path().join("store_dump.json");
    let config = SyndicConfig::development();
    populate(data_dir.path(), &config).await;
    offline::export_dump(data_dir.path(), &config, &dump_path).expect("export");

    let err = offline::restore_dump(&dump_path, data_dir.path(), &config).expect_err("non-empty");
    assert_eq!(err.code(), SyndicErrorCode::Validation);

    let text = fs::read_to_string(&dump_path).expect("read dump");
    fs::write(&dump_path, text.replace("january dues", "february dues")).expect("tamper");
    let target = tempdir().expect("target");
    let err = offline::restore_dump(&dump_path, target.path(), &config).expect_err("tampered");
    assert_eq!(err.code(), SyndicErrorCode::Validation);

    let parity = offline::parity_report(&dump_path, data_dir.path(), &config).expect("parity");
    assert!(parity.matches, "checksum is stored, not recomputed");
}

#[tokio::test]
async fn parity_detects_later_writes() {
    let data_dir = tempdir().expect("data");
    let dump_dir = tempdir().expect("dump");
    let dump_path = dump_dir.path().join("store_dump.json");
    let config = SyndicConfig::development();
    populate(data_dir.path(), &config).await;
    offline::export_dump(data_dir.path(), &config, &dump_path).expect("export");

    let store = CollectionStore::open(config.clone(), data_dir.path()).expect("open");
    let key = scope(&LogicalName::new("shops_data").expect("name"), Some(TenantId(1)));
    assert!(store.save(&key, &[serde_json::json!({"id": 1})]).await.is_acknowledged());
    store.close().await.expect("close");

    let parity = offline::parity_report(&dump_path, data_dir.path(), &config).expect("parity");
    assert!(!parity.matches);
    assert_ne!(parity.expected_checksum_hex, parity.actual_checksum_hex);
}

#[tokio::test]
async fn invariant_report_flags_damaged_files() {
    let data_dir = tempdir().expect("data");
    let config = SyndicConfig::development();
    populate(data_dir.path(), &config).await;

    let keyspace_dir = data_dir.path().join(DEFAULT_KEYSPACE);
    let victim = fs::read_dir(&keyspace_dir)
        .expect("list")
        .map(|entry| entry.expect("entry").path())
        .find(|path| path.extension().is_some_and(|ext| ext == "col"))
        .expect("collection file");
    fs::write(&victim, b"garbage").expect("damage");
    fs::write(keyspace_dir.join("notes.txt"), b"stray").expect("stray");

    let report = offline::invariant_report(data_dir.path(), &config).expect("report");
    assert!(!report.ok);
    assert_eq!(report.violations.len(), 2, "{:?}", report.violations);
    assert_eq!(report.collection_count, 3);
    assert_eq!(report.record_count, 2);

    let dump_path = data_dir.path().join("dump.json");
    let err = offline::export_dump(data_dir.path(), &config, &dump_path).expect_err("damaged");
    assert_eq!(err.code(), SyndicErrorCode::IntegrityError);
}

#[tokio::test]
async fn reset_store_removes_every_collection() {
    let data_dir = tempdir().expect("data");
    let config = SyndicConfig::development();
    populate(data_dir.path(), &config).await;

    offline::reset_store(data_dir.path(), &config).expect("reset");
    assert!(!data_dir.path().join(DEFAULT_KEYSPACE).exists());
    let err = offline::invariant_report(data_dir.path(), &config).expect_err("no store");
    assert_eq!(err.code(), SyndicErrorCode::Unavailable);

    let store = CollectionStore::open(config, data_dir.path()).expect("fresh open");
    assert!(store.keys().await.expect("keys").is_empty());
}

fn write_signed_dump(path: &std::path::Path, keyspace: &str) {
    let mut collections = BTreeMap::new();
    collections.insert(
        "residents_data".to_string(),
        serde_json::json!([{"id": 1, "fullName": "planted"}]),
    );
    let mut keyspaces = BTreeMap::new();
    keyspaces.insert(keyspace.to_string(), collections);
    let state = DumpState {
        schema_version: 5,
        keyspaces,
    };
    let mut h = Sha256::new();
    h.update(serde_json::to_vec(&state).expect("state json"));
    let envelope = DumpEnvelope {
        version: 1,
        exported_at_micros: 0,
        state,
        parity_checksum_hex: hex::encode(h.finalize()),
    };
    fs::write(path, serde_json::to_vec(&envelope).expect("dump json")).expect("write dump");
}

#[tokio::test]
async fn restore_refuses_keyspaces_that_leave_the_target() {
    let parent = tempdir().expect("parent");
    let target = parent.path().join("store");
    let sibling = parent.path().join("sibling");
    fs::create_dir(&sibling).expect("sibling dir");
    fs::write(sibling.join("file.txt"), b"keep me").expect("sibling file");
    let dump_path = parent.path().join("dump.json");
    let config = SyndicConfig::development();

    for keyspace in ["..", "../sibling", ""] {
        write_signed_dump(&dump_path, keyspace);
        let err = offline::restore_dump(&dump_path, &target, &config).expect_err("escaping keyspace");
        assert_eq!(err.code(), SyndicErrorCode::Validation, "{keyspace:?}");
        assert!(!target.exists(), "{keyspace:?}");
    }

    let mut entries: Vec<_> = fs::read_dir(parent.path())
        .expect("list parent")
        .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
        .collect();
    entries.sort();
    assert_eq!(entries, vec!["dump.json", "sibling"]);
    assert_eq!(fs::read_dir(&sibling).expect("list sibling").count(), 1);

    write_signed_dump(&dump_path, "archive");
    let report = offline::restore_dump(&dump_path, &target, &config).expect("valid keyspace");
    assert_eq!(report.collections, 1);
}

#[tokio::test]
async fn reset_ignores_manifest_keyspaces_outside_the_store() {
    let parent = tempdir().expect("parent");
    let data_dir = parent.path().join("store");
    let sibling = parent.path().join("sibling");
    fs::create_dir(&sibling).expect("sibling dir");
    fs::write(sibling.join("file.txt"), b"keep me").expect("sibling file");
    let config = SyndicConfig::development();
    populate(&data_dir, &config).await;

    let manifest = serde_json::json!({
        "format_version": 1,
        "schema_version": 5,
        "keyspaces": ["..", DEFAULT_KEYSPACE],
    });
    fs::write(
        data_dir.join("manifest.json"),
        serde_json::to_vec(&manifest).expect("json"),
    )
    .expect("plant manifest");
    let _ = fs::remove_file(data_dir.join("manifest.json.prev"));

    let err = offline::reset_store(&data_dir, &SyndicConfig::production()).expect_err("strict");
    assert_eq!(err.code(), SyndicErrorCode::Unavailable);

    offline::reset_store(&data_dir, &config).expect("permissive reset");
    assert!(!data_dir.join(DEFAULT_KEYSPACE).exists());
    assert!(data_dir.exists());
    assert_eq!(
        fs::read(sibling.join("file.txt")).expect("sibling survives"),
        b"keep me"
    );
}
