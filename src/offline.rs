//! Offline maintenance of a store directory that no backend has open.
//!
//! A dump is a JSON envelope holding every collection of every keyspace as
//! decoded JSON plus a SHA-256 checksum of that state. Restoring a dump into
//! an empty directory and re-exporting it yields the same checksum.

use crate::config::{SyndicConfig, is_valid_keyspace_name};
use crate::error::SyndicError;
use crate::key::CollectionKey;
use crate::lib_helpers::{
    COLLECTION_FILE_SUFFIX, collection_file_name, create_private_dir_all, key_from_file_name,
    now_micros,
};
use crate::manifest::atomic::{
    MANIFEST_FILE, MANIFEST_PREV_FILE, load_manifest, write_manifest_atomic,
};
use crate::manifest::schema::{MANIFEST_FORMAT_VERSION, StoreManifest};
use crate::storage::file::{list_keyspace_keys, read_collection_file, write_collection_file};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const DUMP_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpEnvelope {
    pub version: u32,
    pub exported_at_micros: u64,
    pub state: DumpState,
    pub parity_checksum_hex: String,
}

/// Keyspace name → collection key → decoded collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DumpState {
    pub schema_version: u32,
    pub keyspaces: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DumpReport {
    pub schema_version: u32,
    pub parity_checksum_hex: String,
    pub keyspaces: u64,
    pub collections: u64,
    pub records: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParityReport {
    pub expected_checksum_hex: String,
    pub actual_checksum_hex: String,
    pub matches: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvariantReport {
    pub ok: bool,
    pub keyspace_count: u64,
    pub collection_count: u64,
    pub record_count: u64,
    pub violations: Vec<String>,
}

pub fn export_dump(
    data_dir: &Path,
    config: &SyndicConfig,
    out_path: &Path,
) -> Result<DumpReport, SyndicError> {
    let state = read_state(data_dir, config)?;
    let parity_checksum_hex = checksum_state(&state)?;
    let report = summarize_state(&state, parity_checksum_hex.clone());
    let envelope = DumpEnvelope {
        version: DUMP_FORMAT_VERSION,
        exported_at_micros: now_micros(),
        state,
        parity_checksum_hex,
    };
    let bytes =
        serde_json::to_vec_pretty(&envelope).map_err(|e| SyndicError::Encode(e.to_string()))?;
    fs::write(out_path, bytes)?;
    info!(
        dir = %data_dir.display(),
        out = %out_path.display(),
        collections = report.collections,
        "store dump exported"
    );
    Ok(report)
}

pub fn restore_dump(
    dump_path: &Path,
    data_dir: &Path,
    config: &SyndicConfig,
) -> Result<DumpReport, SyndicError> {
    let envelope = load_dump(dump_path)?;
    if envelope.version != DUMP_FORMAT_VERSION {
        return Err(SyndicError::Validation(format!(
            "unsupported dump format version: {}",
            envelope.version
        )));
    }
    let expected = checksum_state(&envelope.state)?;
    if expected != envelope.parity_checksum_hex {
        return Err(SyndicError::Validation("dump parity checksum mismatch".into()));
    }
    if let Some(bad) = envelope
        .state
        .keyspaces
        .keys()
        .find(|k| !is_valid_keyspace_name(k))
    {
        return Err(SyndicError::Validation(format!(
            "dump names invalid keyspace '{bad}'"
        )));
    }
    if data_dir.exists() && fs::read_dir(data_dir)?.next().is_some() {
        return Err(SyndicError::Validation(
            "restore target directory must be empty".into(),
        ));
    }
    create_private_dir_all(data_dir)?;

    for (keyspace, collections) in &envelope.state.keyspaces {
        let keyspace_dir = data_dir.join(keyspace);
        create_private_dir_all(&keyspace_dir)?;
        for (raw_key, collection) in collections {
            let key = CollectionKey::from_stored(raw_key)?;
            if !collection.is_array() {
                return Err(SyndicError::Validation(format!(
                    "dump collection '{key}' is not an array"
                )));
            }
            let json =
                serde_json::to_vec(collection).map_err(|e| SyndicError::Encode(e.to_string()))?;
            write_collection_file(&keyspace_dir, key.as_str(), 0, json, config)?;
        }
    }
    let now = now_micros();
    let manifest = StoreManifest {
        format_version: MANIFEST_FORMAT_VERSION,
        schema_version: envelope.state.schema_version,
        keyspaces: envelope.state.keyspaces.keys().cloned().collect(),
        created_at_micros: now,
        upgraded_at_micros: now,
    };
    write_manifest_atomic(&manifest, data_dir, config.durability_mode)?;

    let restored = read_state(data_dir, config)?;
    let actual = checksum_state(&restored)?;
    if actual != envelope.parity_checksum_hex {
        return Err(SyndicError::Validation(
            "restored state parity mismatch".into(),
        ));
    }
    Ok(summarize_state(&restored, actual))
}

pub fn parity_report(
    dump_path: &Path,
    data_dir: &Path,
    config: &SyndicConfig,
) -> Result<ParityReport, SyndicError> {
    let envelope = load_dump(dump_path)?;
    let actual_checksum_hex = checksum_state(&read_state(data_dir, config)?)?;
    Ok(ParityReport {
        matches: envelope.parity_checksum_hex == actual_checksum_hex,
        expected_checksum_hex: envelope.parity_checksum_hex,
        actual_checksum_hex,
    })
}

/// Inspects every collection file without failing on the first bad one.
pub fn invariant_report(
    data_dir: &Path,
    config: &SyndicConfig,
) -> Result<InvariantReport, SyndicError> {
    let manifest = require_manifest(data_dir, config)?;
    let mut violations = Vec::new();
    let mut collection_count = 0u64;
    let mut record_count = 0u64;

    if manifest.schema_version == 0 {
        violations.push("manifest was reconstructed; schema version unknown".to_string());
    }
    if manifest.schema_version > config.schema_version {
        violations.push(format!(
            "stored schema version {} is newer than configured {}",
            manifest.schema_version, config.schema_version
        ));
    }
    for keyspace in &config.keyspaces {
        if !manifest.has_keyspace(keyspace) {
            violations.push(format!("configured keyspace '{keyspace}' missing from manifest"));
        }
    }

    for keyspace in &manifest.keyspaces {
        let keyspace_dir = data_dir.join(keyspace);
        if !keyspace_dir.is_dir() {
            violations.push(format!("keyspace directory missing: {keyspace}"));
            continue;
        }
        for entry in fs::read_dir(&keyspace_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(".tmp") {
                violations.push(format!("interrupted write left in {keyspace}: {name}"));
                continue;
            }
            if !name.ends_with(COLLECTION_FILE_SUFFIX) {
                violations.push(format!("unexpected file in {keyspace}: {name}"));
                continue;
            }
            let Some(raw) = key_from_file_name(&name) else {
                violations.push(format!("undecodable file name in {keyspace}: {name}"));
                continue;
            };
            let key = match CollectionKey::from_stored(&raw) {
                Ok(key) => key,
                Err(err) => {
                    violations.push(format!("invalid key in {keyspace}: {err}"));
                    continue;
                }
            };
            if collection_file_name(key.as_str()) != name {
                violations.push(format!("non-canonical file name for '{key}' in {keyspace}"));
            }
            collection_count = collection_count.saturating_add(1);
            let decoded =
                read_collection_file(&entry.path(), key.as_str(), config.max_collection_bytes)
                    .and_then(decode_json);
            match decoded {
                Ok(Some(serde_json::Value::Array(items))) => {
                    record_count = record_count.saturating_add(items.len() as u64);
                }
                Ok(Some(_)) => {
                    violations.push(format!("collection '{key}' in {keyspace} is not an array"))
                }
                Ok(None) => {}
                Err(err) => violations.push(format!(
                    "collection '{key}' in {keyspace} unreadable: {err}"
                )),
            }
        }
    }

    Ok(InvariantReport {
        ok: violations.is_empty(),
        keyspace_count: manifest.keyspaces.len() as u64,
        collection_count,
        record_count,
        violations,
    })
}

/// Deletes every keyspace directory and the manifest. The directory itself stays.
pub fn reset_store(data_dir: &Path, config: &SyndicConfig) -> Result<(), SyndicError> {
    let Some(manifest) = load_manifest(data_dir, config.strict_recovery())? else {
        return Ok(());
    };
    for keyspace in &manifest.keyspaces {
        let keyspace_dir = data_dir.join(keyspace);
        match fs::remove_dir_all(&keyspace_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    for file in [MANIFEST_FILE, MANIFEST_PREV_FILE] {
        match fs::remove_file(data_dir.join(file)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    warn!(
        dir = %data_dir.display(),
        keyspaces = manifest.keyspaces.len(),
        "collection store reset"
    );
    Ok(())
}

fn require_manifest(data_dir: &Path, config: &SyndicConfig) -> Result<StoreManifest, SyndicError> {
    load_manifest(data_dir, config.strict_recovery())?.ok_or_else(|| SyndicError::Unavailable {
        message: format!("no collection store at {}", data_dir.display()),
    })
}

fn read_state(data_dir: &Path, config: &SyndicConfig) -> Result<DumpState, SyndicError> {
    let manifest = require_manifest(data_dir, config)?;
    let mut keyspaces = BTreeMap::new();
    for keyspace in &manifest.keyspaces {
        let keyspace_dir = data_dir.join(keyspace);
        let mut collections = BTreeMap::new();
        if keyspace_dir.is_dir() {
            for key in list_keyspace_keys(&keyspace_dir)? {
                let path = keyspace_dir.join(collection_file_name(key.as_str()));
                if let Some(value) = decode_json(read_collection_file(
                    &path,
                    key.as_str(),
                    config.max_collection_bytes,
                )?)? {
                    collections.insert(key.as_str().to_string(), value);
                }
            }
        }
        keyspaces.insert(keyspace.clone(), collections);
    }
    Ok(DumpState {
        schema_version: manifest.schema_version,
        keyspaces,
    })
}

fn decode_json(bytes: Option<Vec<u8>>) -> Result<Option<serde_json::Value>, SyndicError> {
    bytes
        .map(|bytes| serde_json::from_slice(&bytes).map_err(|e| SyndicError::Decode(e.to_string())))
        .transpose()
}

fn load_dump(path: &Path) -> Result<DumpEnvelope, SyndicError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| SyndicError::Decode(e.to_string()))
}

fn checksum_state(state: &DumpState) -> Result<String, SyndicError> {
    let bytes = serde_json::to_vec(state).map_err(|e| SyndicError::Encode(e.to_string()))?;
    let mut h = Sha256::new();
    h.update(&bytes);
    Ok(hex::encode(h.finalize()))
}

fn summarize_state(state: &DumpState, parity_checksum_hex: String) -> DumpReport {
    let mut collections = 0u64;
    let mut records = 0u64;
    for keyspace in state.keyspaces.values() {
        collections = collections.saturating_add(keyspace.len() as u64);
        for collection in keyspace.values() {
            let len = collection.as_array().map_or(0, Vec::len);
            records = records.saturating_add(len as u64);
        }
    }
    DumpReport {
        schema_version: state.schema_version,
        parity_checksum_hex,
        keyspaces: state.keyspaces.len() as u64,
        collections,
        records,
    }
}
