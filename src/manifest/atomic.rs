use crate::config::{DurabilityMode, is_valid_keyspace_name};
use crate::error::SyndicError;
use crate::lib_helpers::fsync_dir;
use crate::manifest::schema::StoreManifest;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::warn;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_PREV_FILE: &str = "manifest.json.prev";

pub fn write_manifest_atomic(
    manifest: &StoreManifest,
    dir: &Path,
    durability: DurabilityMode,
) -> Result<(), SyndicError> {
    fs::create_dir_all(dir)?;
    let primary = dir.join(MANIFEST_FILE);
    let prev = dir.join(MANIFEST_PREV_FILE);

    if primary.exists() {
        let data = fs::read(&primary)?;
        fs::write(&prev, data)?;
        if durability == DurabilityMode::Full {
            fs::File::open(&prev)?.sync_all()?;
        }
    }

    let mut tmp = NamedTempFile::new_in(dir)?;
    let bytes =
        serde_json::to_vec_pretty(manifest).map_err(|e| SyndicError::Encode(e.to_string()))?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    if durability == DurabilityMode::Full {
        tmp.as_file().sync_all()?;
    }
    tmp.persist(&primary).map_err(|e| SyndicError::Io(e.error))?;
    fsync_dir(dir, durability)?;
    Ok(())
}

/// Loads the manifest, falling back to the previous copy.
///
/// Returns `Ok(None)` for a directory that never had a manifest. A copy that
/// names an invalid keyspace counts as unreadable. When neither copy is
/// usable, strict recovery fails and permissive recovery rebuilds the
/// keyspace set from the directory layout.
pub fn load_manifest(dir: &Path, strict_recovery: bool) -> Result<Option<StoreManifest>, SyndicError> {
    let primary = dir.join(MANIFEST_FILE);
    let prev = dir.join(MANIFEST_PREV_FILE);
    if !primary.exists() && !prev.exists() {
        return Ok(None);
    }

    match try_read_manifest(&primary) {
        Ok(m) => return Ok(Some(m)),
        Err(err) => warn!(error = %err, path = %primary.display(), "primary manifest unreadable"),
    }
    match try_read_manifest(&prev) {
        Ok(m) => return Ok(Some(m)),
        Err(err) => warn!(error = %err, path = %prev.display(), "previous manifest unreadable"),
    }

    if strict_recovery {
        return Err(SyndicError::Unavailable {
            message: "manifest unavailable and reconstruction disabled".into(),
        });
    }
    reconstruct_manifest(dir).map(Some)
}

fn try_read_manifest(path: &Path) -> Result<StoreManifest, SyndicError> {
    let bytes = fs::read(path)?;
    let manifest: StoreManifest =
        serde_json::from_slice(&bytes).map_err(|e| SyndicError::Decode(e.to_string()))?;
    // keyspace names become directory names under the store root
    if let Some(bad) = manifest.keyspaces.iter().find(|k| !is_valid_keyspace_name(k)) {
        return Err(SyndicError::IntegrityError {
            message: format!("manifest lists invalid keyspace '{bad}'"),
        });
    }
    Ok(manifest)
}

fn reconstruct_manifest(dir: &Path) -> Result<StoreManifest, SyndicError> {
    let mut manifest = StoreManifest::default();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if is_valid_keyspace_name(&name) {
            manifest.keyspaces.insert(name);
        }
    }
    warn!(
        keyspaces = manifest.keyspaces.len(),
        "manifest reconstructed from directory layout"
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::{MANIFEST_FILE, MANIFEST_PREV_FILE, load_manifest, write_manifest_atomic};
    use crate::config::DurabilityMode;
    use crate::manifest::schema::StoreManifest;
    use tempfile::tempdir;

    fn manifest(version: u32, keyspaces: &[&str]) -> StoreManifest {
        StoreManifest {
            schema_version: version,
            keyspaces: keyspaces.iter().map(|k| k.to_string()).collect(),
            ..StoreManifest::default()
        }
    }

    #[test]
    fn manifest_roundtrip_and_prev_fallback() {
        let dir = tempdir().expect("temp");
        let m1 = manifest(4, &["central_kv_store"]);
        write_manifest_atomic(&m1, dir.path(), DurabilityMode::Full).expect("write 1");
        let m2 = manifest(5, &["central_kv_store", "archive"]);
        write_manifest_atomic(&m2, dir.path(), DurabilityMode::Full).expect("write 2");

        let loaded = load_manifest(dir.path(), true).expect("load").expect("present");
        assert_eq!(loaded, m2);

        std::fs::write(dir.path().join(MANIFEST_FILE), b"{broken").expect("corrupt primary");
        let fallback = load_manifest(dir.path(), true).expect("fallback").expect("present");
        assert_eq!(fallback, m1);
    }

    #[test]
    fn fresh_directory_has_no_manifest() {
        let dir = tempdir().expect("temp");
        assert!(load_manifest(dir.path(), true).expect("load").is_none());
    }

    #[test]
    fn strict_recovery_rejects_reconstruction() {
        let dir = tempdir().expect("temp");
        std::fs::write(dir.path().join(MANIFEST_FILE), b"nope").expect("primary");
        std::fs::write(dir.path().join(MANIFEST_PREV_FILE), b"nope").expect("prev");
        let err = load_manifest(dir.path(), true).expect_err("strict fail");
        assert!(format!("{err}").contains("reconstruction disabled"));
    }

    #[test]
    fn permissive_recovery_collects_keyspace_directories() {
        let dir = tempdir().expect("temp");
        std::fs::write(dir.path().join(MANIFEST_FILE), b"nope").expect("primary");
        std::fs::create_dir(dir.path().join("central_kv_store")).expect("ks1");
        std::fs::create_dir(dir.path().join("archive")).expect("ks2");
        std::fs::create_dir(dir.path().join("not valid")).expect("ignored");
        let m = load_manifest(dir.path(), false)
            .expect("reconstruct")
            .expect("present");
        assert_eq!(m.schema_version, 0);
        assert_eq!(m.keyspaces.len(), 2);
        assert!(m.has_keyspace("archive"));
    }

    #[test]
    fn manifest_naming_a_path_outside_the_store_is_unusable() {
        let dir = tempdir().expect("temp");
        let escaping = manifest(5, &["central_kv_store", ".."]);
        write_manifest_atomic(&escaping, dir.path(), DurabilityMode::OsBuffered).expect("write");
        let err = load_manifest(dir.path(), true).expect_err("strict");
        assert!(format!("{err}").contains("reconstruction disabled"));

        std::fs::create_dir(dir.path().join("central_kv_store")).expect("ks");
        let rebuilt = load_manifest(dir.path(), false)
            .expect("permissive")
            .expect("present");
        assert_eq!(rebuilt.schema_version, 0);
        assert_eq!(
            rebuilt.keyspaces.iter().collect::<Vec<_>>(),
            vec!["central_kv_store"]
        );
    }

    #[test]
    fn invalid_primary_falls_back_to_previous_copy() {
        let dir = tempdir().expect("temp");
        let good = manifest(5, &["central_kv_store"]);
        write_manifest_atomic(&good, dir.path(), DurabilityMode::OsBuffered).expect("write 1");
        let escaping = manifest(6, &["../escape"]);
        write_manifest_atomic(&escaping, dir.path(), DurabilityMode::OsBuffered).expect("write 2");
        let loaded = load_manifest(dir.path(), true).expect("load").expect("present");
        assert_eq!(loaded, good);
    }
}
