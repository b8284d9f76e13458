use crate::config::DurabilityMode;
use crate::error::SyndicError;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Creates a directory with restrictive permissions (0o700 on Unix) so other
/// local users cannot read tenant collections.
pub(crate) fn create_private_dir_all(path: &Path) -> Result<(), SyndicError> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;
        use std::os::unix::fs::PermissionsExt;

        DirBuilder::new().recursive(true).mode(0o700).create(path)?;
        let metadata = fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(SyndicError::Validation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }
        let mut perms = metadata.permissions();
        if perms.mode() & 0o777 != 0o700 {
            perms.set_mode(0o700);
            fs::set_permissions(path, perms)?;
        }
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

pub(crate) fn fsync_dir(path: &Path, durability: DurabilityMode) -> Result<(), SyndicError> {
    if durability == DurabilityMode::OsBuffered {
        return Ok(());
    }
    #[cfg(unix)]
    {
        let dir = fs::File::open(path)?;
        dir.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// File name of a collection inside its keyspace directory. Keys are hex
/// encoded so tenant separators never reach the file system.
pub(crate) fn collection_file_name(key: &str) -> String {
    format!("{}{COLLECTION_FILE_SUFFIX}", hex::encode(key.as_bytes()))
}

pub(crate) const COLLECTION_FILE_SUFFIX: &str = ".col";

pub(crate) fn key_from_file_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(COLLECTION_FILE_SUFFIX)?;
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}
