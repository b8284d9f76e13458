pub mod atomic;
pub mod schema;

use crate::config::SyndicConfig;
use crate::error::SyndicError;
use crate::lib_helpers::now_micros;
use schema::StoreManifest;

/// Outcome of reconciling the stored manifest with the requested config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPlan {
    pub manifest: StoreManifest,
    /// Keyspaces that must be created on disk.
    pub added_keyspaces: Vec<String>,
    pub needs_write: bool,
}

/// Upgrades only ever add keyspaces; existing ones and their data are kept
/// even when the config no longer lists them. Reopening with the same schema
/// version changes nothing.
pub fn reconcile_manifest(
    existing: Option<StoreManifest>,
    config: &SyndicConfig,
) -> Result<ManifestPlan, SyndicError> {
    let now = now_micros();
    let Some(mut manifest) = existing else {
        let manifest = StoreManifest {
            schema_version: config.schema_version,
            keyspaces: config.keyspaces.iter().cloned().collect(),
            created_at_micros: now,
            upgraded_at_micros: now,
            ..StoreManifest::default()
        };
        return Ok(ManifestPlan {
            added_keyspaces: manifest.keyspaces.iter().cloned().collect(),
            manifest,
            needs_write: true,
        });
    };

    if manifest.schema_version > config.schema_version {
        return Err(SyndicError::VersionDowngrade {
            stored: manifest.schema_version,
            requested: config.schema_version,
        });
    }
    if manifest.schema_version == config.schema_version {
        return Ok(ManifestPlan {
            manifest,
            added_keyspaces: Vec::new(),
            needs_write: false,
        });
    }

    let mut added_keyspaces = Vec::new();
    for keyspace in &config.keyspaces {
        if manifest.keyspaces.insert(keyspace.clone()) {
            added_keyspaces.push(keyspace.clone());
        }
    }
    manifest.schema_version = config.schema_version;
    manifest.upgraded_at_micros = now;
    if manifest.created_at_micros == 0 {
        manifest.created_at_micros = now;
    }
    Ok(ManifestPlan {
        manifest,
        added_keyspaces,
        needs_write: true,
    })
}
