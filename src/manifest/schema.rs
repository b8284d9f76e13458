use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const MANIFEST_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreManifest {
    pub format_version: u32,
    /// Zero when the manifest was rebuilt from the directory layout.
    pub schema_version: u32,
    pub keyspaces: BTreeSet<String>,
    #[serde(default)]
    pub created_at_micros: u64,
    #[serde(default)]
    pub upgraded_at_micros: u64,
}

impl Default for StoreManifest {
    fn default() -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            schema_version: 0,
            keyspaces: BTreeSet::new(),
            created_at_micros: 0,
            upgraded_at_micros: 0,
        }
    }
}

impl StoreManifest {
    pub fn has_keyspace(&self, keyspace: &str) -> bool {
        self.keyspaces.contains(keyspace)
    }
}
