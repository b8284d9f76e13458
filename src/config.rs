use crate::error::SyndicError;
use std::time::Duration;

pub const DEFAULT_KEYSPACE: &str = "central_kv_store";
pub const DEFAULT_SCHEMA_VERSION: u32 = 5;
pub const DEFAULT_DEBOUNCE_MS: u64 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// fsync the collection file and its directory before acknowledging.
    Full,
    OsBuffered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    Strict,
    Permissive,
}

/// Runtime configuration for a durable collection store.
#[derive(Debug, Clone)]
pub struct SyndicConfig {
    pub schema_version: u32,
    pub keyspaces: Vec<String>,
    pub default_keyspace: String,
    pub durability_mode: DurabilityMode,
    pub recovery_mode: RecoveryMode,
    pub max_key_bytes: usize,
    pub max_collection_bytes: usize,
    pub compression_threshold_bytes: usize,
    pub compression_level: i32,
}

impl Default for SyndicConfig {
    fn default() -> Self {
        Self {
            schema_version: DEFAULT_SCHEMA_VERSION,
            keyspaces: vec![DEFAULT_KEYSPACE.to_string()],
            default_keyspace: DEFAULT_KEYSPACE.to_string(),
            durability_mode: DurabilityMode::Full,
            recovery_mode: RecoveryMode::Strict,
            max_key_bytes: 512,
            max_collection_bytes: 64 * 1024 * 1024,
            compression_threshold_bytes: 64 * 1024,
            compression_level: 3,
        }
    }
}

impl SyndicConfig {
    pub fn production() -> Self {
        Self {
            durability_mode: DurabilityMode::Full,
            recovery_mode: RecoveryMode::Strict,
            ..Self::default()
        }
    }

    /// Skips fsync and rebuilds a damaged manifest from the directory layout.
    pub fn development() -> Self {
        Self {
            durability_mode: DurabilityMode::OsBuffered,
            recovery_mode: RecoveryMode::Permissive,
            ..Self::default()
        }
    }

    pub fn strict_recovery(&self) -> bool {
        matches!(self.recovery_mode, RecoveryMode::Strict)
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Adds a keyspace if it is not configured yet.
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        let keyspace = keyspace.into();
        if !self.keyspaces.contains(&keyspace) {
            self.keyspaces.push(keyspace);
        }
        self
    }

    pub fn with_durability(mut self, mode: DurabilityMode) -> Self {
        self.durability_mode = mode;
        self
    }

    pub fn with_compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold_bytes = bytes;
        self
    }
}

pub fn validate_config(config: &SyndicConfig) -> Result<(), SyndicError> {
    if config.schema_version == 0 {
        return Err(SyndicError::InvalidConfig {
            message: "schema_version must be > 0".into(),
        });
    }
    if config.keyspaces.is_empty() {
        return Err(SyndicError::InvalidConfig {
            message: "at least one keyspace is required".into(),
        });
    }
    for keyspace in &config.keyspaces {
        if !is_valid_keyspace_name(keyspace) {
            return Err(SyndicError::InvalidConfig {
                message: format!("invalid keyspace name '{keyspace}'"),
            });
        }
    }
    if !config.keyspaces.contains(&config.default_keyspace) {
        return Err(SyndicError::InvalidConfig {
            message: format!(
                "default keyspace '{}' is not in keyspaces",
                config.default_keyspace
            ),
        });
    }
    if config.max_key_bytes == 0 {
        return Err(SyndicError::InvalidConfig {
            message: "max_key_bytes must be > 0".into(),
        });
    }
    if config.max_collection_bytes == 0 {
        return Err(SyndicError::InvalidConfig {
            message: "max_collection_bytes must be > 0".into(),
        });
    }
    if !(1..=22).contains(&config.compression_level) {
        return Err(SyndicError::InvalidConfig {
            message: "compression_level must be within 1..=22".into(),
        });
    }
    Ok(())
}

/// Keyspaces become directory names, so they are restricted to a portable set.
pub fn is_valid_keyspace_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Settings for collection binders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinderConfig {
    pub debounce: Duration,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

impl BinderConfig {
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}
