use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyndicErrorCode {
    Io,
    Encode,
    Decode,
    Validation,
    InvalidConfig,
    InvalidKey,
    IntegrityError,
    Unavailable,
    Closed,
    VersionDowngrade,
    KeyspaceNotFound,
    PayloadTooLarge,
}

impl SyndicErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyndicErrorCode::Io => "io",
            SyndicErrorCode::Encode => "encode",
            SyndicErrorCode::Decode => "decode",
            SyndicErrorCode::Validation => "validation",
            SyndicErrorCode::InvalidConfig => "invalid_config",
            SyndicErrorCode::InvalidKey => "invalid_key",
            SyndicErrorCode::IntegrityError => "integrity_error",
            SyndicErrorCode::Unavailable => "unavailable",
            SyndicErrorCode::Closed => "closed",
            SyndicErrorCode::VersionDowngrade => "version_downgrade",
            SyndicErrorCode::KeyspaceNotFound => "keyspace_not_found",
            SyndicErrorCode::PayloadTooLarge => "payload_too_large",
        }
    }
}

impl std::fmt::Display for SyndicErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SyndicError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("invalid collection key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("integrity error: {message}")]
    IntegrityError { message: String },
    #[error("storage unavailable: {message}")]
    Unavailable { message: String },
    #[error("store closed")]
    Closed,
    #[error("schema version downgrade: stored {stored}, requested {requested}")]
    VersionDowngrade { stored: u32, requested: u32 },
    #[error("keyspace '{keyspace}' not found")]
    KeyspaceNotFound { keyspace: String },
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl SyndicError {
    pub fn code(&self) -> SyndicErrorCode {
        match self {
            SyndicError::Io(_) => SyndicErrorCode::Io,
            SyndicError::Encode(_) => SyndicErrorCode::Encode,
            SyndicError::Decode(_) => SyndicErrorCode::Decode,
            SyndicError::Validation(_) => SyndicErrorCode::Validation,
            SyndicError::InvalidConfig { .. } => SyndicErrorCode::InvalidConfig,
            SyndicError::InvalidKey { .. } => SyndicErrorCode::InvalidKey,
            SyndicError::IntegrityError { .. } => SyndicErrorCode::IntegrityError,
            SyndicError::Unavailable { .. } => SyndicErrorCode::Unavailable,
            SyndicError::Closed => SyndicErrorCode::Closed,
            SyndicError::VersionDowngrade { .. } => SyndicErrorCode::VersionDowngrade,
            SyndicError::KeyspaceNotFound { .. } => SyndicErrorCode::KeyspaceNotFound,
            SyndicError::PayloadTooLarge { .. } => SyndicErrorCode::PayloadTooLarge,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
