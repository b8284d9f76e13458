//! Collection keys and tenant scoping.
//!
//! A collection key is derived from a logical collection name and an optional
//! tenant id. Logical names cannot contain the `:` separator, so the scoped
//! form `tenant:<id>:<name>` never collides with an unscoped name.

use crate::error::SyndicError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TENANT_PREFIX: &str = "tenant:";
pub const MAX_LOGICAL_NAME_BYTES: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub u64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TenantId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalName(String);

impl LogicalName {
    pub fn new(name: impl Into<String>) -> Result<Self, SyndicError> {
        let name = name.into();
        if let Some(reason) = logical_name_violation(&name) {
            return Err(SyndicError::InvalidKey { key: name, reason });
        }
        Ok(Self(name))
    }

    /// For names fixed at compile time.
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(logical_name_violation(name).is_none(), "bad name {name}");
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LogicalName {
    type Error = SyndicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LogicalName> for String {
    fn from(value: LogicalName) -> Self {
        value.0
    }
}

fn logical_name_violation(name: &str) -> Option<String> {
    if name.is_empty() {
        return Some("logical name must not be empty".into());
    }
    if name.len() > MAX_LOGICAL_NAME_BYTES {
        return Some(format!(
            "logical name exceeds {MAX_LOGICAL_NAME_BYTES} bytes"
        ));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Some(format!("character {ch:?} is not allowed"));
    }
    None
}

/// Concrete storage key of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionKey(String);

impl CollectionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Splits a stored key back into its logical name and tenant.
    pub fn parse(raw: &str) -> Result<(LogicalName, Option<TenantId>), SyndicError> {
        let invalid = |reason: &str| SyndicError::InvalidKey {
            key: raw.to_string(),
            reason: reason.to_string(),
        };
        let Some(rest) = raw.strip_prefix(TENANT_PREFIX) else {
            return Ok((LogicalName::new(raw)?, None));
        };
        let (tenant, name) = rest
            .split_once(':')
            .ok_or_else(|| invalid("missing logical name after tenant id"))?;
        let tenant = tenant
            .parse::<u64>()
            .map_err(|_| invalid("tenant id is not an unsigned integer"))?;
        // Reject non-canonical forms like "tenant:007:x" so parse stays the inverse of scope.
        if tenant.to_string().len() != rest.len() - name.len() - 1 {
            return Err(invalid("tenant id is not canonical"));
        }
        Ok((LogicalName::new(name)?, Some(TenantId(tenant))))
    }

    pub fn from_stored(raw: &str) -> Result<Self, SyndicError> {
        let (name, tenant) = Self::parse(raw)?;
        Ok(scope(&name, tenant))
    }

    pub fn tenant(&self) -> Option<TenantId> {
        Self::parse(&self.0).ok().and_then(|(_, tenant)| tenant)
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn scope(name: &LogicalName, tenant: Option<TenantId>) -> CollectionKey {
    match tenant {
        Some(tenant) => CollectionKey(format!("{TENANT_PREFIX}{tenant}:{name}")),
        None => CollectionKey(name.as_str().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::{CollectionKey, LogicalName, TenantId, scope};
    use proptest::prelude::*;

    fn name(raw: &str) -> LogicalName {
        LogicalName::new(raw).expect("valid name")
    }

    #[test]
    fn scoped_and_global_keys_have_expected_shape() {
        let payments = name("payments");
        assert_eq!(scope(&payments, Some(TenantId(7))).as_str(), "tenant:7:payments");
        assert_eq!(scope(&payments, None).as_str(), "payments");
        assert_ne!(scope(&payments, Some(TenantId(7))), scope(&payments, Some(TenantId(8))));
        assert_ne!(scope(&payments, Some(TenantId(7))), scope(&payments, None));
    }

    #[test]
    fn logical_names_reject_separator_and_empty() {
        assert!(LogicalName::new("").is_err());
        assert!(LogicalName::new("tenant:1:residents").is_err());
        assert!(LogicalName::new("a b").is_err());
        assert!(LogicalName::new("x".repeat(200)).is_err());
        assert!(LogicalName::new("janitor_rental_payments_data").is_ok());
    }

    #[test]
    fn parse_rejects_non_canonical_tenant() {
        assert!(CollectionKey::parse("tenant:007:residents").is_err());
        assert!(CollectionKey::parse("tenant:x:residents").is_err());
        assert!(CollectionKey::parse("tenant:5").is_err());
    }

    #[test]
    fn logical_name_deserialization_validates() {
        let ok: LogicalName = serde_json::from_str("\"residents_data\"").expect("valid");
        assert_eq!(ok.as_str(), "residents_data");
        assert!(serde_json::from_str::<LogicalName>("\"a:b\"").is_err());
    }

    proptest! {
        #[test]
        fn scope_is_deterministic_and_parse_inverts_it(
            raw in "[A-Za-z0-9_.-]{1,40}",
            tenant in proptest::option::of(any::<u64>()),
        ) {
            let logical = name(&raw);
            let tenant = tenant.map(TenantId);
            let key = scope(&logical, tenant);
            prop_assert_eq!(&key, &scope(&logical, tenant));
            let (parsed_name, parsed_tenant) = CollectionKey::parse(key.as_str()).expect("parse");
            prop_assert_eq!(parsed_name, logical);
            prop_assert_eq!(parsed_tenant, tenant);
        }

        #[test]
        fn scope_is_injective(
            a in "[A-Za-z0-9_.-]{1,24}",
            b in "[A-Za-z0-9_.-]{1,24}",
            ta in proptest::option::of(0u64..64),
            tb in proptest::option::of(0u64..64),
        ) {
            let ka = scope(&name(&a), ta.map(TenantId));
            let kb = scope(&name(&b), tb.map(TenantId));
            prop_assert_eq!(ka == kb, a == b && ta == tb);
        }
    }
}
