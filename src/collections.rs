use crate::key::{LogicalName, TenantId};
use std::fmt;

/// Whether a collection lives in the shared partition or in each member's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionScope {
    Global,
    PerTenant,
}

/// The logical collections the application persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectionName {
    Members,
    AdminSettings,
    Residents,
    Payments,
    Shops,
    ShopPayments,
    Expenses,
    JanitorApartments,
    JanitorPayments,
    BankTransactions,
}

impl CollectionName {
    pub const ALL: [CollectionName; 10] = [
        CollectionName::Members,
        CollectionName::AdminSettings,
        CollectionName::Residents,
        CollectionName::Payments,
        CollectionName::Shops,
        CollectionName::ShopPayments,
        CollectionName::Expenses,
        CollectionName::JanitorApartments,
        CollectionName::JanitorPayments,
        CollectionName::BankTransactions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CollectionName::Members => "members_data",
            CollectionName::AdminSettings => "admin_settings",
            CollectionName::Residents => "residents_data",
            CollectionName::Payments => "payments_data",
            CollectionName::Shops => "shops_data",
            CollectionName::ShopPayments => "shop_payments_data",
            CollectionName::Expenses => "expenses_data",
            CollectionName::JanitorApartments => "janitor_apartments_data",
            CollectionName::JanitorPayments => "janitor_rental_payments_data",
            CollectionName::BankTransactions => "bank_transactions_data",
        }
    }

    pub fn scope(self) -> CollectionScope {
        match self {
            CollectionName::Members | CollectionName::AdminSettings => CollectionScope::Global,
            _ => CollectionScope::PerTenant,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    pub fn logical_name(self) -> LogicalName {
        LogicalName::from_static(self.as_str())
    }

    /// Tenant a binder of this collection should use for `session_tenant`.
    pub fn tenant_for(self, session_tenant: Option<TenantId>) -> Option<TenantId> {
        match self.scope() {
            CollectionScope::Global => None,
            CollectionScope::PerTenant => session_tenant,
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
