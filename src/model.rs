//! Record types stored in each collection.
//!
//! Field names serialize in camelCase and optional fields are omitted when
//! absent, so stored collections stay readable by any client that wrote them.
//! Dates are kept as the ISO-8601 strings the client entered; months as
//! `YYYY-MM`.

use serde::{Deserialize, Serialize};

pub type RecordId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Pending,
    Approved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: RecordId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub status: MemberStatus,
    pub request_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewal_date: Option<String>,
}

pub const DEFAULT_ADMIN_CODE: &str = "1974";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSettings {
    pub admin_code: String,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            admin_code: DEFAULT_ADMIN_CODE.to_string(),
        }
    }
}

/// Owner or tenant of an apartment. Stored as the Arabic labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResidentType {
    #[serde(rename = "مالك")]
    Owner,
    #[serde(rename = "مكتري")]
    Renter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resident {
    pub id: RecordId,
    pub full_name: String,
    pub resident_type: ResidentType,
    pub building_number: String,
    pub apartment_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub id: RecordId,
    pub owner_name: String,
    pub building_number: String,
    pub shop_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// Monthly contribution. Shop payments reuse this shape with `resident_id`
/// holding the shop id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: RecordId,
    pub resident_id: RecordId,
    pub contribution_month: String,
    pub amount: f64,
    pub payment_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: RecordId,
    pub name: String,
    pub amount: f64,
    pub person_in_charge: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    /// Base64 image data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JanitorApartment {
    pub id: RecordId,
    pub building_number: String,
    pub apartment_number: String,
    pub tenant_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_phone_number: Option<String>,
    pub rent_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JanitorPayment {
    pub id: RecordId,
    pub apartment_id: RecordId,
    pub payment_month: String,
    pub amount_paid: f64,
    pub payment_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankTransaction {
    pub id: RecordId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub person: String,
    pub subject: String,
    pub amount: f64,
    pub date: String,
    /// Base64 image data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_image: Option<String>,
}
