use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::services::store::{self, OptionStore};

/// Scopes requested when the operator has not configured their own set.
pub const DEFAULT_SCOPES: &str =
    "offline_access accounting.transactions accounting.settings openid profile email";

/// A WooPayments payout. The platform's REST surface calls these "deposits";
/// the wire shape varies between releases, so deserialization is lenient:
/// unknown fields are ignored and `amount` accepts a number or numeric string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Deposit {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "de_stringy")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "de_stringy")]
    pub created: Option<String>,
    #[serde(default, deserialize_with = "de_stringy")]
    pub arrival_date: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "de_minor_units")]
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    /// Secondary identifier older wc-admin links use instead of the payout id.
    #[serde(
        default,
        alias = "bankReferenceId",
        alias = "bank_reference_id",
        alias = "bankReference"
    )]
    pub bank_reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Error,
}

/// Last-write-wins per payout id; overwritten on every delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryState {
    pub state: DeliveryStatus,
    pub updated_at: DateTime<Utc>,
}

/// Permanent link between a payout and the Xero invoice created for it.
/// Written only after a successful invoice creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceMeta {
    pub invoice_id: String,
    pub invoice_number: String,
    pub updated_at: DateTime<Utc>,
}

/// The single global Xero token record. The refresh token is the durable
/// credential; the access token is short-lived derived data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    /// Unix timestamp of issuance, recorded locally at exchange/refresh time.
    #[serde(default)]
    pub created_at: i64,
}

impl TokenSet {
    pub fn expires_at(&self) -> i64 {
        if self.created_at > 0 && self.expires_in > 0 {
            self.created_at + self.expires_in
        } else {
            0
        }
    }

    /// True when a refresh token exists and the access token is within 120
    /// seconds of expiry.
    pub fn needs_refresh(&self, now: i64) -> bool {
        let expires_at = self.expires_at();
        !self.refresh_token.is_empty() && expires_at > 0 && expires_at < now + 120
    }
}

/// Decrypted read-only WooCommerce API key pair used for loopback requests.
#[derive(Debug, Clone)]
pub struct LocalApiCredential {
    pub key_id: String,
    pub consumer_key: String,
    pub consumer_secret: String,
}

/// Organisation lock dates, date-only (`YYYY-MM-DD`). `max_lock` is the later
/// of the two locks, empty when neither is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDates {
    pub period_lock: String,
    pub eoy_lock: String,
    pub max_lock: String,
}

/// Operator-configured settings. Persistence belongs to the surrounding
/// admin surface; this service only reads the blob, merging defaults for
/// anything missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub payout_statuses: String,
    pub xero_client_id: String,
    pub xero_client_secret: String,
    pub xero_scopes: String,
    pub invoice_contact_name: String,
    pub invoice_reference_prefix: String,
    pub invoice_reference_suffix: String,
    pub summary_account_code: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            payout_statuses: "paid".to_string(),
            xero_client_id: String::new(),
            xero_client_secret: String::new(),
            xero_scopes: DEFAULT_SCOPES.to_string(),
            invoice_contact_name: "WooPayments".to_string(),
            invoice_reference_prefix: "WooPay Payout ".to_string(),
            invoice_reference_suffix: String::new(),
            summary_account_code: String::new(),
        }
    }
}

impl Settings {
    pub async fn load(store: &dyn OptionStore) -> Result<Self, AppError> {
        Ok(store::get_as(store, store::keys::SETTINGS)
            .await?
            .unwrap_or_default())
    }
}

/// Result of a delivery attempt, in the shape the operator surface consumes.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: None,
            body: None,
            error: Some(message.into()),
        }
    }
}

/// Invoice payload in Xero's wire shape (PascalCase keys).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Invoice {
    #[serde(rename = "Type")]
    pub invoice_type: String,
    pub status: String,
    pub contact: Contact,
    pub currency_code: String,
    pub date: String,
    pub due_date: String,
    pub reference: String,
    pub line_amount_types: String,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Contact {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_amount: f64,
    pub account_code: String,
}

fn de_stringy<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

fn de_minor_units<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(minor_units_from_value(&value))
}

fn minor_units_from_value(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .or_else(|_| s.parse::<f64>().map(|f| f.round() as i64))
                .unwrap_or(0)
        }
        _ => 0,
    }
}
