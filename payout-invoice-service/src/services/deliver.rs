//! Delivery orchestration: one payout in, one draft Xero invoice out.
//!
//! Preconditions are checked before any network call; the remote invoice is
//! created first and local bookkeeping (sent state, invoice meta) afterwards,
//! so a failed meta write never rolls back the remote invoice. Delivery-state
//! writes are last-write-wins with no per-key lock; callers that need
//! at-most-one-invoice semantics must serialize per payout id externally.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::{
    Contact, DeliveryOutcome, DeliveryState, DeliveryStatus, Deposit, Invoice, InvoiceMeta,
    LineItem, Settings,
};
use crate::services::store::{self, keys, OptionStore};
use crate::services::wcpay::WooPaymentsClient;
use crate::services::xero::XeroClient;

#[derive(Clone)]
pub struct DeliveryService {
    wcpay: WooPaymentsClient,
    xero: XeroClient,
    store: Arc<dyn OptionStore>,
    fallback_currency: String,
}

impl DeliveryService {
    pub fn new(
        wcpay: WooPaymentsClient,
        xero: XeroClient,
        store: Arc<dyn OptionStore>,
        fallback_currency: String,
    ) -> Self {
        Self {
            wcpay,
            xero,
            store,
            fallback_currency,
        }
    }

    pub async fn deliver(&self, deposit_id: &str) -> Result<DeliveryOutcome, AppError> {
        let settings = Settings::load(self.store.as_ref()).await?;

        if settings.summary_account_code.trim().is_empty() {
            return Ok(DeliveryOutcome::failure(
                "Missing account code. Set \"Account code (required)\" in Settings.",
            ));
        }

        let deposit = self.wcpay.get_deposit_by_id(deposit_id).await?;
        if deposit.id.is_empty() {
            return Ok(DeliveryOutcome::failure(
                "Unable to load payout details from WooPayments.",
            ));
        }

        let invoice = build_invoice(
            &deposit,
            deposit_id,
            &settings,
            &self.fallback_currency,
            Utc::now(),
        );

        if !self.xero.is_connected().await? {
            return Ok(DeliveryOutcome::failure(
                "Xero not connected. Go to Settings and connect to Xero.",
            ));
        }

        let outcome = self.xero.create_invoice(&invoice).await?;

        if outcome.ok {
            self.set_delivery_state(deposit_id, DeliveryStatus::Sent)
                .await?;
            self.store_invoice_meta(deposit_id, outcome.body.as_deref().unwrap_or(""))
                .await?;
            tracing::info!(deposit_id, "Payout delivered to Xero");
        }

        Ok(outcome)
    }

    /// Overwrites the delivery state for one payout id.
    pub async fn set_delivery_state(
        &self,
        deposit_id: &str,
        state: DeliveryStatus,
    ) -> Result<(), AppError> {
        let mut states = self.delivery_states().await?;
        states.insert(
            deposit_id.to_string(),
            DeliveryState {
                state,
                updated_at: Utc::now(),
            },
        );
        store::set_as(self.store.as_ref(), keys::DELIVERY_STATES, &states).await
    }

    pub async fn delivery_states(&self) -> Result<HashMap<String, DeliveryState>, AppError> {
        Ok(
            store::get_as::<HashMap<String, DeliveryState>>(
                self.store.as_ref(),
                keys::DELIVERY_STATES,
            )
            .await?
            .unwrap_or_default(),
        )
    }

    pub async fn invoice_meta(&self) -> Result<HashMap<String, InvoiceMeta>, AppError> {
        Ok(store::get_as::<HashMap<String, InvoiceMeta>>(
            self.store.as_ref(),
            keys::INVOICE_META,
        )
        .await?
        .unwrap_or_default())
    }

    /// Records the invoice id/number out of the creation response. The
    /// container key casing varies between Xero responses, so both are
    /// accepted; an unparseable body still gets a (blank) meta record so the
    /// sent payout stays linked to the attempt.
    async fn store_invoice_meta(&self, deposit_id: &str, raw_body: &str) -> Result<(), AppError> {
        let (invoice_id, invoice_number) = parse_invoice_reference(raw_body);

        let mut meta = self.invoice_meta().await?;
        meta.insert(
            deposit_id.to_string(),
            InvoiceMeta {
                invoice_id,
                invoice_number,
                updated_at: Utc::now(),
            },
        );
        store::set_as(self.store.as_ref(), keys::INVOICE_META, &meta).await
    }
}

fn parse_invoice_reference(raw_body: &str) -> (String, String) {
    let data: Value = match serde_json::from_str(raw_body) {
        Ok(data) => data,
        Err(_) => return (String::new(), String::new()),
    };

    let invoices = data
        .get("Invoices")
        .or_else(|| data.get("invoices"))
        .and_then(Value::as_array);

    match invoices.and_then(|list| list.first()) {
        Some(first) => (
            first
                .get("InvoiceID")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            first
                .get("InvoiceNumber")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        None => (String::new(), String::new()),
    }
}

/// Builds the single-line draft invoice for a payout. Pure so the payload
/// shape is testable without a connection.
pub fn build_invoice(
    deposit: &Deposit,
    deposit_id: &str,
    settings: &Settings,
    fallback_currency: &str,
    now: DateTime<Utc>,
) -> Invoice {
    let amount = deposit.amount as f64 / 100.0;

    let currency = deposit
        .currency
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(fallback_currency)
        .to_uppercase();

    let date = [&deposit.date, &deposit.created, &deposit.arrival_date]
        .into_iter()
        .flatten()
        .find_map(|raw| parse_invoice_date(raw))
        .unwrap_or_else(|| now.date_naive())
        .format("%Y-%m-%d")
        .to_string();

    let contact = match settings.invoice_contact_name.trim() {
        "" => "WooPayments",
        name => name,
    };

    let reference = format!(
        "{}{}{}",
        settings.invoice_reference_prefix, deposit_id, settings.invoice_reference_suffix
    );

    Invoice {
        invoice_type: "ACCREC".to_string(),
        status: "DRAFT".to_string(),
        contact: Contact {
            name: contact.to_string(),
        },
        currency_code: currency,
        due_date: date.clone(),
        date,
        reference,
        line_amount_types: "Inclusive".to_string(),
        line_items: vec![LineItem {
            description: format!("WooPayments payout {}", deposit_id),
            quantity: 1,
            unit_amount: amount,
            account_code: settings.summary_account_code.trim().to_string(),
        }],
    }
}

/// Accepts the date shapes the platform has been seen to emit: epoch seconds
/// or milliseconds, RFC 3339, and anything leading with `YYYY-MM-DD`.
fn parse_invoice_date(raw: &str) -> Option<chrono::NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(epoch) = raw.parse::<i64>() {
        let seconds = if epoch.abs() >= 1_000_000_000_000 {
            epoch / 1000
        } else {
            epoch
        };
        return DateTime::<Utc>::from_timestamp(seconds, 0).map(|dt| dt.date_naive());
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.date_naive());
    }

    let head: String = raw.chars().take(10).collect();
    chrono::NaiveDate::parse_from_str(&head, "%Y-%m-%d").ok()
}
