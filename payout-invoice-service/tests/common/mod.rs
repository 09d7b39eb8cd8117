#![allow(dead_code)]

use chrono::Utc;
use secrecy::Secret;
use std::sync::Arc;

use payout_invoice_service::config::XeroConfig;
use payout_invoice_service::models::{Settings, TokenSet};
use payout_invoice_service::services::store::{self, keys, MemoryOptionStore};
use payout_invoice_service::services::wcpay::{HttpDispatch, InProcessDispatch, RestDispatch};
use payout_invoice_service::services::{CredentialStore, WooPaymentsClient, XeroClient};

pub fn memory_store() -> Arc<MemoryOptionStore> {
    Arc::new(MemoryOptionStore::new())
}

pub async fn seed_settings(store: &MemoryOptionStore, account_code: &str) {
    let settings = Settings {
        summary_account_code: account_code.to_string(),
        xero_client_id: "client-id".to_string(),
        xero_client_secret: "client-secret".to_string(),
        ..Settings::default()
    };
    store::set_as(store, keys::SETTINGS, &settings)
        .await
        .expect("seed settings");
}

pub async fn seed_oauth_state(store: &MemoryOptionStore, state: &str) {
    store::set_as(store, keys::XERO_OAUTH_STATE, &state.to_string())
        .await
        .expect("seed oauth state");
}

pub async fn seed_tenant(store: &MemoryOptionStore, tenant_id: &str) {
    store::set_as(store, keys::XERO_TENANT, &tenant_id.to_string())
        .await
        .expect("seed tenant");
}

/// A token set issued `age_secs` ago with the given lifetime.
pub fn tokens(access: &str, refresh: &str, expires_in: i64, age_secs: i64) -> TokenSet {
    TokenSet {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        expires_in,
        token_type: "Bearer".to_string(),
        scope: "accounting.transactions".to_string(),
        created_at: Utc::now().timestamp() - age_secs,
    }
}

pub async fn seed_tokens(store: &MemoryOptionStore, tokens: &TokenSet) {
    store::set_as(store, keys::XERO_TOKENS, tokens)
        .await
        .expect("seed tokens");
}

pub fn xero_config(base: &str) -> XeroConfig {
    XeroConfig {
        redirect_uri: "http://localhost:3010/xero/callback".to_string(),
        settings_url: "/settings".to_string(),
        authorize_url: format!("{}/identity/connect/authorize", base),
        identity_base_url: base.to_string(),
        api_base_url: base.to_string(),
    }
}

pub fn xero_client(base: &str, store: Arc<MemoryOptionStore>) -> XeroClient {
    XeroClient::new(reqwest::Client::new(), xero_config(base), store)
}

pub fn credential_store(store: Arc<MemoryOptionStore>) -> CredentialStore {
    CredentialStore::new(store, &Secret::new("test-secret".to_string()))
}

pub fn wcpay_client(base: &str, store: Arc<MemoryOptionStore>) -> WooPaymentsClient {
    wcpay_client_with_fallback(base, store, InProcessDispatch::new())
}

pub fn wcpay_client_with_fallback(
    base: &str,
    store: Arc<MemoryOptionStore>,
    fallback: InProcessDispatch,
) -> WooPaymentsClient {
    let primary = HttpDispatch::new(
        reqwest::Client::new(),
        base.to_string(),
        credential_store(store),
    );
    WooPaymentsClient::new(
        Arc::new(primary) as Arc<dyn RestDispatch>,
        Arc::new(fallback) as Arc<dyn RestDispatch>,
    )
}
