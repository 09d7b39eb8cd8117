mod common;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{
    memory_store, seed_oauth_state, seed_settings, seed_tenant, seed_tokens, tokens, xero_client,
};
use payout_invoice_service::error::AppError;
use payout_invoice_service::models::{Contact, Invoice, LineItem, TokenSet};
use payout_invoice_service::services::store::{self, keys, OptionStore};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn basic_auth_header() -> String {
    format!("Basic {}", STANDARD.encode("client-id:client-secret"))
}

fn draft_invoice() -> Invoice {
    Invoice {
        invoice_type: "ACCREC".to_string(),
        status: "DRAFT".to_string(),
        contact: Contact {
            name: "WooPayments".to_string(),
        },
        currency_code: "AUD".to_string(),
        date: "2024-03-01".to_string(),
        due_date: "2024-03-01".to_string(),
        reference: "WooPay Payout po_123".to_string(),
        line_amount_types: "Inclusive".to_string(),
        line_items: vec![LineItem {
            description: "WooPayments payout po_123".to_string(),
            quantity: 1,
            unit_amount: 45.99,
            account_code: "200".to_string(),
        }],
    }
}

#[tokio::test]
async fn start_connect_builds_authorize_url_and_persists_state() {
    let store = memory_store();
    seed_settings(&store, "200").await;

    let client = xero_client("https://example.invalid", store.clone());
    let url = client.start_connect().await.unwrap();

    let saved_state: String = store::get_as(store.as_ref(), keys::XERO_OAUTH_STATE)
        .await
        .unwrap()
        .expect("state persisted");

    assert!(url.starts_with("https://example.invalid/identity/connect/authorize?"));
    assert!(url.contains("response_type=code"));
    assert!(url.contains("client_id=client-id"));
    assert!(url.contains("scope=offline_access%20accounting.transactions"));
    assert!(url.contains(&format!("state={}", saved_state)));
}

#[tokio::test]
async fn start_connect_without_credentials_is_a_config_error() {
    let store = memory_store();

    let client = xero_client("https://example.invalid", store.clone());
    let err = client.start_connect().await.unwrap_err();

    assert!(matches!(err, AppError::ConfigError(_)));
    let state: Option<String> = store::get_as(store.as_ref(), keys::XERO_OAUTH_STATE)
        .await
        .unwrap();
    assert!(state.is_none());
}

#[tokio::test]
async fn callback_with_mismatched_state_fails_without_mutation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_settings(&store, "200").await;
    seed_oauth_state(&store, "xyz").await;

    let client = xero_client(&server.uri(), store.clone());
    let err = client.handle_callback("auth-code", "abc").await.unwrap_err();

    assert!(matches!(err, AppError::OAuthCallback(_)));
    let saved: Option<String> = store::get_as(store.as_ref(), keys::XERO_OAUTH_STATE)
        .await
        .unwrap();
    assert_eq!(saved.as_deref(), Some("xyz"));
}

#[tokio::test]
async fn callback_with_missing_code_fails() {
    let store = memory_store();
    seed_settings(&store, "200").await;
    seed_oauth_state(&store, "xyz").await;

    let client = xero_client("https://example.invalid", store.clone());
    let err = client.handle_callback("", "xyz").await.unwrap_err();

    assert!(matches!(err, AppError::OAuthCallback(_)));
}

#[tokio::test]
async fn callback_exchanges_code_and_resolves_tenant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(header("authorization", basic_auth_header().as_str()))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_in": 1800,
            "token_type": "Bearer",
            "scope": "accounting.transactions",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/connections"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"tenantId": "tenant-1"},
            {"tenantId": "tenant-2"},
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_settings(&store, "200").await;
    seed_oauth_state(&store, "state-1").await;

    let client = xero_client(&server.uri(), store.clone());
    client.handle_callback("auth-code", "state-1").await.unwrap();

    let stored: TokenSet = store::get_as(store.as_ref(), keys::XERO_TOKENS)
        .await
        .unwrap()
        .expect("tokens persisted");
    assert_eq!(stored.access_token, "access-1");
    assert_eq!(stored.refresh_token, "refresh-1");
    assert!(stored.created_at > 0);

    // First connection wins; the one-time state is consumed.
    let tenant: Option<String> = store::get_as(store.as_ref(), keys::XERO_TENANT)
        .await
        .unwrap();
    assert_eq!(tenant.as_deref(), Some("tenant-1"));

    assert!(client.is_connected().await.unwrap());

    let replay = client.handle_callback("auth-code", "state-1").await;
    assert!(replay.is_err());
}

#[tokio::test]
async fn fresh_access_token_is_returned_without_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_settings(&store, "200").await;
    seed_tokens(&store, &tokens("access-1", "refresh-1", 1800, 10)).await;

    let client = xero_client(&server.uri(), store.clone());

    assert_eq!(client.get_access_token().await.unwrap(), "access-1");
    assert_eq!(client.get_access_token().await.unwrap(), "access-1");
}

#[tokio::test]
async fn token_near_expiry_is_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "refresh_token": "refresh-2",
            "expires_in": 1800,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_settings(&store, "200").await;
    // 30 seconds of lifetime left puts us inside the 120-second window.
    seed_tokens(&store, &tokens("access-1", "refresh-1", 1800, 1770)).await;

    let client = xero_client(&server.uri(), store.clone());
    assert_eq!(client.get_access_token().await.unwrap(), "access-2");

    let stored: TokenSet = store::get_as(store.as_ref(), keys::XERO_TOKENS)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.refresh_token, "refresh-2");
}

#[tokio::test]
async fn refresh_response_without_refresh_token_keeps_previous_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "expires_in": 1800,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_settings(&store, "200").await;
    seed_tokens(&store, &tokens("access-1", "refresh-1", 1800, 1790)).await;

    let client = xero_client(&server.uri(), store.clone());
    assert_eq!(client.get_access_token().await.unwrap(), "access-2");

    let stored: TokenSet = store::get_as(store.as_ref(), keys::XERO_TOKENS)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "access-2");
    assert_eq!(stored.refresh_token, "refresh-1");
}

#[tokio::test]
async fn failed_refresh_returns_empty_and_keeps_stored_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(500).set_body_string("server error"))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_settings(&store, "200").await;
    let expired = tokens("access-1", "refresh-1", 1800, 4000);
    seed_tokens(&store, &expired).await;
    seed_tenant(&store, "tenant-1").await;

    let client = xero_client(&server.uri(), store.clone());
    assert_eq!(client.get_access_token().await.unwrap(), "");

    // Soft-disconnect only: the stored refresh token survives the failure.
    let stored: TokenSet = store::get_as(store.as_ref(), keys::XERO_TOKENS)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.refresh_token, "refresh-1");
    assert!(client.is_connected().await.unwrap());
}

#[tokio::test]
async fn no_refresh_token_means_empty_access_token_without_network() {
    let server = MockServer::start().await;

    let store = memory_store();
    seed_settings(&store, "200").await;

    let client = xero_client(&server.uri(), store);
    assert_eq!(client.get_access_token().await.unwrap(), "");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn create_invoice_without_connection_makes_no_network_call() {
    let server = MockServer::start().await;

    let store = memory_store();
    seed_settings(&store, "200").await;

    let client = xero_client(&server.uri(), store);
    let outcome = client.create_invoice(&draft_invoice()).await.unwrap();

    assert!(!outcome.ok);
    assert_eq!(outcome.error.as_deref(), Some("Xero not connected."));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn create_invoice_submits_singleton_batch_with_tenant_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api.xro/2.0/Invoices"))
        .and(header("authorization", "Bearer access-1"))
        .and(header("xero-tenant-id", "tenant-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Invoices": [{"InvoiceID": "inv-1", "InvoiceNumber": "INV-0042"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_settings(&store, "200").await;
    seed_tokens(&store, &tokens("access-1", "refresh-1", 1800, 10)).await;
    seed_tenant(&store, "tenant-1").await;

    let client = xero_client(&server.uri(), store);
    let outcome = client.create_invoice(&draft_invoice()).await.unwrap();

    assert!(outcome.ok);
    assert_eq!(outcome.code, Some(200));
    assert!(outcome.body.unwrap().contains("INV-0042"));

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["Invoices"].as_array().unwrap().len(), 1);
    assert_eq!(body["Invoices"][0]["Reference"], "WooPay Payout po_123");
}

#[tokio::test]
async fn create_invoice_maps_failure_status_into_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api.xro/2.0/Invoices"))
        .respond_with(ResponseTemplate::new(400).set_body_string("validation failed"))
        .mount(&server)
        .await;

    let store = memory_store();
    seed_settings(&store, "200").await;
    seed_tokens(&store, &tokens("access-1", "refresh-1", 1800, 10)).await;
    seed_tenant(&store, "tenant-1").await;

    let client = xero_client(&server.uri(), store);
    let outcome = client.create_invoice(&draft_invoice()).await.unwrap();

    assert!(!outcome.ok);
    assert_eq!(outcome.code, Some(400));
    assert_eq!(outcome.body.as_deref(), Some("validation failed"));
}

#[tokio::test]
async fn lock_dates_are_cached_per_tenant() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api.xro/2.0/Organisations"))
        .and(header("xero-tenant-id", "tenant-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Organisations": [{
                "PeriodLockDate": "2024-06-30T00:00:00",
                "EndOfYearLockDate": "2023-12-31T00:00:00",
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store();
    seed_settings(&store, "200").await;
    seed_tokens(&store, &tokens("access-1", "refresh-1", 1800, 10)).await;
    seed_tenant(&store, "tenant-1").await;

    let client = xero_client(&server.uri(), store);

    let dates = client.get_lock_dates().await.unwrap().expect("lock dates");
    assert_eq!(dates.period_lock, "2024-06-30");
    assert_eq!(dates.eoy_lock, "2023-12-31");
    assert_eq!(dates.max_lock, "2024-06-30");

    // Second read is served from the 12-hour cache; expect(1) on the mock
    // verifies no second Organisations request goes out.
    let cached = client.get_lock_dates().await.unwrap().expect("cached");
    assert_eq!(cached, dates);
}

#[tokio::test]
async fn lock_dates_without_tenant_are_none() {
    let store = memory_store();
    seed_settings(&store, "200").await;

    let client = xero_client("https://example.invalid", store);
    assert!(client.get_lock_dates().await.unwrap().is_none());
}

#[tokio::test]
async fn disconnect_clears_tokens_and_tenant() {
    let store = memory_store();
    seed_settings(&store, "200").await;
    seed_tokens(&store, &tokens("access-1", "refresh-1", 1800, 10)).await;
    seed_tenant(&store, "tenant-1").await;

    let client = xero_client("https://example.invalid", store.clone());
    assert!(client.is_connected().await.unwrap());

    client.disconnect().await.unwrap();

    assert!(!client.is_connected().await.unwrap());
    assert!(store.get(keys::XERO_TOKENS).await.unwrap().is_none());
    assert!(store.get(keys::XERO_TENANT).await.unwrap().is_none());
}
