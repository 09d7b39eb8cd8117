//! WooPayments client.
//!
//! Fetches payout ("deposit") and transaction data from the platform's
//! `wc/v3/payments` REST routes. The primary strategy is an authenticated
//! HTTP request against the platform's own REST surface, because some of its
//! routes are registered lazily and are only reachable that way. When that
//! attempt fails with a loopback-shaped transport error, a single fallback to
//! an in-process dispatch is made; any other failure propagates unchanged.
//!
//! This client does not retry.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::models::Deposit;
use crate::services::credentials::CredentialStore;
use crate::utils::truncate_chars;

const PROVIDER: &str = "WooPayments";
const DEPOSITS_ROUTE: &str = "wc/v3/payments/deposits";
const TRANSACTIONS_ROUTE: &str = "wc/v3/payments/reports/transactions";

/// One way of executing a REST request against the platform.
#[async_trait]
pub trait RestDispatch: Send + Sync {
    async fn dispatch(
        &self,
        method: &str,
        route: &str,
        query: &[(String, String)],
    ) -> Result<Value, AppError>;
}

/// Transport failures that look like a blocked loopback: timeouts, refused
/// connections, DNS failures, and generic send errors. Kept pure so the
/// fallback selection is testable without any network code.
pub fn is_loopback_failure(message: &str) -> bool {
    const NEEDLES: [&str; 6] = [
        "loopback",
        "error sending request",
        "timed out",
        "connection refused",
        "dns error",
        "connect error",
    ];
    let message = message.to_ascii_lowercase();
    NEEDLES.iter().any(|needle| message.contains(needle))
}

/// Primary strategy: authenticated HTTP against the platform's REST base URL.
/// Basic auth uses the locally-owned read-only credential, created on demand.
pub struct HttpDispatch {
    client: reqwest::Client,
    base_url: String,
    credentials: CredentialStore,
}

impl HttpDispatch {
    pub fn new(client: reqwest::Client, base_url: String, credentials: CredentialStore) -> Self {
        Self {
            client,
            base_url,
            credentials,
        }
    }
}

#[async_trait]
impl RestDispatch for HttpDispatch {
    async fn dispatch(
        &self,
        method: &str,
        route: &str,
        query: &[(String, String)],
    ) -> Result<Value, AppError> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            route.trim_start_matches('/')
        );
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| AppError::BadRequest(anyhow::anyhow!("invalid HTTP method")))?;

        let credential = self.credentials.get_or_create().await?;

        let response = self
            .client
            .request(method, &url)
            .basic_auth(&credential.consumer_key, Some(&credential.consumer_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::Transport {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AppError::Transport {
            provider: PROVIDER,
            message: e.to_string(),
        })?;

        if status.as_u16() == 404 && body.contains("rest_no_route") {
            return Err(AppError::RouteMissing(route.to_string()));
        }
        if !status.is_success() {
            return Err(AppError::UpstreamStatus {
                provider: PROVIDER,
                status: status.as_u16(),
                body: truncate_chars(body.trim(), 500),
            });
        }

        serde_json::from_str(&body).map_err(|_| AppError::InvalidJson { provider: PROVIDER })
    }
}

type RouteHandler = Box<dyn Fn(&[(String, String)]) -> Result<Value, AppError> + Send + Sync>;

/// Fallback strategy: dispatch against routes registered in-process, the way
/// an embedding host application would expose them without going through the
/// network stack. Unregistered routes report the same route-missing failure
/// the HTTP path does.
#[derive(Default)]
pub struct InProcessDispatch {
    routes: HashMap<String, RouteHandler>,
}

impl InProcessDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, method: &str, route: &str, handler: F)
    where
        F: Fn(&[(String, String)]) -> Result<Value, AppError> + Send + Sync + 'static,
    {
        self.routes
            .insert(route_key(method, route), Box::new(handler));
    }
}

fn route_key(method: &str, route: &str) -> String {
    format!("{} {}", method.to_ascii_uppercase(), route.trim_matches('/'))
}

#[async_trait]
impl RestDispatch for InProcessDispatch {
    async fn dispatch(
        &self,
        method: &str,
        route: &str,
        query: &[(String, String)],
    ) -> Result<Value, AppError> {
        match self.routes.get(&route_key(method, route)) {
            Some(handler) => handler(query),
            None => Err(AppError::RouteMissing(route.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct WooPaymentsClient {
    primary: Arc<dyn RestDispatch>,
    fallback: Arc<dyn RestDispatch>,
}

impl WooPaymentsClient {
    pub fn new(primary: Arc<dyn RestDispatch>, fallback: Arc<dyn RestDispatch>) -> Self {
        Self { primary, fallback }
    }

    async fn dispatch(
        &self,
        method: &str,
        route: &str,
        query: &[(String, String)],
    ) -> Result<Value, AppError> {
        match self.primary.dispatch(method, route, query).await {
            Ok(value) => Ok(value),
            Err(AppError::Transport { provider: _, message }) if is_loopback_failure(&message) => {
                tracing::warn!(
                    route,
                    error = %message,
                    "Loopback dispatch failed, falling back to in-process dispatch"
                );
                self.fallback.dispatch(method, route, query).await
            }
            Err(err) => Err(err),
        }
    }

    /// Availability probe for the status surface; primary strategy only.
    pub async fn deposits_routes_available(&self) -> bool {
        let query = list_query(1, 1);
        self.primary
            .dispatch("GET", DEPOSITS_ROUTE, &query)
            .await
            .is_ok()
    }

    /// Payouts sorted by date descending. The server answers with either an
    /// envelope carrying a `data` field or a bare list; both normalize to a
    /// list here.
    pub async fn list_deposits(&self, page: u32, pagesize: u32) -> Result<Vec<Deposit>, AppError> {
        let query = list_query(page, pagesize);
        let data = self.dispatch("GET", DEPOSITS_ROUTE, &query).await?;
        Ok(normalize_list(data)
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect())
    }

    /// A recoverable "not found" comes back as an empty `Deposit`; transport
    /// and auth failures propagate.
    pub async fn get_deposit_by_id(&self, deposit_id: &str) -> Result<Deposit, AppError> {
        let route = format!("{}/{}", DEPOSITS_ROUTE, deposit_id);
        let data = self.dispatch("GET", &route, &[]).await?;
        Ok(serde_json::from_value(data).unwrap_or_default())
    }

    async fn try_get_deposit_by_id(&self, deposit_id: &str) -> Option<Deposit> {
        if deposit_id.is_empty() {
            return None;
        }
        self.get_deposit_by_id(deposit_id).await.ok()
    }

    /// Resolve what wc-admin puts in URLs (sometimes a bank reference) to a
    /// real deposit id:
    /// 1. ids already carrying the native `po_` prefix pass through untouched;
    /// 2. a direct fetch is attempted best-effort;
    /// 3. otherwise the payout list is paged through comparing bank-reference
    ///    fields against the input;
    /// 4. anything still unmatched comes back unchanged, so the caller must
    ///    treat the result as possibly unresolved.
    pub async fn resolve_deposit_id(&self, input_id: &str) -> Result<String, AppError> {
        let input_id = input_id.trim();

        if input_id.is_empty() {
            return Ok(String::new());
        }
        if input_id.starts_with("po_") {
            return Ok(input_id.to_string());
        }

        if let Some(deposit) = self.try_get_deposit_by_id(input_id).await {
            if !deposit.id.is_empty() {
                return Ok(deposit.id);
            }
        }

        let pagesize = 100;
        for page in 1..=20 {
            let deposits = self.list_deposits(page, pagesize).await?;
            if deposits.is_empty() {
                break;
            }
            let count = deposits.len();

            for deposit in deposits {
                if deposit.id.is_empty() {
                    continue;
                }
                if let Some(reference) = &deposit.bank_reference {
                    if constant_time_eq(reference, input_id) {
                        return Ok(deposit.id);
                    }
                }
            }

            if count < pagesize as usize {
                break;
            }
        }

        Ok(input_id.to_string())
    }

    /// Accumulates transaction rows for one deposit, paginating until a short
    /// page is returned.
    pub async fn list_transactions_for_deposit(
        &self,
        deposit_id: &str,
        per_page: u32,
    ) -> Result<Vec<Value>, AppError> {
        let mut page = 1u32;
        let mut out = Vec::new();

        loop {
            let query = vec![
                ("deposit_id".to_string(), deposit_id.to_string()),
                ("per_page".to_string(), per_page.to_string()),
                ("page".to_string(), page.to_string()),
                ("sort".to_string(), "date".to_string()),
                ("direction".to_string(), "ASC".to_string()),
            ];
            let data = self.dispatch("GET", TRANSACTIONS_ROUTE, &query).await?;

            let batch = match data {
                Value::Array(rows) => rows,
                _ => break,
            };
            let count = batch.len();
            out.extend(batch);

            if count < per_page as usize {
                break;
            }
            page += 1;
            if page > 200 {
                break;
            }
        }

        Ok(out)
    }
}

fn list_query(page: u32, pagesize: u32) -> Vec<(String, String)> {
    vec![
        ("sort".to_string(), "date".to_string()),
        ("direction".to_string(), "DESC".to_string()),
        ("pagesize".to_string(), pagesize.to_string()),
        ("page".to_string(), page.to_string()),
    ]
}

fn normalize_list(data: Value) -> Vec<Value> {
    match data {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// Exact match with constant-time comparison, as the bank reference fields
/// are compared everywhere else credentials are.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
