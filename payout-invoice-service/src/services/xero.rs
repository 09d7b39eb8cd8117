//! Xero OAuth2 client.
//!
//! Owns the authorization-code lifecycle against Xero's identity service and
//! invoice submission against the accounting API. Connection state is derived
//! from the stored token set and tenant id: both present means connected, and
//! a single failed refresh soft-fails the current call without clearing the
//! stored tokens.

use chrono::{NaiveDate, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::XeroConfig;
use crate::error::AppError;
use crate::models::{DeliveryOutcome, Invoice, LockDates, Settings, TokenSet, DEFAULT_SCOPES};
use crate::services::store::{self, keys, OptionStore};
use crate::utils::truncate_chars;

const PROVIDER: &str = "Xero";
const LOCK_DATES_TTL_SECS: i64 = 12 * 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    scope: String,
}

#[derive(Debug, Deserialize)]
struct Connection {
    #[serde(rename = "tenantId", default)]
    tenant_id: String,
}

#[derive(Debug, Deserialize)]
struct OrganisationsResponse {
    #[serde(rename = "Organisations", default)]
    organisations: Vec<Organisation>,
}

#[derive(Debug, Deserialize)]
struct Organisation {
    #[serde(rename = "PeriodLockDate", default)]
    period_lock_date: String,
    #[serde(rename = "EndOfYearLockDate", default)]
    end_of_year_lock_date: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedLockDates {
    cached_at: i64,
    #[serde(flatten)]
    dates: LockDates,
}

#[derive(Clone)]
pub struct XeroClient {
    client: reqwest::Client,
    config: XeroConfig,
    store: Arc<dyn OptionStore>,
}

impl XeroClient {
    pub fn new(client: reqwest::Client, config: XeroConfig, store: Arc<dyn OptionStore>) -> Self {
        Self {
            client,
            config,
            store,
        }
    }

    /// Connected means a tenant id and a refresh token are both present;
    /// access-token freshness is irrelevant here.
    pub async fn is_connected(&self) -> Result<bool, AppError> {
        let tenant_id = self.tenant_id().await?;
        let tokens = self.tokens().await?;
        Ok(!tenant_id.is_empty() && !tokens.refresh_token.is_empty())
    }

    async fn tenant_id(&self) -> Result<String, AppError> {
        Ok(
            store::get_as::<String>(self.store.as_ref(), keys::XERO_TENANT)
                .await?
                .unwrap_or_default(),
        )
    }

    async fn tokens(&self) -> Result<TokenSet, AppError> {
        Ok(
            store::get_as::<TokenSet>(self.store.as_ref(), keys::XERO_TOKENS)
                .await?
                .unwrap_or_default(),
        )
    }

    async fn client_credentials(&self) -> Result<(String, String), AppError> {
        let settings = Settings::load(self.store.as_ref()).await?;
        Ok((
            settings.xero_client_id.trim().to_string(),
            settings.xero_client_secret.trim().to_string(),
        ))
    }

    /// Builds the authorization redirect, persisting a fresh one-time
    /// anti-forgery state for the callback to compare against.
    pub async fn start_connect(&self) -> Result<String, AppError> {
        let (client_id, client_secret) = self.client_credentials().await?;
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Missing Xero Client ID/Secret. Save your Xero app credentials first."
            )));
        }

        let state = oauth_state(&mut rand::thread_rng());
        store::set_as(self.store.as_ref(), keys::XERO_OAUTH_STATE, &state).await?;

        let settings = Settings::load(self.store.as_ref()).await?;
        let scopes = match settings.xero_scopes.trim() {
            "" => DEFAULT_SCOPES,
            configured => configured,
        };

        let params = [
            ("response_type", "code"),
            ("client_id", client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("scope", scopes),
            ("state", state.as_str()),
        ];
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(format!("{}?{}", self.config.authorize_url, query))
    }

    /// Completes the authorization-code flow. The persisted state must match
    /// exactly and is consumed on match; a mismatch fails hard and leaves the
    /// stored state untouched so only a redone authorize step can proceed.
    pub async fn handle_callback(&self, code: &str, state: &str) -> Result<(), AppError> {
        let saved_state = store::get_as::<String>(self.store.as_ref(), keys::XERO_OAUTH_STATE)
            .await?
            .unwrap_or_default();

        if code.is_empty() || state.is_empty() || saved_state.is_empty() || state != saved_state {
            return Err(AppError::OAuthCallback(
                "missing or invalid state/code".to_string(),
            ));
        }

        self.store.delete(keys::XERO_OAUTH_STATE).await?;

        let tokens = self.exchange_code_for_tokens(code).await?;
        store::set_as(self.store.as_ref(), keys::XERO_TOKENS, &tokens).await?;

        let tenant_id = self.resolve_tenant_id(&tokens.access_token).await;
        if tenant_id.is_empty() {
            tracing::warn!("Xero connections lookup returned no tenant; connection incomplete");
        } else {
            store::set_as(self.store.as_ref(), keys::XERO_TENANT, &tenant_id).await?;
            tracing::info!(tenant_id = %tenant_id, "Connected to Xero organisation");
        }

        Ok(())
    }

    /// Clears the token set and tenant id. Does not revoke with the provider.
    pub async fn disconnect(&self) -> Result<(), AppError> {
        self.store.delete(keys::XERO_TOKENS).await?;
        self.store.delete(keys::XERO_TENANT).await?;
        Ok(())
    }

    async fn exchange_code_for_tokens(&self, code: &str) -> Result<TokenSet, AppError> {
        let (client_id, client_secret) = self.client_credentials().await?;
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Missing Xero Client ID/Secret."
            )));
        }

        let response = self
            .client
            .post(format!("{}/connect/token", self.config.identity_base_url))
            .basic_auth(&client_id, Some(&client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
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

        if !status.is_success() {
            return Err(AppError::UpstreamStatus {
                provider: PROVIDER,
                status: status.as_u16(),
                body: truncate_chars(&body, 500),
            });
        }

        let data: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| AppError::InvalidJson { provider: PROVIDER })?;

        Ok(TokenSet {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            expires_in: data.expires_in,
            token_type: data.token_type,
            scope: data.scope,
            created_at: Utc::now().timestamp(),
        })
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenSet, AppError> {
        let (client_id, client_secret) = self.client_credentials().await?;
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Missing Xero Client ID/Secret."
            )));
        }

        let response = self
            .client
            .post(format!("{}/connect/token", self.config.identity_base_url))
            .basic_auth(&client_id, Some(&client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
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

        if !status.is_success() {
            return Err(AppError::UpstreamStatus {
                provider: PROVIDER,
                status: status.as_u16(),
                body: truncate_chars(&body, 500),
            });
        }

        let data: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| AppError::InvalidJson { provider: PROVIDER })?;

        Ok(TokenSet {
            access_token: data.access_token,
            // Xero is not required to rotate; keep the durable credential
            // when the grant omits a replacement.
            refresh_token: if data.refresh_token.is_empty() {
                refresh_token.to_string()
            } else {
                data.refresh_token
            },
            expires_in: data.expires_in,
            token_type: data.token_type,
            scope: data.scope,
            created_at: Utc::now().timestamp(),
        })
    }

    async fn resolve_tenant_id(&self, access_token: &str) -> String {
        if access_token.is_empty() {
            return String::new();
        }

        let response = self
            .client
            .get(format!("{}/connections", self.config.api_base_url))
            .timeout(Duration::from_secs(20))
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await;

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            _ => return String::new(),
        };

        // Multi-tenant selection is out of scope; the first connection wins.
        match response.json::<Vec<Connection>>().await {
            Ok(connections) => connections
                .into_iter()
                .next()
                .map(|c| c.tenant_id)
                .unwrap_or_default(),
            Err(_) => String::new(),
        }
    }

    /// Cached access token, refreshed synchronously when it is within 120
    /// seconds of expiry. Empty string means "not connected"; callers must
    /// not retry here.
    pub async fn get_access_token(&self) -> Result<String, AppError> {
        let tokens = self.tokens().await?;
        let now = Utc::now().timestamp();

        if !tokens.access_token.is_empty() && !tokens.needs_refresh(now) {
            return Ok(tokens.access_token);
        }

        if tokens.refresh_token.is_empty() {
            return Ok(String::new());
        }

        match self.refresh_tokens(&tokens.refresh_token).await {
            Ok(new_tokens) if !new_tokens.access_token.is_empty() => {
                store::set_as(self.store.as_ref(), keys::XERO_TOKENS, &new_tokens).await?;
                Ok(new_tokens.access_token)
            }
            Ok(_) => Ok(String::new()),
            Err(err) => {
                // Soft-disconnect for this call only; stored tokens stay.
                tracing::warn!(error = %err, "Xero token refresh failed");
                Ok(String::new())
            }
        }
    }

    /// Submits a single invoice as a singleton batch. A missing token or
    /// tenant is reported as a structured failure without a network call;
    /// transport failures are likewise folded into the outcome, as the
    /// delivery surface renders them to the operator directly.
    pub async fn create_invoice(&self, invoice: &Invoice) -> Result<DeliveryOutcome, AppError> {
        let access_token = self.get_access_token().await?;
        let tenant_id = self.tenant_id().await?;

        if access_token.is_empty() || tenant_id.is_empty() {
            return Ok(DeliveryOutcome::failure("Xero not connected."));
        }

        let response = self
            .client
            .post(format!("{}/api.xro/2.0/Invoices", self.config.api_base_url))
            .bearer_auth(&access_token)
            .header("xero-tenant-id", &tenant_id)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&json!({ "Invoices": [invoice] }))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => return Ok(DeliveryOutcome::failure(err.to_string())),
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return Ok(DeliveryOutcome::failure(err.to_string())),
        };

        tracing::debug!(status, "Xero create_invoice response");

        Ok(DeliveryOutcome {
            ok: (200..300).contains(&status),
            code: Some(status),
            body: Some(truncate_chars(&body, 5000)),
            error: None,
        })
    }

    /// Organisation lock dates, cached for 12 hours per tenant. Best-effort:
    /// any failure yields `None` rather than an error.
    pub async fn get_lock_dates(&self) -> Result<Option<LockDates>, AppError> {
        let tenant_id = self.tenant_id().await?;
        if tenant_id.is_empty() {
            return Ok(None);
        }

        let cache_key = lock_dates_cache_key(&tenant_id);
        let now = Utc::now().timestamp();

        if let Some(cached) =
            store::get_as::<CachedLockDates>(self.store.as_ref(), &cache_key).await?
        {
            if now - cached.cached_at < LOCK_DATES_TTL_SECS {
                return Ok(Some(cached.dates));
            }
        }

        let access_token = self.get_access_token().await?;
        if access_token.is_empty() {
            return Ok(None);
        }

        let response = self
            .client
            .get(format!(
                "{}/api.xro/2.0/Organisations",
                self.config.api_base_url
            ))
            .timeout(Duration::from_secs(20))
            .bearer_auth(&access_token)
            .header("xero-tenant-id", &tenant_id)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await;

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            _ => return Ok(None),
        };

        let data: OrganisationsResponse = match response.json().await {
            Ok(data) => data,
            Err(_) => return Ok(None),
        };
        let organisation = match data.organisations.into_iter().next() {
            Some(organisation) => organisation,
            None => return Ok(None),
        };

        let period_lock = date_only(&organisation.period_lock_date);
        let eoy_lock = date_only(&organisation.end_of_year_lock_date);
        let dates = LockDates {
            max_lock: max_lock(&period_lock, &eoy_lock),
            period_lock,
            eoy_lock,
        };

        store::set_as(
            self.store.as_ref(),
            &cache_key,
            &CachedLockDates {
                cached_at: now,
                dates: dates.clone(),
            },
        )
        .await?;

        Ok(Some(dates))
    }
}

fn lock_dates_cache_key(tenant_id: &str) -> String {
    use sha2::{Digest, Sha256};
    format!(
        "xero_lock_dates:{}",
        hex::encode(Sha256::digest(tenant_id.as_bytes()))
    )
}

/// Xero returns lock dates as `YYYY-MM-DDTHH:MM:SS` (or similar); keep the
/// date part only.
fn date_only(datetime: &str) -> String {
    let datetime = datetime.trim();
    if datetime.is_empty() {
        return String::new();
    }
    datetime.chars().take(10).collect()
}

fn max_lock(period_lock: &str, eoy_lock: &str) -> String {
    let a = NaiveDate::parse_from_str(period_lock, "%Y-%m-%d").ok();
    let b = NaiveDate::parse_from_str(eoy_lock, "%Y-%m-%d").ok();
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
    .map(|d| d.format("%Y-%m-%d").to_string())
    .unwrap_or_default()
}

/// 24-character alphanumeric anti-forgery token.
fn oauth_state<R: Rng>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}
