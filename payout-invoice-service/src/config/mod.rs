use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub woopayments: WooPaymentsConfig,
    pub xero: XeroConfig,
    pub security: SecurityConfig,
    pub fallback_currency: String,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

/// Where the WooPayments REST surface lives, e.g. `https://shop.example.com/wp-json`.
#[derive(Deserialize, Clone, Debug)]
pub struct WooPaymentsConfig {
    pub rest_base_url: String,
}

/// Xero endpoint locations. Overridable so tests can point them at a local
/// mock server; the defaults are the production endpoints.
#[derive(Deserialize, Clone, Debug)]
pub struct XeroConfig {
    pub redirect_uri: String,
    pub settings_url: String,
    pub authorize_url: String,
    pub identity_base_url: String,
    pub api_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SecurityConfig {
    /// Process-wide secret the credential encryption key is derived from.
    /// Deployment-owned; never exposed to or editable by the operator.
    pub local_key_secret: Secret<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("PAYOUT_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env::var("PAYOUT_SERVICE_PORT")
            .unwrap_or_else(|_| "3010".to_string())
            .parse()?;

        let db_url = env::var("PAYOUT_DATABASE_URL").expect("PAYOUT_DATABASE_URL must be set");
        let db_name =
            env::var("PAYOUT_DATABASE_NAME").unwrap_or_else(|_| "payout_invoice_db".to_string());

        let rest_base_url =
            env::var("WCPAY_REST_BASE_URL").expect("WCPAY_REST_BASE_URL must be set");

        let redirect_uri = env::var("XERO_REDIRECT_URI")
            .unwrap_or_else(|_| format!("http://localhost:{}/xero/callback", port));

        let local_key_secret =
            env::var("LOCAL_KEY_SECRET").unwrap_or_else(|_| "dev-secret".to_string());

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            woopayments: WooPaymentsConfig { rest_base_url },
            xero: XeroConfig {
                redirect_uri,
                settings_url: env::var("XERO_SETTINGS_URL")
                    .unwrap_or_else(|_| "/settings".to_string()),
                authorize_url: env::var("XERO_AUTHORIZE_URL").unwrap_or_else(|_| {
                    "https://login.xero.com/identity/connect/authorize".to_string()
                }),
                identity_base_url: env::var("XERO_IDENTITY_BASE_URL")
                    .unwrap_or_else(|_| "https://identity.xero.com".to_string()),
                api_base_url: env::var("XERO_API_BASE_URL")
                    .unwrap_or_else(|_| "https://api.xero.com".to_string()),
            },
            security: SecurityConfig {
                local_key_secret: Secret::new(local_key_secret),
            },
            fallback_currency: env::var("FALLBACK_CURRENCY")
                .unwrap_or_else(|_| "USD".to_string()),
            service_name: "payout-invoice-service".to_string(),
        })
    }
}
