pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use config::Config;
use services::store::{MongoOptionStore, OptionStore};
use services::wcpay::{HttpDispatch, InProcessDispatch};
use services::{CredentialStore, DeliveryService, WooPaymentsClient, XeroClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn OptionStore>,
    pub wcpay: WooPaymentsClient,
    pub xero: XeroClient,
    pub delivery: DeliveryService,
}

pub struct Application {
    port: u16,
    router: Router,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let mut client_options = ClientOptions::parse(config.database.url.expose_secret()).await?;
        client_options.app_name = Some("payout-invoice-service".to_string());

        let client = Client::with_options(client_options)?;
        let db = client.database(&config.database.db_name);
        let store: Arc<dyn OptionStore> = Arc::new(MongoOptionStore::new(&db));

        let wcpay_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let xero_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(25))
            .build()?;

        let credentials =
            CredentialStore::new(store.clone(), &config.security.local_key_secret);

        // Loopback HTTP first; the in-process registry only answers for
        // routes an embedding host has registered.
        let wcpay = WooPaymentsClient::new(
            Arc::new(HttpDispatch::new(
                wcpay_http,
                config.woopayments.rest_base_url.clone(),
                credentials,
            )),
            Arc::new(InProcessDispatch::new()),
        );
        tracing::info!(
            rest_base_url = %config.woopayments.rest_base_url,
            "WooPayments client initialized"
        );

        let xero = XeroClient::new(xero_http, config.xero.clone(), store.clone());
        let delivery = DeliveryService::new(
            wcpay.clone(),
            xero.clone(),
            store.clone(),
            config.fallback_currency.clone(),
        );

        let state = AppState {
            config: config.clone(),
            store,
            wcpay,
            xero,
            delivery,
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/status", get(handlers::status::status))
            .route("/deposits", get(handlers::deposits::list_deposits))
            .route(
                "/deposits/resolve/:input",
                get(handlers::deposits::resolve_deposit),
            )
            .route("/deliver/:deposit_id", post(handlers::deliver::deliver))
            .route("/xero/connect", get(handlers::xero::connect))
            .route("/xero/callback", get(handlers::xero::callback))
            .route("/xero/disconnect", post(handlers::xero::disconnect))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                }),
            )
            .with_state(state);

        Ok(Self {
            port: config.server.port,
            router,
        })
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router).await?;

        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
