use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::{
    error::AppError,
    models::{DeliveryState, InvoiceMeta, LockDates},
    services::store::keys,
    AppState,
};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connected: bool,
    pub deposits_routes_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_dates: Option<LockDates>,
    pub delivery_states: HashMap<String, DeliveryState>,
    pub invoice_meta: HashMap<String, InvoiceMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_notice: Option<Value>,
}

pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let connected = state.xero.is_connected().await?;
    let lock_dates = if connected {
        state.xero.get_lock_dates().await?
    } else {
        None
    };

    Ok(Json(StatusResponse {
        connected,
        deposits_routes_available: state.wcpay.deposits_routes_available().await,
        lock_dates,
        delivery_states: state.delivery.delivery_states().await?,
        invoice_meta: state.delivery.invoice_meta().await?,
        api_key_notice: state.store.get(keys::WC_API_KEY_NOTICE).await?,
    }))
}
