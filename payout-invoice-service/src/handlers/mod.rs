//! HTTP handlers: the thin operator surface over the delivery pipeline.

pub mod deliver;
pub mod deposits;
pub mod status;
pub mod xero;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "payout-invoice-service" })),
    )
}
