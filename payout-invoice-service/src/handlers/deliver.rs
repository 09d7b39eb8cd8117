use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    error::AppError,
    models::{DeliveryOutcome, DeliveryStatus},
    AppState,
};

/// One delivery attempt. The payout is marked `pending` up front and `error`
/// on any failed outcome; `sent` is recorded by the delivery service itself
/// together with the invoice linkage.
pub async fn deliver(
    State(state): State<AppState>,
    Path(deposit_id): Path<String>,
) -> Result<Json<DeliveryOutcome>, AppError> {
    state
        .delivery
        .set_delivery_state(&deposit_id, DeliveryStatus::Pending)
        .await?;

    match state.delivery.deliver(&deposit_id).await {
        Ok(outcome) if outcome.ok => Ok(Json(outcome)),
        Ok(outcome) => {
            tracing::warn!(
                deposit_id = %deposit_id,
                error = outcome.error.as_deref().unwrap_or("-"),
                code = outcome.code.map(i64::from).unwrap_or(-1),
                "Delivery failed"
            );
            state
                .delivery
                .set_delivery_state(&deposit_id, DeliveryStatus::Error)
                .await?;
            Ok(Json(outcome))
        }
        Err(err) => {
            if let Err(store_err) = state
                .delivery
                .set_delivery_state(&deposit_id, DeliveryStatus::Error)
                .await
            {
                tracing::error!(deposit_id = %deposit_id, error = %store_err, "Failed to record error state");
            }
            Err(err)
        }
    }
}
