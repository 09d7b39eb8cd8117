use axum::{
    extract::{Query, State},
    response::Redirect,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error::AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub state: String,
}

/// Sends the operator to Xero's authorize page. Missing app credentials send
/// them back to the settings surface with the error instead of failing the
/// request.
pub async fn connect(State(state): State<AppState>) -> Result<Redirect, AppError> {
    match state.xero.start_connect().await {
        Ok(authorize_url) => Ok(Redirect::to(&authorize_url)),
        Err(AppError::ConfigError(err)) => {
            let url = format!(
                "{}?msg_type=error&msg={}",
                state.config.xero.settings_url,
                urlencoding::encode(&err.to_string())
            );
            Ok(Redirect::to(&url))
        }
        Err(err) => Err(err),
    }
}

/// OAuth callback target. State mismatches fail the request outright.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, AppError> {
    state.xero.handle_callback(&query.code, &query.state).await?;
    Ok(Redirect::to(&format!(
        "{}?xero_connected=1",
        state.config.xero.settings_url
    )))
}

pub async fn disconnect(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.xero.disconnect().await?;
    Ok(Json(json!({ "disconnected": true })))
}
