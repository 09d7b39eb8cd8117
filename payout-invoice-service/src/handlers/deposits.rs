use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error::AppError, models::Deposit, AppState};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_pagesize")]
    pub pagesize: u32,
}

fn default_page() -> u32 {
    1
}

fn default_pagesize() -> u32 {
    25
}

pub async fn list_deposits(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Deposit>>, AppError> {
    let deposits = state.wcpay.list_deposits(query.page, query.pagesize).await?;
    Ok(Json(deposits))
}

pub async fn resolve_deposit(
    State(state): State<AppState>,
    Path(input): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = state.wcpay.resolve_deposit_id(&input).await?;
    Ok(Json(json!({ "id": id })))
}
