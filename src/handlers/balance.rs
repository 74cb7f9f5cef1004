use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::db::models::Balance;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub current: BigDecimal,
    pub withdrawn: BigDecimal,
}

impl From<Balance> for BalanceResponse {
    fn from(balance: Balance) -> Self {
        Self {
            current: balance.current,
            withdrawn: balance.withdrawn,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub order: String,
    pub sum: BigDecimal,
    pub processed_at: chrono::DateTime<chrono::Utc>,
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let balance = state.ledger.get_balance(user_id).await?;
    Ok(Json(BalanceResponse::from(balance)))
}

pub async fn list_withdrawals(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let withdrawals: Vec<WithdrawalResponse> = state
        .ledger
        .list_withdrawals(user_id)
        .await?
        .into_iter()
        .map(|t| WithdrawalResponse {
            order: t.order_number,
            sum: t.amount,
            processed_at: t.processed_at,
        })
        .collect();

    Ok(Json(withdrawals))
}
