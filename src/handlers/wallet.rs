use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Account;
use crate::error::AppError;
use crate::middleware::AuthenticatedAccount;
use crate::AppState;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct MoneyMovementRequest {
    pub phone_number: String,
    pub amount: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Pagination {
    fn bounds(&self) -> (usize, usize) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        (limit, self.offset.unwrap_or(0))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletView {
    pub account_id: Uuid,
    pub balance: u64,
    pub reserved: u64,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for WalletView {
    fn from(account: Account) -> Self {
        Self {
            account_id: account.id,
            balance: account.balance,
            reserved: account.reserved,
            currency: account.currency,
            updated_at: account.updated_at,
        }
    }
}

pub async fn deposit(
    State(state): State<AppState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Json(payload): Json<MoneyMovementRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.settlement.ledger().open_account(account_id).await?;

    let tx = state
        .settlement
        .deposit(account_id, &payload.phone_number, payload.amount)
        .await?;

    tracing::info!(tx_id = %tx.id, account_id = %account_id, "deposit submitted");
    Ok((StatusCode::ACCEPTED, Json(tx)))
}

pub async fn withdraw(
    State(state): State<AppState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Json(payload): Json<MoneyMovementRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.settlement.ledger().open_account(account_id).await?;

    let tx = state
        .settlement
        .withdraw(account_id, &payload.phone_number, payload.amount)
        .await?;

    tracing::info!(tx_id = %tx.id, account_id = %account_id, "withdrawal submitted");
    Ok((StatusCode::ACCEPTED, Json(tx)))
}

pub async fn wallet(
    State(state): State<AppState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
) -> Result<impl IntoResponse, AppError> {
    let account = state.settlement.ledger().open_account(account_id).await?;
    Ok(Json(WalletView::from(account)))
}

pub async fn transactions(
    State(state): State<AppState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let (limit, offset) = page.bounds();
    let txs = state
        .settlement
        .ledger()
        .transactions_for(account_id, limit, offset)
        .await?;
    Ok(Json(txs))
}
