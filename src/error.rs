use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::mpesa::GatewayError;
use crate::services::{LedgerError, SettlementError};

/// Errors surfaced to wallet API callers. Provider details stay in the logs.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payment provider authentication failed")]
    GatewayAuth,

    #[error("Payment provider unavailable")]
    GatewayUnavailable,

    #[error("Payment provider declined the request")]
    GatewayRejected,

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::GatewayAuth | AppError::GatewayRejected => StatusCode::BAD_GATEWAY,
            AppError::GatewayUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidAccountReference(msg) => AppError::Validation(msg),
            GatewayError::Auth(_) => AppError::GatewayAuth,
            GatewayError::Unavailable(_) => AppError::GatewayUnavailable,
            GatewayError::Rejected { .. } => AppError::GatewayRejected,
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(id) => AppError::NotFound(format!("account {}", id)),
            LedgerError::InsufficientBalance { .. } => AppError::InsufficientBalance,
            LedgerError::UnmatchedCorrelation(id) => {
                AppError::NotFound(format!("transaction for correlation id {}", id))
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::Validation(msg) => AppError::Validation(msg),
            SettlementError::InsufficientBalance { .. } => AppError::InsufficientBalance,
            SettlementError::Gateway(e) => e.into(),
            SettlementError::Ledger(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let AppError::Internal(detail) = &self {
            tracing::error!(detail = %detail, "internal error");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
