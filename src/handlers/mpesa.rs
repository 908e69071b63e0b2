//! Provider-facing callback endpoints. They sit behind the callback gate, so
//! anything reaching these handlers has already proven its origin and token.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::SettlementNotification;
use crate::mpesa::payloads::{B2cResultEnvelope, CallbackAck, StkCallbackEnvelope};
use crate::services::{LedgerError, Resolution, SettlementError};
use crate::AppState;

fn ack(status: StatusCode, body: CallbackAck) -> Response {
    (status, Json(body)).into_response()
}

/// Parses the raw body once as JSON (kept for audit) and once as the typed envelope.
fn parse<T: DeserializeOwned>(channel: &'static str, body: &Bytes) -> Result<(T, Value), Response> {
    let raw: Value = serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(channel, error = %e, "callback body is not json");
        ack(StatusCode::BAD_REQUEST, CallbackAck::rejected("Invalid payload"))
    })?;
    let typed = serde_json::from_value::<T>(raw.clone()).map_err(|e| {
        tracing::warn!(channel, error = %e, "callback body has unexpected shape");
        ack(StatusCode::BAD_REQUEST, CallbackAck::rejected("Invalid payload"))
    })?;
    Ok((typed, raw))
}

fn respond(channel: &'static str, correlation_id: &str, result: Result<Resolution, SettlementError>) -> Response {
    match result {
        Ok(Resolution::Applied(tx)) => {
            tracing::info!(
                channel,
                tx_id = %tx.id,
                correlation_id,
                status = %tx.status,
                "settlement notification applied"
            );
            ack(StatusCode::OK, CallbackAck::accepted())
        }
        Ok(Resolution::Duplicate(tx)) => {
            tracing::info!(
                channel,
                tx_id = %tx.id,
                correlation_id,
                status = %tx.status,
                "duplicate settlement notification ignored"
            );
            ack(StatusCode::OK, CallbackAck::accepted())
        }
        Err(SettlementError::Ledger(LedgerError::UnmatchedCorrelation(_))) => {
            tracing::warn!(channel, correlation_id, "unmatched settlement notification");
            ack(StatusCode::NOT_FOUND, CallbackAck::rejected("Unknown transaction"))
        }
        Err(err) => {
            tracing::error!(channel, correlation_id, error = %err, "failed to apply settlement notification");
            ack(StatusCode::INTERNAL_SERVER_ERROR, CallbackAck::rejected("Internal error"))
        }
    }
}

async fn settle(state: &AppState, channel: &'static str, notification: SettlementNotification, timeout: bool) -> Response {
    let correlation_id = notification.correlation_id.clone();
    let result = if timeout {
        state.settlement.handle_timeout(notification).await
    } else {
        state.settlement.handle_settlement_notification(notification).await
    };
    respond(channel, &correlation_id, result)
}

/// Push-payment (deposit) result.
pub async fn stk_callback(State(state): State<AppState>, body: Bytes) -> Response {
    let (envelope, raw) = match parse::<StkCallbackEnvelope>("stk", &body) {
        Ok(parsed) => parsed,
        Err(rejection) => return rejection,
    };
    let notification = envelope.body.stk_callback.into_notification(raw);
    settle(&state, "stk", notification, false).await
}

/// Bulk-payment (withdrawal) result.
pub async fn b2c_result(State(state): State<AppState>, body: Bytes) -> Response {
    let (envelope, raw) = match parse::<B2cResultEnvelope>("b2c_result", &body) {
        Ok(parsed) => parsed,
        Err(rejection) => return rejection,
    };
    let notification = envelope.result.into_notification(raw);
    settle(&state, "b2c_result", notification, false).await
}

/// Bulk-payment queue timeout.
pub async fn b2c_queue_timeout(State(state): State<AppState>, body: Bytes) -> Response {
    let (envelope, raw) = match parse::<B2cResultEnvelope>("b2c_queue", &body) {
        Ok(parsed) => parsed,
        Err(rejection) => return rejection,
    };
    let notification = envelope.result.into_notification(raw);
    settle(&state, "b2c_queue", notification, true).await
}
