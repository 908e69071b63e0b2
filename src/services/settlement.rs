//! Settlement use cases: deposit, withdraw, and provider notifications.
//!
//! The gateway round-trip never runs under an account lock. A withdrawal's
//! funds are reserved before the outbound call, so the lock only covers the
//! balance check and the reservation itself.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::ledger::{Ledger, LedgerError, Resolution};
use crate::domain::{Amount, SettlementNotification, SettlementOutcome, Transaction};
use crate::mpesa::{self, normalize_account_ref, GatewayError, PaymentGateway};
use crate::ports::RepositoryError;

const MAX_CORRELATION_ATTEMPTS: usize = 3;

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: u64, requested: u64 },

    #[error(transparent)]
    Gateway(GatewayError),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<GatewayError> for SettlementError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidAccountReference(msg) => SettlementError::Validation(msg),
            other => SettlementError::Gateway(other),
        }
    }
}

impl From<LedgerError> for SettlementError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance {
                available,
                requested,
            } => SettlementError::InsufficientBalance {
                available,
                requested,
            },
            other => SettlementError::Ledger(other),
        }
    }
}

pub struct SettlementService {
    ledger: Arc<Ledger>,
    gateway: Arc<dyn PaymentGateway>,
}

impl SettlementService {
    pub fn new(ledger: Arc<Ledger>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { ledger, gateway }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    fn validate(account_ref: &str, amount: i64) -> Result<(String, Amount), SettlementError> {
        let amount = Amount::new(amount).map_err(|e| SettlementError::Validation(e.to_string()))?;
        let phone = normalize_account_ref(account_ref)?;
        Ok((phone, amount))
    }

    /// Starts a customer push payment. The balance only moves when the
    /// success notification arrives.
    pub async fn deposit(
        &self,
        account_id: Uuid,
        account_ref: &str,
        amount: i64,
    ) -> Result<Transaction, SettlementError> {
        let (phone, amount) = Self::validate(account_ref, amount)?;
        let tx = self.ledger.record_deposit(account_id, amount, phone.clone()).await?;

        match self.gateway.initiate_push(&phone, amount).await {
            Ok(ack) => {
                let raw = serde_json::to_value(&ack).ok();
                let submitted = self
                    .ledger
                    .submit_deposit(tx.id, ack.checkout_request_id, raw)
                    .await?;
                Ok(submitted)
            }
            Err(err) => {
                tracing::error!(tx_id = %tx.id, error = %err, "push payment initiation failed");
                if let Err(ledger_err) = self.ledger.fail_submission(tx.id, &err.to_string()).await {
                    tracing::error!(tx_id = %tx.id, error = %ledger_err, "could not mark deposit failed");
                }
                Err(err.into())
            }
        }
    }

    /// Reserves the amount, then starts a business-to-customer payment.
    /// An immediate gateway refusal releases the reservation.
    pub async fn withdraw(
        &self,
        account_id: Uuid,
        account_ref: &str,
        amount: i64,
    ) -> Result<Transaction, SettlementError> {
        let (phone, amount) = Self::validate(account_ref, amount)?;

        let (tx, originator_id) = self.reserve(account_id, amount, &phone).await?;

        match self.gateway.initiate_bulk(&phone, amount, &originator_id).await {
            Ok(ack) => {
                let tx = match serde_json::to_value(&ack) {
                    Ok(raw) => self.ledger.attach_gateway_ack(tx.id, raw).await?,
                    Err(_) => tx,
                };
                Ok(tx)
            }
            Err(err) => {
                tracing::error!(tx_id = %tx.id, error = %err, "bulk payment initiation failed");
                if let Err(ledger_err) = self.ledger.fail_submission(tx.id, &err.to_string()).await {
                    tracing::error!(tx_id = %tx.id, error = %ledger_err, "could not release reservation");
                }
                Err(err.into())
            }
        }
    }

    async fn reserve(
        &self,
        account_id: Uuid,
        amount: Amount,
        phone: &str,
    ) -> Result<(Transaction, String), SettlementError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let originator_id = mpesa::originator_conversation_id();
            match self
                .ledger
                .reserve_withdrawal(account_id, amount, phone.to_string(), originator_id.clone())
                .await
            {
                Ok(tx) => return Ok((tx, originator_id)),
                Err(LedgerError::Repository(RepositoryError::Conflict(_)))
                    if attempt < MAX_CORRELATION_ATTEMPTS =>
                {
                    tracing::debug!(originator_id = %originator_id, "originator id collision, regenerating");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Applies an authenticated success/failure notification.
    pub async fn handle_settlement_notification(
        &self,
        notification: SettlementNotification,
    ) -> Result<Resolution, SettlementError> {
        Ok(self.ledger.apply_notification(notification).await?)
    }

    /// Applies an authenticated queue-timeout notification; always resolves to `TimedOut`.
    pub async fn handle_timeout(
        &self,
        mut notification: SettlementNotification,
    ) -> Result<Resolution, SettlementError> {
        notification.outcome = SettlementOutcome::Timeout;
        Ok(self.ledger.apply_notification(notification).await?)
    }
}
