//! Transaction domain entity.
//! Framework-agnostic representation of one settlement attempt and its
//! lifecycle `Created -> PendingGateway -> {Completed | Failed | TimedOut}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::money::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Created,
    PendingGateway,
    Completed,
    Failed,
    TimedOut,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::TimedOut
        )
    }

    fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Created, PendingGateway)
                | (Created, Failed)
                | (PendingGateway, Completed)
                | (PendingGateway, Failed)
                | (PendingGateway, TimedOut)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Created => "created",
            TransactionStatus::PendingGateway => "pending_gateway",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transaction {id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub id: Uuid,
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

/// Domain entity representing a settlement attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Amount,
    /// Normalized counter-party phone number.
    pub account_ref: String,
    /// Key the provider's notifications are matched on.
    pub correlation_id: Option<String>,
    /// Provider receipt (M-Pesa receipt or B2C transaction id) once known.
    pub provider_reference: Option<String>,
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub provider_response: Option<serde_json::Value>,
}

impl Transaction {
    pub fn new(
        account_id: Uuid,
        kind: TransactionKind,
        amount: Amount,
        account_ref: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            kind,
            amount,
            account_ref,
            correlation_id: None,
            provider_reference: None,
            status: TransactionStatus::Created,
            failure_reason: None,
            created_at: now,
            submitted_at: None,
            resolved_at: None,
            updated_at: now,
            provider_response: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn mark_submitted(&mut self, correlation_id: String) -> Result<(), TransitionError> {
        self.transition(TransactionStatus::PendingGateway)?;
        self.correlation_id = Some(correlation_id);
        self.submitted_at = Some(self.updated_at);
        Ok(())
    }

    pub(crate) fn mark_resolved(
        &mut self,
        status: TransactionStatus,
        failure_reason: Option<String>,
        provider_reference: Option<String>,
        provider_response: Option<serde_json::Value>,
    ) -> Result<(), TransitionError> {
        self.transition(status)?;
        self.resolved_at = Some(self.updated_at);
        self.failure_reason = failure_reason;
        if provider_reference.is_some() {
            self.provider_reference = provider_reference;
        }
        if provider_response.is_some() {
            self.provider_response = provider_response;
        }
        Ok(())
    }

    fn transition(&mut self, next: TransactionStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit() -> Transaction {
        Transaction::new(
            Uuid::new_v4(),
            TransactionKind::Deposit,
            Amount::new(100).unwrap(),
            "254712345678".to_string(),
        )
    }

    #[test]
    fn new_transaction_starts_created() {
        let tx = deposit();
        assert_eq!(tx.status, TransactionStatus::Created);
        assert!(tx.correlation_id.is_none());
        assert!(tx.submitted_at.is_none());
    }

    #[test]
    fn submit_assigns_correlation_and_timestamp() {
        let mut tx = deposit();
        tx.mark_submitted("ws_CO_123".to_string()).unwrap();
        assert_eq!(tx.status, TransactionStatus::PendingGateway);
        assert_eq!(tx.correlation_id.as_deref(), Some("ws_CO_123"));
        assert!(tx.submitted_at.is_some());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut tx = deposit();
        tx.mark_submitted("ws_CO_1".to_string()).unwrap();
        tx.mark_resolved(TransactionStatus::Completed, None, Some("RCPT".into()), None)
            .unwrap();
        assert!(tx.is_terminal());
        assert!(tx.resolved_at.is_some());

        let err = tx
            .mark_resolved(TransactionStatus::Failed, None, None, None)
            .unwrap_err();
        assert_eq!(err.from, TransactionStatus::Completed);
        assert_eq!(err.to, TransactionStatus::Failed);
    }

    #[test]
    fn created_cannot_complete_directly() {
        let mut tx = deposit();
        assert!(tx
            .mark_resolved(TransactionStatus::Completed, None, None, None)
            .is_err());
        assert!(tx
            .mark_resolved(TransactionStatus::Failed, Some("gateway down".into()), None, None)
            .is_ok());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TransactionStatus::PendingGateway).unwrap();
        assert_eq!(json, "\"pending_gateway\"");
    }
}
