//! Authenticated settlement notifications, in provider-neutral form.

use serde::{Deserialize, Serialize};

use super::transaction::{TransactionKind, TransactionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Success,
    Failure,
    Timeout,
}

impl SettlementOutcome {
    pub fn terminal_status(&self) -> TransactionStatus {
        match self {
            SettlementOutcome::Success => TransactionStatus::Completed,
            SettlementOutcome::Failure => TransactionStatus::Failed,
            SettlementOutcome::Timeout => TransactionStatus::TimedOut,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementNotification {
    pub correlation_id: String,
    /// Kind of transaction the delivering channel settles.
    pub kind: TransactionKind,
    pub outcome: SettlementOutcome,
    pub result_code: i64,
    pub result_desc: String,
    pub provider_reference: Option<String>,
    /// Notification body as received, kept for audit.
    pub raw: serde_json::Value,
}
