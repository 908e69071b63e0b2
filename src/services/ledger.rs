//! Transaction ledger: the only writer of account balances.
//!
//! Every balance-affecting step runs while holding the owning account's
//! lock, and the transaction record is re-read under that lock before its
//! status is checked, so a duplicate or concurrent notification can never
//! apply a balance effect twice.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    Account, Amount, BalanceError, SettlementNotification, SettlementOutcome, Transaction,
    TransactionKind, TransactionStatus, TransitionError,
};
use crate::ports::{AccountRepository, RepositoryError, TransactionRepository};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(Uuid),

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: u64, requested: u64 },

    #[error("no transaction matches correlation id {0}")]
    UnmatchedCorrelation(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("balance error: {0}")]
    Balance(BalanceError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<BalanceError> for LedgerError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::Insufficient {
                available,
                requested,
            } => LedgerError::InsufficientBalance {
                available,
                requested,
            },
            other => LedgerError::Balance(other),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result of applying a matched notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The transaction reached its terminal state now.
    Applied(Transaction),
    /// The transaction was already terminal; nothing changed.
    Duplicate(Transaction),
}

impl Resolution {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Resolution::Applied(tx) | Resolution::Duplicate(tx) => tx,
        }
    }
}

/// One async mutex per account id.
#[derive(Default)]
struct AccountLocks {
    inner: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    async fn acquire(&self, account_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(map.entry(account_id).or_default())
        };
        lock.lock_owned().await
    }
}

pub struct Ledger {
    accounts: Arc<dyn AccountRepository>,
    transactions: Arc<dyn TransactionRepository>,
    locks: AccountLocks,
    currency: String,
}

impl Ledger {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        transactions: Arc<dyn TransactionRepository>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            accounts,
            transactions,
            locks: AccountLocks::default(),
            currency: currency.into(),
        }
    }

    /// Returns the account, creating an empty one on first use.
    pub async fn open_account(&self, account_id: Uuid) -> LedgerResult<Account> {
        let _guard = self.locks.acquire(account_id).await;
        if let Some(existing) = self.accounts.get(account_id).await? {
            return Ok(existing);
        }
        let account = Account::new(account_id, self.currency.clone());
        let created = self.accounts.insert(&account).await?;
        tracing::info!(account_id = %account_id, currency = %created.currency, "account opened");
        Ok(created)
    }

    pub async fn account(&self, account_id: Uuid) -> LedgerResult<Account> {
        self.accounts
            .get(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    pub async fn transaction(&self, tx_id: Uuid) -> LedgerResult<Transaction> {
        Ok(self.transactions.get_by_id(tx_id).await?)
    }

    pub async fn transactions_for(
        &self,
        account_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> LedgerResult<Vec<Transaction>> {
        Ok(self
            .transactions
            .list_for_account(account_id, limit, offset)
            .await?)
    }

    pub async fn stale_pending(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<Transaction>> {
        Ok(self.transactions.list_pending_older_than(cutoff).await?)
    }

    /// Persists a new deposit in `Created`. No balance change.
    pub async fn record_deposit(
        &self,
        account_id: Uuid,
        amount: Amount,
        account_ref: String,
    ) -> LedgerResult<Transaction> {
        self.account(account_id).await?;
        let tx = Transaction::new(account_id, TransactionKind::Deposit, amount, account_ref);
        let inserted = self.transactions.insert(&tx).await?;
        tracing::debug!(tx_id = %inserted.id, account_id = %account_id, amount = %amount, "deposit recorded");
        Ok(inserted)
    }

    /// `Created -> PendingGateway` for a deposit the gateway accepted.
    pub async fn submit_deposit(
        &self,
        tx_id: Uuid,
        correlation_id: String,
        gateway_ack: Option<serde_json::Value>,
    ) -> LedgerResult<Transaction> {
        let account_id = self.transactions.get_by_id(tx_id).await?.account_id;
        let _guard = self.locks.acquire(account_id).await;

        let mut tx = self.transactions.get_by_id(tx_id).await?;
        tx.mark_submitted(correlation_id)?;
        if gateway_ack.is_some() {
            tx.provider_response = gateway_ack;
        }
        self.transactions.update(&tx).await?;

        tracing::info!(
            tx_id = %tx.id,
            correlation_id = tx.correlation_id.as_deref().unwrap_or_default(),
            "deposit pending gateway"
        );
        Ok(tx)
    }

    /// Checks the balance, records the withdrawal and reserves its amount in one
    /// step, leaving the transaction `PendingGateway` under `correlation_id`.
    pub async fn reserve_withdrawal(
        &self,
        account_id: Uuid,
        amount: Amount,
        account_ref: String,
        correlation_id: String,
    ) -> LedgerResult<Transaction> {
        let _guard = self.locks.acquire(account_id).await;

        let mut account = self.account(account_id).await?;
        account.reserve(amount)?;

        let mut tx = Transaction::new(account_id, TransactionKind::Withdrawal, amount, account_ref);
        tx.mark_submitted(correlation_id)?;

        let inserted = self.transactions.insert(&tx).await?;
        self.accounts.update(&account).await?;

        tracing::info!(
            tx_id = %inserted.id,
            account_id = %account_id,
            amount = %amount,
            balance = account.balance,
            reserved = account.reserved,
            "withdrawal reserved"
        );
        Ok(inserted)
    }

    /// Stores the gateway's acknowledgement on a still-pending transaction.
    pub async fn attach_gateway_ack(&self, tx_id: Uuid, ack: serde_json::Value) -> LedgerResult<Transaction> {
        let account_id = self.transactions.get_by_id(tx_id).await?.account_id;
        let _guard = self.locks.acquire(account_id).await;

        let mut tx = self.transactions.get_by_id(tx_id).await?;
        if !tx.is_terminal() {
            tx.provider_response = Some(ack);
            self.transactions.update(&tx).await?;
        }
        Ok(tx)
    }

    /// Marks a transaction `Failed` after the gateway refused to initiate it,
    /// releasing any reservation. A transaction a callback already settled is left alone.
    pub async fn fail_submission(&self, tx_id: Uuid, reason: &str) -> LedgerResult<Transaction> {
        let account_id = self.transactions.get_by_id(tx_id).await?.account_id;
        let _guard = self.locks.acquire(account_id).await;

        let mut tx = self.transactions.get_by_id(tx_id).await?;
        if tx.is_terminal() {
            tracing::warn!(tx_id = %tx.id, status = %tx.status, "submission failure for already settled transaction");
            return Ok(tx);
        }

        let release = tx.kind == TransactionKind::Withdrawal
            && tx.status == TransactionStatus::PendingGateway;

        tx.mark_resolved(TransactionStatus::Failed, Some(reason.to_string()), None, None)?;

        if release {
            let previous = self.account(account_id).await?;
            let mut account = previous.clone();
            account.release_reservation(tx.amount)?;
            self.commit(&previous, &account, &tx).await?;
            tracing::info!(tx_id = %tx.id, amount = %tx.amount, balance = account.balance, "reservation released after gateway failure");
        } else {
            self.transactions.update(&tx).await?;
        }

        tracing::warn!(tx_id = %tx.id, kind = ?tx.kind, reason, "transaction failed at submission");
        Ok(tx)
    }

    /// Persists a balance change together with the transaction that caused it.
    /// The account is written first; if the transaction write then fails the
    /// account is put back, so the transaction stays non-terminal and a
    /// redelivered notification is applied rather than treated as a duplicate.
    async fn commit(&self, previous: &Account, account: &Account, tx: &Transaction) -> LedgerResult<()> {
        self.accounts.update(account).await?;
        if let Err(e) = self.transactions.update(tx).await {
            if let Err(restore) = self.accounts.update(previous).await {
                tracing::error!(
                    tx_id = %tx.id,
                    account_id = %account.id,
                    error = %restore,
                    "could not roll back account after failed transaction write"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Applies an authenticated notification to the transaction it correlates to.
    pub async fn apply_notification(
        &self,
        notification: SettlementNotification,
    ) -> LedgerResult<Resolution> {
        let correlation_id = notification.correlation_id.clone();

        let candidate = self
            .transactions
            .get_by_correlation(&correlation_id)
            .await?
            .filter(|tx| tx.kind == notification.kind);

        let Some(candidate) = candidate else {
            tracing::warn!(
                correlation_id = %correlation_id,
                kind = ?notification.kind,
                result_code = notification.result_code,
                "unmatched settlement notification"
            );
            return Err(LedgerError::UnmatchedCorrelation(correlation_id));
        };

        let _guard = self.locks.acquire(candidate.account_id).await;

        let mut tx = self.transactions.get_by_id(candidate.id).await?;
        if tx.is_terminal() {
            tracing::info!(
                tx_id = %tx.id,
                correlation_id = %correlation_id,
                status = %tx.status,
                "duplicate settlement notification ignored"
            );
            return Ok(Resolution::Duplicate(tx));
        }

        let target = notification.outcome.terminal_status();
        let failure_reason = match notification.outcome {
            SettlementOutcome::Success => None,
            _ => Some(notification.result_desc.clone()),
        };

        let previous = self.account(tx.account_id).await?;
        let mut account = previous.clone();
        match (tx.kind, notification.outcome) {
            (TransactionKind::Deposit, SettlementOutcome::Success) => account.credit(tx.amount)?,
            (TransactionKind::Withdrawal, SettlementOutcome::Success) => {
                account.finalize_reservation(tx.amount)?
            }
            (TransactionKind::Withdrawal, _) => account.release_reservation(tx.amount)?,
            (TransactionKind::Deposit, _) => {}
        }

        tx.mark_resolved(
            target,
            failure_reason,
            notification.provider_reference,
            Some(notification.raw),
        )?;

        self.commit(&previous, &account, &tx).await?;

        tracing::info!(
            tx_id = %tx.id,
            correlation_id = %correlation_id,
            kind = ?tx.kind,
            status = %tx.status,
            result_code = notification.result_code,
            balance = account.balance,
            reserved = account.reserved,
            "settlement applied"
        );
        Ok(Resolution::Applied(tx))
    }
}
