//! Storage ports.
//! The ledger talks to storage only through these traits so the engine can be
//! backed by any store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Account, Transaction};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// A settlement writes the account before the transaction. When the
/// transaction write fails the ledger writes the previous account back, so
/// implementations must accept an `update` that restores an earlier row.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn insert(&self, account: &Account) -> RepositoryResult<Account>;
    async fn get(&self, id: Uuid) -> RepositoryResult<Option<Account>>;
    async fn update(&self, account: &Account) -> RepositoryResult<()>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction>;
    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Transaction>;
    async fn get_by_correlation(&self, correlation_id: &str) -> RepositoryResult<Option<Transaction>>;
    /// Fails with `Conflict` if the correlation id already belongs to another transaction.
    async fn update(&self, tx: &Transaction) -> RepositoryResult<()>;
    /// Newest first.
    async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> RepositoryResult<Vec<Transaction>>;
    async fn list_pending_older_than(&self, cutoff: DateTime<Utc>) -> RepositoryResult<Vec<Transaction>>;
}
