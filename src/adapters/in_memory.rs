//! In-memory implementation of the storage ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Account, Transaction, TransactionStatus};
use crate::ports::{AccountRepository, RepositoryError, RepositoryResult, TransactionRepository};

/// Thread-safe account store backed by `Arc<RwLock<HashMap<..>>>`.
#[derive(Default, Clone)]
pub struct InMemoryAccountRepository {
    accounts: Arc<RwLock<HashMap<Uuid, Account>>>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn insert(&self, account: &Account) -> RepositoryResult<Account> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            return Err(RepositoryError::Conflict(format!(
                "account {} already exists",
                account.id
            )));
        }
        accounts.insert(account.id, account.clone());
        Ok(account.clone())
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&id).cloned())
    }

    async fn update(&self, account: &Account) -> RepositoryResult<()> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(account.id.to_string())),
        }
    }
}

#[derive(Default)]
struct TransactionTable {
    rows: HashMap<Uuid, Transaction>,
    by_correlation: HashMap<String, Uuid>,
}

/// Thread-safe transaction store with a unique index on correlation id.
#[derive(Default, Clone)]
pub struct InMemoryTransactionRepository {
    table: Arc<RwLock<TransactionTable>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn claim_correlation(table: &mut TransactionTable, tx: &Transaction) -> RepositoryResult<()> {
    if let Some(correlation_id) = &tx.correlation_id {
        match table.by_correlation.get(correlation_id) {
            Some(owner) if *owner != tx.id => {
                return Err(RepositoryError::Conflict(format!(
                    "correlation id {} already assigned",
                    correlation_id
                )));
            }
            _ => {
                table.by_correlation.insert(correlation_id.clone(), tx.id);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let mut table = self.table.write().await;
        if table.rows.contains_key(&tx.id) {
            return Err(RepositoryError::Conflict(format!(
                "transaction {} already exists",
                tx.id
            )));
        }
        claim_correlation(&mut table, tx)?;
        table.rows.insert(tx.id, tx.clone());
        Ok(tx.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Transaction> {
        let table = self.table.read().await;
        table
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn get_by_correlation(&self, correlation_id: &str) -> RepositoryResult<Option<Transaction>> {
        let table = self.table.read().await;
        Ok(table
            .by_correlation
            .get(correlation_id)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn update(&self, tx: &Transaction) -> RepositoryResult<()> {
        let mut table = self.table.write().await;
        if !table.rows.contains_key(&tx.id) {
            return Err(RepositoryError::NotFound(tx.id.to_string()));
        }
        claim_correlation(&mut table, tx)?;
        table.rows.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> RepositoryResult<Vec<Transaction>> {
        let table = self.table.read().await;
        let mut rows: Vec<Transaction> = table
            .rows
            .values()
            .filter(|tx| tx.account_id == account_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_pending_older_than(&self, cutoff: DateTime<Utc>) -> RepositoryResult<Vec<Transaction>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .filter(|tx| tx.status == TransactionStatus::PendingGateway)
            .filter(|tx| tx.submitted_at.map(|at| at < cutoff).unwrap_or(false))
            .cloned()
            .collect())
    }
}
