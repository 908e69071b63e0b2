//! Periodic report of withdrawals and deposits stuck in `PendingGateway`.
//!
//! Reservations do not expire on their own; the provider's timeout
//! notification is the only thing that releases them. This sweep makes
//! long-pending transactions visible so operators can chase the provider.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::ledger::{Ledger, LedgerResult};

pub struct Reconciler {
    ledger: Arc<Ledger>,
    stale_after: Duration,
}

impl Reconciler {
    pub fn new(ledger: Arc<Ledger>, stale_after: Duration) -> Self {
        Self { ledger, stale_after }
    }

    /// Logs every transaction pending longer than `stale_after`; returns how many.
    pub async fn sweep_once(&self) -> LedgerResult<usize> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::weeks(52));
        let cutoff = Utc::now() - stale_after;
        let stale = self.ledger.stale_pending(cutoff).await?;

        for tx in &stale {
            tracing::warn!(
                tx_id = %tx.id,
                account_id = %tx.account_id,
                kind = ?tx.kind,
                amount = %tx.amount,
                correlation_id = tx.correlation_id.as_deref().unwrap_or_default(),
                submitted_at = ?tx.submitted_at,
                "transaction still awaiting provider notification"
            );
        }
        Ok(stale.len())
    }

    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match self.sweep_once().await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(count, "stale pending transactions found"),
                    Err(e) => tracing::error!(error = %e, "reconciliation sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryAccountRepository, InMemoryTransactionRepository};
    use crate::domain::Amount;
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_counts_only_stale_transactions() {
        let ledger = Arc::new(Ledger::new(
            Arc::new(InMemoryAccountRepository::new()),
            Arc::new(InMemoryTransactionRepository::new()),
            "KES",
        ));
        let account = ledger.open_account(Uuid::new_v4()).await.unwrap();
        let tx = ledger
            .record_deposit(account.id, Amount::new(5).unwrap(), "254712345678".into())
            .await
            .unwrap();
        ledger.submit_deposit(tx.id, "ws_CO_9".into(), None).await.unwrap();

        let patient = Reconciler::new(Arc::clone(&ledger), Duration::from_secs(3600));
        assert_eq!(patient.sweep_once().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let eager = Reconciler::new(ledger, Duration::from_millis(1));
        assert_eq!(eager.sweep_once().await.unwrap(), 1);
    }
}
