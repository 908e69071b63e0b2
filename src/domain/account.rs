//! Wallet account entity.
//! Balance mutation goes through the ledger only; the methods here are the
//! arithmetic it applies while holding the account lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::money::Amount;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    #[error("insufficient balance: available {available}, requested {requested}")]
    Insufficient { available: u64, requested: u64 },

    #[error("reserved amount {reserved} is smaller than {requested}")]
    ReservationUnderflow { reserved: u64, requested: u64 },

    #[error("balance overflow")]
    Overflow,
}

/// One wallet per user.
///
/// `balance` is what the user can spend right now. Amounts held for in-flight
/// withdrawals are already subtracted from it and tracked in `reserved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub balance: u64,
    pub reserved: u64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: Uuid, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: 0,
            reserved: 0,
            currency: currency.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn credit(&mut self, amount: Amount) -> Result<(), BalanceError> {
        self.balance = self
            .balance
            .checked_add(amount.minor_units())
            .ok_or(BalanceError::Overflow)?;
        self.touch();
        Ok(())
    }

    /// Moves `amount` out of the spendable balance into the reservation.
    pub(crate) fn reserve(&mut self, amount: Amount) -> Result<(), BalanceError> {
        let requested = amount.minor_units();
        if self.balance < requested {
            return Err(BalanceError::Insufficient {
                available: self.balance,
                requested,
            });
        }
        let reserved = self
            .reserved
            .checked_add(requested)
            .ok_or(BalanceError::Overflow)?;
        self.balance -= requested;
        self.reserved = reserved;
        self.touch();
        Ok(())
    }

    /// The withdrawal settled; the held amount leaves the wallet for good.
    pub(crate) fn finalize_reservation(&mut self, amount: Amount) -> Result<(), BalanceError> {
        self.take_reserved(amount)?;
        self.touch();
        Ok(())
    }

    /// The withdrawal failed; the held amount returns to the spendable balance.
    pub(crate) fn release_reservation(&mut self, amount: Amount) -> Result<(), BalanceError> {
        let balance = self
            .balance
            .checked_add(amount.minor_units())
            .ok_or(BalanceError::Overflow)?;
        self.take_reserved(amount)?;
        self.balance = balance;
        self.touch();
        Ok(())
    }

    fn take_reserved(&mut self, amount: Amount) -> Result<(), BalanceError> {
        let requested = amount.minor_units();
        self.reserved = self
            .reserved
            .checked_sub(requested)
            .ok_or(BalanceError::ReservationUnderflow {
                reserved: self.reserved,
                requested,
            })?;
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
