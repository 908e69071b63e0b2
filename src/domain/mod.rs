pub mod account;
pub mod money;
pub mod notification;
pub mod transaction;

pub use account::{Account, BalanceError};
pub use money::{Amount, AmountError};
pub use notification::{SettlementNotification, SettlementOutcome};
pub use transaction::{Transaction, TransactionKind, TransactionStatus, TransitionError};
