pub mod ledger;
pub mod reconciler;
pub mod settlement;

pub use ledger::{Ledger, LedgerError, Resolution};
pub use reconciler::Reconciler;
pub use settlement::{SettlementError, SettlementService};
