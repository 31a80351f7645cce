pub mod errors;
pub mod ids;
pub mod ledger;
pub mod messages;
pub mod pagination;

pub use errors::LedgerError;
pub use ledger::{MessageLedger, OwnershipResolver};
