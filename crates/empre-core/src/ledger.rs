use crate::errors::LedgerError;
use crate::ids::{EntityId, UserId};
use crate::messages::{Message, NewMessage};

/// Append-only message persistence.
///
/// Implementations must be safe to call from any thread; the hub actor and
/// request handlers both write through the same ledger.
pub trait MessageLedger: Send + Sync {
    /// Persist a message and return the canonical stored record.
    fn append(&self, message: NewMessage) -> Result<Message, LedgerError>;
}

/// Resolves the current owner of a business entity.
///
/// Ownership can change at any time, so callers resolve per message and do
/// not cache the answer.
pub trait OwnershipResolver: Send + Sync {
    fn owner_of(&self, entity_id: &EntityId) -> Result<UserId, LedgerError>;
}
