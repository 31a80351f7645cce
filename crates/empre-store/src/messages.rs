use chrono::{DateTime, SubsecRound, Utc};
use tracing::{instrument, warn};

use empre_core::ids::{EntityId, MessageId, UserId};
use empre_core::messages::{Message, NewMessage};
use empre_core::{LedgerError, MessageLedger};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Column list shared by every query that materializes a `Message`.
pub(crate) const MESSAGE_COLUMNS: &str =
    "m.id, m.sender_id, m.user_id, m.entity_id, m.sent_by_entity, m.content, m.is_read, m.created_at, m.deleted_at";

/// Number of columns in `MESSAGE_COLUMNS`.
pub(crate) const MESSAGE_COLUMN_COUNT: usize = 9;

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    Ok(Message {
        id: row_helpers::get_id(row, 0, "messages", "id")?,
        sender_id: row_helpers::get_id(row, 1, "messages", "sender_id")?,
        user_id: row_helpers::get_id(row, 2, "messages", "user_id")?,
        entity_id: row_helpers::get_id(row, 3, "messages", "entity_id")?,
        sent_by_entity: row_helpers::get(row, 4, "messages", "sent_by_entity")?,
        content: row_helpers::get(row, 5, "messages", "content")?,
        is_read: row_helpers::get(row, 6, "messages", "is_read")?,
        created_at: row_helpers::get_ts(row, 7, "messages", "created_at")?,
        deleted_at: row_helpers::get_opt_ts(row, 8, "messages", "deleted_at")?,
    })
}

/// The message ledger: append-only rows plus the read/delete flags.
#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append with the current time.
    pub fn create(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.create_at(message, Utc::now())
    }

    /// Append with an explicit creation time.
    #[instrument(skip(self, message), fields(entity_id = %message.entity_id, user_id = %message.user_id, sender_id = %message.sender_id))]
    pub fn create_at(
        &self,
        message: NewMessage,
        created_at: DateTime<Utc>,
    ) -> Result<Message, StoreError> {
        // Stored with microsecond precision; keep the returned value identical.
        let message = message.into_message(MessageId::new(), created_at.trunc_subsecs(6));
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, user_id, entity_id, sent_by_entity, content, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                rusqlite::params![
                    message.id.to_db(),
                    message.sender_id.to_db(),
                    message.user_id.to_db(),
                    message.entity_id.to_db(),
                    message.sent_by_entity,
                    message.content,
                    row_helpers::format_ts(&message.created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(message)
    }

    /// Fetch a message by id, including soft-deleted ones.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn get(&self, id: &MessageId) -> Result<Message, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([id.to_db()])?;
            match rows.next()? {
                Some(row) => row_to_message(row),
                None => Err(StoreError::NotFound(format!("message {id}"))),
            }
        })
    }

    /// Mark every unread message of a conversation as read, except the ones
    /// the reader wrote. Returns how many rows changed.
    #[instrument(skip(self), fields(entity_id = %entity_id, user_id = %user_id, reader = %reader))]
    pub fn mark_read(
        &self,
        entity_id: &EntityId,
        user_id: &UserId,
        reader: &UserId,
    ) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE entity_id = ?1 AND user_id = ?2 AND sender_id != ?3
                   AND is_read = 0 AND deleted_at IS NULL",
                rusqlite::params![entity_id.to_db(), user_id.to_db(), reader.to_db()],
            )?)
        })
    }

    /// Soft-delete a message. Only its author may delete it.
    #[instrument(skip(self), fields(message_id = %id, requester = %requester))]
    pub fn soft_delete(&self, id: &MessageId, requester: &UserId) -> Result<(), StoreError> {
        let now = row_helpers::format_ts(&Utc::now());
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE messages SET deleted_at = ?1
                 WHERE id = ?2 AND sender_id = ?3 AND deleted_at IS NULL",
                rusqlite::params![now, id.to_db(), requester.to_db()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("message {id}")));
        }
        Ok(())
    }
}

impl MessageLedger for MessageRepo {
    fn append(&self, message: NewMessage) -> Result<Message, LedgerError> {
        self.create(message).map_err(|e| {
            warn!(error = %e, "ledger append failed");
            LedgerError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityRepo;

    fn setup() -> (MessageRepo, EntityRepo) {
        let db = Database::in_memory().unwrap();
        (MessageRepo::new(db.clone()), EntityRepo::new(db))
    }

    fn new_message(sender: UserId, user: UserId, entity: EntityId, content: &str) -> NewMessage {
        NewMessage {
            sender_id: sender,
            user_id: user,
            entity_id: entity,
            sent_by_entity: sender != user,
            content: content.into(),
        }
    }

    #[test]
    fn append_and_get() {
        let (messages, entities) = setup();
        let owner = UserId::new();
        let customer = UserId::new();
        let entity = entities.create(&owner, "Cafe", "").unwrap();

        let stored = messages
            .append(new_message(customer, customer, entity.id, "hola"))
            .unwrap();
        assert!(!stored.is_read);
        assert_eq!(stored.sender_id, customer);

        let fetched = messages.get(&stored.id).unwrap();
        assert_eq!(fetched.content, "hola");
        assert_eq!(fetched.created_at, stored.created_at);
        assert!(fetched.deleted_at.is_none());
    }

    #[test]
    fn append_to_unknown_entity_fails() {
        let (messages, _) = setup();
        let user = UserId::new();
        let result = messages.append(new_message(user, user, EntityId::new(), "lost"));
        assert!(matches!(result, Err(LedgerError::Storage(_))));
    }

    #[test]
    fn mark_read_skips_own_messages() {
        let (messages, entities) = setup();
        let owner = UserId::new();
        let customer = UserId::new();
        let entity = entities.create(&owner, "Cafe", "").unwrap();

        let from_customer = messages.create(new_message(customer, customer, entity.id, "hi")).unwrap();
        let from_owner = messages.create(new_message(owner, customer, entity.id, "hello")).unwrap();

        let changed = messages.mark_read(&entity.id, &customer, &owner).unwrap();
        assert_eq!(changed, 1);
        assert!(messages.get(&from_customer.id).unwrap().is_read);
        assert!(!messages.get(&from_owner.id).unwrap().is_read);

        assert_eq!(messages.mark_read(&entity.id, &customer, &owner).unwrap(), 0);
    }

    #[test]
    fn soft_delete_requires_author() {
        let (messages, entities) = setup();
        let owner = UserId::new();
        let customer = UserId::new();
        let entity = entities.create(&owner, "Cafe", "").unwrap();
        let msg = messages.create(new_message(customer, customer, entity.id, "oops")).unwrap();

        assert!(matches!(
            messages.soft_delete(&msg.id, &owner),
            Err(StoreError::NotFound(_))
        ));
        messages.soft_delete(&msg.id, &customer).unwrap();
        assert!(messages.get(&msg.id).unwrap().deleted_at.is_some());

        // Deleting twice is a miss.
        assert!(messages.soft_delete(&msg.id, &customer).is_err());
    }
}
