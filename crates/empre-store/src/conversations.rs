//! Read-side views over the message ledger.
//!
//! There is no conversations table. A conversation is the set of messages
//! sharing one `(entity_id, user_id)` pair, and its inbox entry is the newest
//! non-deleted message of that pair.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use empre_core::ids::{EntityId, UserId};
use empre_core::messages::Message;
use empre_core::pagination::{Page, PageRequest};

use crate::database::Database;
use crate::error::StoreError;
use crate::messages::{row_to_message, MESSAGE_COLUMNS, MESSAGE_COLUMN_COUNT};
use crate::row_helpers;

/// Messages visible to `?1`: the requester is the customer, or currently owns
/// the entity. Ownership is read through the join, so a transfer moves the
/// whole conversation to the new owner.
const VISIBLE_TO_REQUESTER: &str = "
    FROM messages m
    LEFT JOIN entities e ON e.id = m.entity_id AND e.deleted_at IS NULL
    WHERE m.deleted_at IS NULL
      AND (m.user_id = ?1 OR e.owner_id = ?1)";

/// Newest message of a conversation plus what the inbox needs to render the
/// other party.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationHead {
    pub message: Message,
    /// `None` when the entity has been deleted.
    pub owner_id: Option<UserId>,
    pub entity_name: Option<String>,
    pub entity_profile_url: Option<String>,
    /// `None` when the customer has no directory entry.
    pub user_name: Option<String>,
    pub user_profile_picture_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyKind {
    User,
    Entity,
}

/// Summary of whoever sits on the other side of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherParty {
    pub id: String,
    pub name: String,
    pub avatar_url: String,
    pub kind: PartyKind,
}

impl ConversationHead {
    /// The counterpart as seen by `requester`. An owner sees the customer,
    /// everyone else sees the business.
    pub fn other_party(&self, requester: &UserId) -> OtherParty {
        if self.owner_id.as_ref() == Some(requester) {
            OtherParty {
                id: self.message.user_id.to_string(),
                name: self.user_name.clone().unwrap_or_default(),
                avatar_url: self.user_profile_picture_url.clone().unwrap_or_default(),
                kind: PartyKind::User,
            }
        } else {
            OtherParty {
                id: self.message.entity_id.to_string(),
                name: self.entity_name.clone().unwrap_or_default(),
                avatar_url: self.entity_profile_url.clone().unwrap_or_default(),
                kind: PartyKind::Entity,
            }
        }
    }
}

pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// One head per distinct `(entity_id, user_id)` pair visible to the
    /// requester, newest first. `total` counts pairs, not messages.
    #[instrument(skip(self), fields(requester = %requester, page = page.page, page_size = page.page_size))]
    pub fn inbox(
        &self,
        requester: &UserId,
        page: PageRequest,
    ) -> Result<Page<ConversationHead>, StoreError> {
        self.db.with_conn(|conn| {
            let count_sql = format!(
                "SELECT COUNT(*) FROM (SELECT DISTINCT m.entity_id, m.user_id {VISIBLE_TO_REQUESTER})"
            );
            let total: i64 = conn.query_row(&count_sql, [requester.to_db()], |row| row.get(0))?;
            if total == 0 {
                return Ok(Page::empty(page));
            }

            let sql = format!(
                "WITH ranked AS (
                    SELECT {MESSAGE_COLUMNS},
                           ROW_NUMBER() OVER (
                               PARTITION BY m.entity_id, m.user_id
                               ORDER BY m.created_at DESC, m.id DESC
                           ) AS rn
                    {VISIBLE_TO_REQUESTER}
                 )
                 SELECT r.id, r.sender_id, r.user_id, r.entity_id, r.sent_by_entity, r.content,
                        r.is_read, r.created_at, r.deleted_at,
                        e.owner_id, e.name, e.profile_url, u.name, u.profile_picture_url
                 FROM ranked r
                 LEFT JOIN entities e ON e.id = r.entity_id AND e.deleted_at IS NULL
                 LEFT JOIN users u ON u.id = r.user_id
                 WHERE r.rn = 1
                 ORDER BY r.created_at DESC, r.id DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params![
                requester.to_db(),
                i64::from(page.limit()),
                page.offset() as i64,
            ])?;

            let base = MESSAGE_COLUMN_COUNT;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(ConversationHead {
                    message: row_to_message(row)?,
                    owner_id: row_helpers::get_opt_id(row, base, "entities", "owner_id")?,
                    entity_name: row_helpers::get(row, base + 1, "entities", "name")?,
                    entity_profile_url: row_helpers::get(row, base + 2, "entities", "profile_url")?,
                    user_name: row_helpers::get(row, base + 3, "users", "name")?,
                    user_profile_picture_url: row_helpers::get(
                        row,
                        base + 4,
                        "users",
                        "profile_picture_url",
                    )?,
                });
            }

            debug!(total, returned = items.len(), "inbox assembled");
            Ok(Page {
                items,
                total: total as u64,
                request: page,
            })
        })
    }

    /// All non-deleted messages of one conversation, newest first.
    /// `total` is the full row count regardless of page size.
    #[instrument(skip(self), fields(entity_id = %entity_id, user_id = %user_id, page = page.page))]
    pub fn history(
        &self,
        entity_id: &EntityId,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE entity_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
                [entity_id.to_db(), user_id.to_db()],
                |row| row.get(0),
            )?;
            if total == 0 {
                return Ok(Page::empty(page));
            }

            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.entity_id = ?1 AND m.user_id = ?2 AND m.deleted_at IS NULL
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params![
                entity_id.to_db(),
                user_id.to_db(),
                i64::from(page.limit()),
                page.offset() as i64,
            ])?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(row_to_message(row)?);
            }

            Ok(Page {
                items,
                total: total as u64,
                request: page,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use empre_core::ids::MessageId;
    use empre_core::messages::NewMessage;

    use crate::entities::EntityRepo;
    use crate::messages::MessageRepo;
    use crate::users::UserRepo;

    struct Fixture {
        messages: MessageRepo,
        entities: EntityRepo,
        users: UserRepo,
        conversations: ConversationRepo,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        Fixture {
            messages: MessageRepo::new(db.clone()),
            entities: EntityRepo::new(db.clone()),
            users: UserRepo::new(db.clone()),
            conversations: ConversationRepo::new(db),
        }
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    impl Fixture {
        fn send(
            &self,
            sender: UserId,
            user: UserId,
            entity: EntityId,
            content: &str,
            minute: i64,
        ) -> Message {
            self.messages
                .create_at(
                    NewMessage {
                        sender_id: sender,
                        user_id: user,
                        entity_id: entity,
                        sent_by_entity: sender != user,
                        content: content.into(),
                    },
                    at(minute),
                )
                .unwrap()
        }
    }

    #[test]
    fn empty_inbox() {
        let f = fixture();
        let page = f
            .conversations
            .inbox(&UserId::new(), PageRequest::inbox(None, None))
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
        assert_eq!(page.request.page, 1);
        assert_eq!(page.request.page_size, 20);
    }

    #[test]
    fn one_head_per_pair_with_latest_message() {
        let f = fixture();
        let owner = f.users.create("Owner", "https://cdn/owner.png").unwrap().id;
        let ana = f.users.create("Ana", "https://cdn/ana.png").unwrap().id;
        let ben = f.users.create("Ben", "").unwrap().id;
        let shop = f.entities.create(&owner, "Shop", "https://cdn/shop.png").unwrap().id;

        f.send(ana, ana, shop, "a1", 0);
        f.send(owner, ana, shop, "a2", 5);
        let ana_head = f.send(ana, ana, shop, "a3", 9);
        f.send(ben, ben, shop, "b1", 3);
        let ben_head = f.send(owner, ben, shop, "b2", 7);

        let page = f.conversations.inbox(&owner, PageRequest::inbox(None, None)).unwrap();
        assert_eq!(page.total, 2);
        let ids: Vec<MessageId> = page.items.iter().map(|h| h.message.id).collect();
        assert_eq!(ids, vec![ana_head.id, ben_head.id]);

        let other = page.items[0].other_party(&owner);
        assert_eq!(other.kind, PartyKind::User);
        assert_eq!(other.name, "Ana");
        assert_eq!(other.avatar_url, "https://cdn/ana.png");
        assert_eq!(other.id, ana.to_string());
    }

    #[test]
    fn customer_sees_entity_as_other_party() {
        let f = fixture();
        let owner = UserId::new();
        let ana = f.users.create("Ana", "").unwrap().id;
        let shop = f.entities.create(&owner, "Shop", "https://cdn/shop.png").unwrap().id;
        let cafe = f.entities.create(&owner, "Cafe", "").unwrap().id;

        f.send(ana, ana, shop, "to shop", 1);
        f.send(ana, ana, cafe, "to cafe", 2);

        let page = f.conversations.inbox(&ana, PageRequest::inbox(None, None)).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].message.content, "to cafe");
        let other = page.items[1].other_party(&ana);
        assert_eq!(other.kind, PartyKind::Entity);
        assert_eq!(other.name, "Shop");
        assert_eq!(other.avatar_url, "https://cdn/shop.png");
    }

    #[test]
    fn deleted_messages_do_not_head_conversations() {
        let f = fixture();
        let owner = UserId::new();
        let ana = UserId::new();
        let shop = f.entities.create(&owner, "Shop", "").unwrap().id;

        let kept = f.send(ana, ana, shop, "kept", 1);
        let gone = f.send(ana, ana, shop, "gone", 2);
        f.messages.soft_delete(&gone.id, &ana).unwrap();

        let page = f.conversations.inbox(&ana, PageRequest::inbox(None, None)).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].message.id, kept.id);

        f.messages.soft_delete(&kept.id, &ana).unwrap();
        let page = f.conversations.inbox(&ana, PageRequest::inbox(None, None)).unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn equal_timestamps_break_ties_deterministically() {
        let f = fixture();
        let owner = UserId::new();
        let ana = UserId::new();
        let shop = f.entities.create(&owner, "Shop", "").unwrap().id;

        let first = f.send(ana, ana, shop, "same time 1", 4);
        let second = f.send(ana, ana, shop, "same time 2", 4);
        let expected = if first.id > second.id { first.id } else { second.id };

        for _ in 0..3 {
            let page = f.conversations.inbox(&ana, PageRequest::inbox(None, None)).unwrap();
            assert_eq!(page.items[0].message.id, expected);
        }
    }

    #[test]
    fn inbox_pagination_counts_pairs() {
        let f = fixture();
        let owner = UserId::new();
        let shop = f.entities.create(&owner, "Shop", "").unwrap().id;
        for i in 0..5 {
            let customer = UserId::new();
            f.send(customer, customer, shop, "first", i * 10);
            f.send(owner, customer, shop, "reply", i * 10 + 1);
        }

        let first = f.conversations.inbox(&owner, PageRequest::inbox(Some(1), Some(2))).unwrap();
        let third = f.conversations.inbox(&owner, PageRequest::inbox(Some(3), Some(2))).unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.items.len(), 2);
        assert_eq!(third.items.len(), 1);
        assert!(first.items[0].message.created_at > first.items[1].message.created_at);
    }

    #[test]
    fn ownership_transfer_moves_inbox_visibility() {
        let f = fixture();
        let first_owner = UserId::new();
        let second_owner = UserId::new();
        let ana = UserId::new();
        let shop = f.entities.create(&first_owner, "Shop", "").unwrap().id;

        f.send(ana, ana, shop, "before", 1);
        f.entities.transfer_ownership(&shop, &second_owner).unwrap();
        let latest = f.send(ana, ana, shop, "after", 2);

        let old = f.conversations.inbox(&first_owner, PageRequest::inbox(None, None)).unwrap();
        assert_eq!(old.total, 0);

        let new = f.conversations.inbox(&second_owner, PageRequest::inbox(None, None)).unwrap();
        assert_eq!(new.total, 1);
        assert_eq!(new.items[0].message.id, latest.id);
    }

    #[test]
    fn self_conversation_appears_once() {
        let f = fixture();
        let owner = UserId::new();
        let shop = f.entities.create(&owner, "Shop", "").unwrap().id;
        let only = f.send(owner, owner, shop, "note to self", 1);

        let page = f.conversations.inbox(&owner, PageRequest::inbox(None, None)).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].message.id, only.id);

        let history = f
            .conversations
            .history(&shop, &owner, PageRequest::history(None, None))
            .unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.items[0].id, only.id);
    }

    #[test]
    fn history_newest_first_with_true_total() {
        let f = fixture();
        let owner = UserId::new();
        let ana = UserId::new();
        let ben = UserId::new();
        let shop = f.entities.create(&owner, "Shop", "").unwrap().id;

        for i in 0..7 {
            let sender = if i % 2 == 0 { ana } else { owner };
            f.send(sender, ana, shop, &format!("m{i}"), i);
        }
        f.send(ben, ben, shop, "other pair", 3);
        let deleted = f.send(ana, ana, shop, "deleted", 20);
        f.messages.soft_delete(&deleted.id, &ana).unwrap();

        let page = f
            .conversations
            .history(&shop, &ana, PageRequest::history(Some(1), Some(3)))
            .unwrap();
        assert_eq!(page.total, 7);
        let contents: Vec<&str> = page.items.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m6", "m5", "m4"]);
    }

    #[test]
    fn history_pages_concatenate_to_full_listing() {
        let f = fixture();
        let owner = UserId::new();
        let ana = UserId::new();
        let shop = f.entities.create(&owner, "Shop", "").unwrap().id;
        for i in 0..11 {
            // Pairs of equal timestamps exercise the id tie-break.
            f.send(ana, ana, shop, &format!("m{i}"), i / 2);
        }

        let full = f
            .conversations
            .history(&shop, &ana, PageRequest::history(Some(1), Some(100)))
            .unwrap();
        assert_eq!(full.items.len(), 11);

        let mut paged = Vec::new();
        for page in 1..=4 {
            let chunk = f
                .conversations
                .history(&shop, &ana, PageRequest::history(Some(page), Some(3)))
                .unwrap();
            assert_eq!(chunk.total, 11);
            paged.extend(chunk.items.into_iter().map(|m| m.id));
        }

        let full_ids: Vec<MessageId> = full.items.iter().map(|m| m.id).collect();
        assert_eq!(paged, full_ids);
        let unique: HashSet<MessageId> = paged.iter().copied().collect();
        assert_eq!(unique.len(), 11);
    }

    #[test]
    fn history_of_unknown_pair_is_empty() {
        let f = fixture();
        let page = f
            .conversations
            .history(&EntityId::new(), &UserId::new(), PageRequest::history(None, None))
            .unwrap();
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
        assert_eq!(page.request.page_size, 50);
    }
}
