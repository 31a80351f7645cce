//! Request and response bodies for the chat API.

use chrono::{DateTime, Utc};
use empre_core::ids::{MessageId, UserId};
use empre_core::pagination::{Page, PageMeta};
use empre_store::{ConversationHead, OtherParty};
use serde::{Deserialize, Serialize};

/// Longest inbox preview, in characters.
pub const SNIPPET_CHARS: usize = 140;

/// `{data, meta}` envelope for paginated listings.
#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

impl<T> From<Page<T>> for Paginated<T> {
    fn from(page: Page<T>) -> Self {
        let meta = page.meta();
        Self {
            data: page.items,
            meta,
        }
    }
}

/// One inbox row.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    /// Id of the head message.
    pub id: MessageId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub sent_by_entity: bool,
    pub other_party: OtherParty,
}

impl ConversationResponse {
    pub fn from_head(head: ConversationHead, requester: &UserId) -> Self {
        let other_party = head.other_party(requester);
        let message = head.message;
        Self {
            id: message.id,
            content: snippet(&message.content),
            created_at: message.created_at,
            is_read: message.is_read,
            sent_by_entity: message.sent_by_entity,
            other_party,
        }
    }
}

/// First `SNIPPET_CHARS` characters of `content`.
pub fn snippet(content: &str) -> String {
    match content.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => content[..cut].to_string(),
        None => content.to_string(),
    }
}

/// `?page=&page_size=` on listing endpoints. `pageSize` is accepted too.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    #[serde(alias = "pageSize")]
    pub page_size: Option<u32>,
}

/// Query for one conversation: the customer side defaults to the caller.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub user_id: Option<String>,
    pub page: Option<u32>,
    #[serde(alias = "pageSize")]
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use empre_core::ids::EntityId;
    use empre_core::messages::NewMessage;
    use empre_core::pagination::PageRequest;
    use empre_store::PartyKind;

    fn head(owner: UserId, customer: UserId, content: &str) -> ConversationHead {
        ConversationHead {
            message: NewMessage {
                sender_id: customer,
                user_id: customer,
                entity_id: EntityId::new(),
                sent_by_entity: false,
                content: content.into(),
            }
            .into_unpersisted(),
            owner_id: Some(owner),
            entity_name: Some("Cafe Luna".into()),
            entity_profile_url: Some("https://cdn/luna.png".into()),
            user_name: Some("Ana".into()),
            user_profile_picture_url: None,
        }
    }

    #[test]
    fn snippet_keeps_short_content() {
        assert_eq!(snippet("hola"), "hola");
        assert_eq!(snippet(""), "");
    }

    #[test]
    fn snippet_cuts_on_char_boundary() {
        let long = "ñ".repeat(SNIPPET_CHARS + 10);
        let cut = snippet(&long);
        assert_eq!(cut.chars().count(), SNIPPET_CHARS);
        let exact = "a".repeat(SNIPPET_CHARS);
        assert_eq!(snippet(&exact), exact);
    }

    #[test]
    fn owner_sees_customer_as_other_party() {
        let (owner, customer) = (UserId::new(), UserId::new());
        let response = ConversationResponse::from_head(head(owner, customer, "hi"), &owner);
        assert_eq!(response.other_party.kind, PartyKind::User);
        assert_eq!(response.other_party.name, "Ana");
        assert_eq!(response.other_party.avatar_url, "");
    }

    #[test]
    fn customer_sees_entity_as_other_party() {
        let (owner, customer) = (UserId::new(), UserId::new());
        let response = ConversationResponse::from_head(head(owner, customer, "hi"), &customer);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["other_party"]["kind"], "entity");
        assert_eq!(json["other_party"]["name"], "Cafe Luna");
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn empty_page_envelope() {
        let page: Page<ConversationResponse> = Page::empty(PageRequest::inbox(None, None));
        let json = serde_json::to_value(Paginated::from(page)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"data": [], "meta": {"total": 0, "page": 1, "page_size": 20}})
        );
    }

    #[test]
    fn page_query_accepts_camel_case_alias() {
        let query: PageQuery = serde_json::from_str(r#"{"page":2,"pageSize":5}"#).unwrap();
        assert_eq!(query.page, Some(2));
        assert_eq!(query.page_size, Some(5));
    }
}
