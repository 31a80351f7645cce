//! HTTP handlers for the chat API.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use empre_core::ids::{EntityId, MessageId, UserId};
use empre_core::messages::{InboundMessage, Message};
use empre_core::pagination::PageRequest;
use empre_store::{EntityRepo, StoreError};
use tracing::debug;

use crate::auth::AuthUser;
use crate::dto::{
    ConversationResponse, HealthResponse, HistoryQuery, MarkReadResponse, PageQuery, Paginated,
};
use crate::error::ApiError;
use crate::server::AppState;

/// Run a blocking store call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
}

/// Unwrap query parameters, reporting a rejection in the JSON error envelope.
fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(query)
}

fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid {what}: {raw}")))
}

/// The customer side of a conversation request: `?user_id=` or the caller.
fn conversation_user(query: &HistoryQuery, requester: UserId) -> Result<UserId, ApiError> {
    match query.user_id.as_deref().map(str::trim) {
        None | Some("") => Ok(requester),
        Some(raw) => parse_id(raw, "user_id"),
    }
}

/// Only the customer and the entity's current owner may read a conversation.
fn ensure_participant(
    entities: &EntityRepo,
    entity_id: &EntityId,
    user_id: &UserId,
    requester: &UserId,
) -> Result<(), ApiError> {
    if requester == user_id {
        return Ok(());
    }
    match entities.owner(entity_id) {
        Ok(owner) if owner == *requester => Ok(()),
        Ok(_) | Err(StoreError::NotFound(_)) => Err(ApiError::Forbidden(
            "not a participant in this conversation".into(),
        )),
        Err(e) => Err(e.into()),
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        connections: state.hub.connection_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// `GET /api/chat/conversations`
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Paginated<ConversationResponse>>, ApiError> {
    let query = query_params(query)?;
    let request = PageRequest::inbox(query.page, query.page_size);
    let conversations = state.conversations.clone();
    let page = blocking(move || Ok(conversations.inbox(&requester, request)?)).await?;
    debug!(requester = %requester, total = page.total, "inbox served");
    let page = page.map(|head| ConversationResponse::from_head(head, &requester));
    Ok(Json(page.into()))
}

/// `GET /api/chat/history/{entity_id}`
pub async fn message_history(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Path(entity_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Paginated<Message>>, ApiError> {
    let query = query_params(query)?;
    let entity_id: EntityId = parse_id(&entity_id, "entity_id")?;
    let user_id = conversation_user(&query, requester)?;
    let request = PageRequest::history(query.page, query.page_size);

    let page = blocking(move || {
        ensure_participant(&state.entities, &entity_id, &user_id, &requester)?;
        Ok(state.conversations.history(&entity_id, &user_id, request)?)
    })
    .await?;
    Ok(Json(page.into()))
}

/// `POST /api/chat/messages`
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(sender): AuthUser,
    body: Result<Json<InboundMessage>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let Json(inbound) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let ingestor = state.ingestor.clone();
    let message = blocking(move || Ok(ingestor.send(sender, inbound)?)).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// `POST /api/chat/history/{entity_id}/read`
pub async fn mark_read(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Path(entity_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let query = query_params(query)?;
    let entity_id: EntityId = parse_id(&entity_id, "entity_id")?;
    let user_id = conversation_user(&query, requester)?;

    let updated = blocking(move || {
        ensure_participant(&state.entities, &entity_id, &user_id, &requester)?;
        Ok(state.messages.mark_read(&entity_id, &user_id, &requester)?)
    })
    .await?;
    Ok(Json(MarkReadResponse { updated }))
}

/// `DELETE /api/chat/messages/{message_id}`
pub async fn delete_message(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Path(message_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let message_id: MessageId = parse_id(&message_id, "message_id")?;
    blocking(move || Ok(state.messages.soft_delete(&message_id, &requester)?)).await?;
    Ok(StatusCode::NO_CONTENT)
}
