//! Inbound message pipeline: parse, stamp the sender, persist, route.

use std::sync::Arc;

use empre_core::ids::UserId;
use empre_core::messages::{InboundMessage, Message};
use empre_core::{LedgerError, MessageLedger};
use tracing::{debug, instrument, warn};

use crate::hub::{Hub, RouteReport};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid message: {0}")]
    Invalid(String),

    #[error("persist failed: {0}")]
    Persist(LedgerError),

    #[error("encode failed: {0}")]
    Encode(String),
}

/// Result of a live-path ingest.
#[derive(Debug)]
pub struct IngestOutcome {
    pub message: Message,
    /// False when the ledger write failed and the message went out unpersisted.
    pub persisted: bool,
    pub route: RouteReport,
}

#[derive(Clone)]
pub struct Ingestor {
    ledger: Arc<dyn MessageLedger>,
    hub: Arc<Hub>,
}

impl Ingestor {
    pub fn new(ledger: Arc<dyn MessageLedger>, hub: Arc<Hub>) -> Self {
        Self { ledger, hub }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Live path for a socket frame. A ledger failure is logged and the
    /// message is still routed.
    #[instrument(skip(self, raw), fields(sender = %sender, bytes = raw.len()))]
    pub fn ingest_frame(&self, sender: UserId, raw: &str) -> Result<IngestOutcome, IngestError> {
        let new = InboundMessage::parse(raw)?
            .into_new(sender)
            .map_err(invalid)?;

        let (message, persisted) = match self.ledger.append(new.clone()) {
            Ok(message) => (message, true),
            Err(e) => {
                warn!(
                    entity_id = %new.entity_id,
                    user_id = %new.user_id,
                    error = %e,
                    "persist failed, routing unpersisted message"
                );
                (new.into_unpersisted(), false)
            }
        };

        let route = self.route(&message)?;
        debug!(message_id = %message.id, persisted, delivered = route.delivered(), "frame ingested");
        Ok(IngestOutcome {
            message,
            persisted,
            route,
        })
    }

    /// API path. A ledger failure is returned and nothing is routed. Once
    /// the message is persisted it is returned even if routing fails.
    #[instrument(skip(self, inbound), fields(sender = %sender, entity_id = %inbound.entity_id))]
    pub fn send(&self, sender: UserId, inbound: InboundMessage) -> Result<Message, IngestError> {
        let new = inbound.into_new(sender).map_err(invalid)?;
        let message = self.ledger.append(new).map_err(IngestError::Persist)?;
        let route = self.hub.route(&message);
        Ok(sent(message, route))
    }

    fn route(&self, message: &Message) -> Result<RouteReport, IngestError> {
        self.hub
            .route(message)
            .map_err(|e| IngestError::Encode(e.to_string()))
    }
}

fn sent(message: Message, route: Result<RouteReport, serde_json::Error>) -> Message {
    match route {
        Ok(route) => {
            debug!(message_id = %message.id, delivered = route.delivered(), "message sent");
        }
        Err(e) => {
            warn!(message_id = %message.id, error = %e, "message persisted but not routed");
        }
    }
    message
}

fn invalid(err: LedgerError) -> IngestError {
    match err {
        LedgerError::Invalid(reason) => IngestError::Invalid(reason),
        other => IngestError::Persist(other),
    }
}
