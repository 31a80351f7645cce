//! Registry of live sessions and the routing rule.

use std::collections::HashMap;
use std::sync::Arc;

use empre_core::ids::UserId;
use empre_core::messages::Message;
use empre_core::OwnershipResolver;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::SlowConsumerPolicy;
use crate::session::{ClientSession, SendOutcome};

/// What happened to one delivery attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No open session for the recipient.
    Offline,
    /// Queue full, payload discarded.
    Dropped,
    /// Queue full, session evicted from the registry.
    Evicted,
}

/// Per-recipient results of one `route` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub deliveries: Vec<(UserId, Delivery)>,
}

impl RouteReport {
    pub fn recipients(&self) -> Vec<UserId> {
        self.deliveries.iter().map(|(user, _)| *user).collect()
    }

    pub fn delivered(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|(_, outcome)| *outcome == Delivery::Delivered)
            .count()
    }
}

/// Live sessions keyed by user, at most one per user.
///
/// `register` and `unregister` are the only mutators and take the write
/// lock. `deliver` and `route` take the read lock and never block on a
/// recipient.
pub struct Hub {
    sessions: RwLock<HashMap<UserId, Arc<ClientSession>>>,
    owners: Arc<dyn OwnershipResolver>,
    policy: SlowConsumerPolicy,
}

impl Hub {
    pub fn new(owners: Arc<dyn OwnershipResolver>, policy: SlowConsumerPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            owners,
            policy,
        }
    }

    /// Track `session` as its user's live connection. A previous session
    /// for the same user is closed and returned.
    pub fn register(&self, session: Arc<ClientSession>) -> Option<Arc<ClientSession>> {
        let previous = {
            let mut sessions = self.sessions.write();
            sessions.insert(session.user_id, Arc::clone(&session))
        };
        let previous = previous.filter(|old| !old.same_as(&session));
        if let Some(old) = &previous {
            let _ = old.close();
            info!(
                user_id = %session.user_id,
                conn_id = %session.id,
                superseded = %old.id,
                "session superseded"
            );
        } else {
            debug!(user_id = %session.user_id, conn_id = %session.id, "session registered");
        }
        previous
    }

    /// Drop the mapping if it still points at `session`, and close it
    /// either way. Returns whether the mapping was removed.
    pub fn unregister(&self, session: &Arc<ClientSession>) -> bool {
        let removed = {
            let mut sessions = self.sessions.write();
            match sessions.get(&session.user_id) {
                Some(current) if current.same_as(session) => {
                    let _ = sessions.remove(&session.user_id);
                    true
                }
                _ => false,
            }
        };
        let _ = session.close();
        debug!(
            user_id = %session.user_id,
            conn_id = %session.id,
            removed,
            dropped = session.drop_count(),
            "session unregistered"
        );
        removed
    }

    /// Best-effort handoff to the user's live session.
    pub fn deliver(&self, user_id: &UserId, payload: Arc<String>) -> Delivery {
        let slow = {
            let sessions = self.sessions.read();
            match sessions.get(user_id) {
                Some(session) if session.is_open() => match session.send(payload) {
                    SendOutcome::Sent => return Delivery::Delivered,
                    SendOutcome::Closed => return Delivery::Offline,
                    SendOutcome::Full => match self.policy {
                        SlowConsumerPolicy::Drop => {
                            warn!(
                                user_id = %user_id,
                                conn_id = %session.id,
                                dropped = session.drop_count(),
                                "outbound queue full, payload dropped"
                            );
                            return Delivery::Dropped;
                        }
                        SlowConsumerPolicy::Disconnect => Arc::clone(session),
                    },
                },
                _ => return Delivery::Offline,
            }
        };
        let _ = self.evict(&slow);
        Delivery::Evicted
    }

    /// Close a slow consumer and drop its registry entry if it is still
    /// the one registered. Runs after the read lock is released, so a
    /// session registered in between is left alone.
    fn evict(&self, session: &Arc<ClientSession>) -> bool {
        let removed = {
            let mut sessions = self.sessions.write();
            match sessions.get(&session.user_id) {
                Some(current) if current.same_as(session) => {
                    let _ = sessions.remove(&session.user_id);
                    true
                }
                _ => false,
            }
        };
        let _ = session.close();
        warn!(
            user_id = %session.user_id,
            conn_id = %session.id,
            dropped = session.drop_count(),
            removed,
            "outbound queue full, session evicted"
        );
        removed
    }

    /// Who should receive `message` live: the customer and the entity's
    /// current owner, minus the sender, without duplicates.
    pub fn recipients(&self, message: &Message) -> Vec<UserId> {
        let sender = message.sender_id;
        let customer = message.user_id;
        let mut recipients = Vec::with_capacity(2);
        if customer != sender {
            recipients.push(customer);
        }
        match self.owners.owner_of(&message.entity_id) {
            Ok(owner) if owner != sender && owner != customer => recipients.push(owner),
            Ok(_) => {}
            Err(e) => warn!(
                entity_id = %message.entity_id,
                message_id = %message.id,
                error = %e,
                "owner lookup failed, skipping owner delivery"
            ),
        }
        recipients
    }

    /// Route a message to its live recipients.
    pub fn route(&self, message: &Message) -> Result<RouteReport, serde_json::Error> {
        let payload = Arc::new(serde_json::to_string(message)?);
        Ok(self.route_payload(message, payload))
    }

    /// Route with a pre-serialized payload.
    pub fn route_payload(&self, message: &Message, payload: Arc<String>) -> RouteReport {
        let deliveries: Vec<_> = self
            .recipients(message)
            .into_iter()
            .map(|user| (user, self.deliver(&user, Arc::clone(&payload))))
            .collect();
        debug!(
            message_id = %message.id,
            entity_id = %message.entity_id,
            recipients = deliveries.len(),
            "message routed"
        );
        RouteReport { deliveries }
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.sessions
            .read()
            .get(user_id)
            .is_some_and(|session| session.is_open())
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Close and forget every session.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &drained {
            let _ = session.close();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "closed all sessions");
        }
    }
}
