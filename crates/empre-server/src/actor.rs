//! The hub event loop: one task that applies register, unregister and
//! inbound-frame events in arrival order.

use std::sync::Arc;

use empre_core::ids::{ConnectionId, UserId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hub::Hub;
use crate::ingest::{IngestError, Ingestor};
use crate::session::ClientSession;

/// Events processed by the hub loop.
#[derive(Debug)]
pub enum HubEvent {
    Register(Arc<ClientSession>),
    Unregister(Arc<ClientSession>),
    Inbound {
        sender: UserId,
        connection: ConnectionId,
        frame: String,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("hub loop is not running")]
pub struct HubClosed;

/// Cloneable sender side of the hub loop.
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    pub async fn register(&self, session: Arc<ClientSession>) -> Result<(), HubClosed> {
        self.tx
            .send(HubEvent::Register(session))
            .await
            .map_err(|_| HubClosed)
    }

    pub async fn unregister(&self, session: Arc<ClientSession>) -> Result<(), HubClosed> {
        self.tx
            .send(HubEvent::Unregister(session))
            .await
            .map_err(|_| HubClosed)
    }

    /// Queue a raw frame from `session` for ingestion.
    pub async fn submit(&self, session: &ClientSession, frame: String) -> Result<(), HubClosed> {
        self.tx
            .send(HubEvent::Inbound {
                sender: session.user_id,
                connection: session.id.clone(),
                frame,
            })
            .await
            .map_err(|_| HubClosed)
    }
}

/// Spawn the hub loop. It stops when `cancel` fires or every handle is
/// dropped, closing all sessions on the way out.
pub fn spawn_hub(
    ingestor: Ingestor,
    capacity: usize,
    cancel: CancellationToken,
) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run(ingestor, rx, cancel));
    (HubHandle { tx }, task)
}

async fn run(ingestor: Ingestor, mut rx: mpsc::Receiver<HubEvent>, cancel: CancellationToken) {
    let hub: Arc<Hub> = Arc::clone(ingestor.hub());
    info!("hub loop started");
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match event {
            HubEvent::Register(session) => {
                let _ = hub.register(session);
            }
            HubEvent::Unregister(session) => {
                let _ = hub.unregister(&session);
            }
            HubEvent::Inbound {
                sender,
                connection,
                frame,
            } => ingest(&ingestor, sender, connection, frame).await,
        }
    }
    hub.close_all();
    info!("hub loop stopped");
}

/// The ledger write is blocking, so it runs off the async workers. The
/// loop awaits it before taking the next event to keep arrival order.
async fn ingest(ingestor: &Ingestor, sender: UserId, connection: ConnectionId, frame: String) {
    let worker = ingestor.clone();
    let result = tokio::task::spawn_blocking(move || worker.ingest_frame(sender, &frame)).await;
    match result {
        Ok(Ok(outcome)) => debug!(
            conn_id = %connection,
            message_id = %outcome.message.id,
            persisted = outcome.persisted,
            "inbound frame handled"
        ),
        Ok(Err(IngestError::Malformed(e))) => {
            warn!(conn_id = %connection, user_id = %sender, error = %e, "dropping malformed frame");
        }
        Ok(Err(e)) => {
            warn!(conn_id = %connection, user_id = %sender, error = %e, "dropping inbound frame");
        }
        Err(e) => warn!(conn_id = %connection, error = %e, "ingest task failed"),
    }
}
