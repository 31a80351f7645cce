use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{delete, get, post};
use axum::Router;
use empre_store::{ConversationRepo, Database, EntityRepo, MessageRepo};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::actor::{spawn_hub, HubHandle};
use crate::config::ServerConfig;
use crate::handlers;
use crate::hub::Hub;
use crate::ingest::Ingestor;
use crate::ws;

/// How long `shutdown` waits for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub hub: Arc<Hub>,
    pub hub_handle: HubHandle,
    pub ingestor: Ingestor,
    pub conversations: Arc<ConversationRepo>,
    pub messages: MessageRepo,
    pub entities: EntityRepo,
    pub started_at: Instant,
    pub shutdown: CancellationToken,
}

/// Hub, actor loop and repositories over one database.
pub struct Services {
    pub state: AppState,
    pub hub_task: JoinHandle<()>,
}

impl Services {
    pub fn new(config: ServerConfig, db: Database, shutdown: CancellationToken) -> Self {
        let config = Arc::new(config);
        let entities = EntityRepo::new(db.clone());
        let messages = MessageRepo::new(db.clone());
        let hub = Arc::new(Hub::new(Arc::new(entities.clone()), config.slow_consumer));
        let ingestor = Ingestor::new(Arc::new(messages.clone()), Arc::clone(&hub));
        let (hub_handle, hub_task) = spawn_hub(ingestor.clone(), config.hub_queue, shutdown.clone());

        Self {
            state: AppState {
                config,
                hub,
                hub_handle,
                ingestor,
                conversations: Arc::new(ConversationRepo::new(db)),
                messages,
                entities,
                started_at: Instant::now(),
                shutdown,
            },
            hub_task,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let chat = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/conversations", get(handlers::list_conversations))
        .route("/history/{entity_id}", get(handlers::message_history))
        .route("/history/{entity_id}/read", post(handlers::mark_read))
        .route("/messages", post(handlers::send_message))
        .route("/messages/{message_id}", delete(handlers::delete_message));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/chat", chat)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. Cancelling `shutdown` (or calling
/// [`ServerHandle::shutdown`]) stops the listener and the hub loop.
pub async fn start(
    config: ServerConfig,
    db: Database,
    shutdown: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;

    let services = Services::new(config, db, shutdown.clone());
    let hub = Arc::clone(&services.state.hub);
    let router = build_router(services.state);

    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "http server stopped with error");
        }
    });

    info!(addr = %local_addr, "chat server started");

    Ok(ServerHandle {
        port: local_addr.port(),
        hub,
        shutdown,
        server,
        hub_task: services.hub_task,
    })
}

/// Handle returned by `start()`. Keeps the background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    pub hub: Arc<Hub>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    hub_task: JoinHandle<()>,
}

impl ServerHandle {
    /// Cancel everything and wait for the tasks to drain.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let drain = futures::future::join_all([self.server, self.hub_task]);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            warn!("shutdown timed out after {SHUTDOWN_TIMEOUT:?}");
        } else {
            info!("chat server stopped");
        }
    }
}
