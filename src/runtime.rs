//! Service assembly shared by the binary and the integration tests

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::{MemoryStore, PostgresStore};
use crate::api::AppState;
use crate::config::{AppConfig, DatabaseConfig, SessionConfig};
use crate::coordinator::{EventPublisher, MoveCoordinator};
use crate::domain::{Board, Column};
use crate::error::Result;
use crate::session::SessionManager;
use crate::store::{BoardDirectory, PositionStore};

/// Storage backends behind the coordinator
pub struct Backends {
    pub store: Arc<dyn PositionStore>,
    pub boards: Arc<dyn BoardDirectory>,
}

impl Backends {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            store: store.clone(),
            boards: store,
        }
    }

    pub fn postgres(store: Arc<PostgresStore>) -> Self {
        Self {
            store: store.clone(),
            boards: store,
        }
    }

    /// PostgreSQL when a URL is configured, otherwise an in-memory store
    /// seeded with a demo board.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        match config.url.as_deref() {
            Some(url) => {
                let store = PostgresStore::new(url, config.max_connections).await?;
                store.migrate().await?;
                info!("Using PostgreSQL position store");
                Ok(Self::postgres(Arc::new(store)))
            }
            None => {
                warn!("No database URL configured, positions live in memory only");
                let store = MemoryStore::new().with_board(demo_board()).await;
                Ok(Self::memory(Arc::new(store)))
            }
        }
    }
}

fn demo_board() -> Board {
    Board::new(
        "demo",
        "Demo",
        vec![
            Column::new("todo", "demo", "To Do", 0),
            Column::new("doing", "demo", "In Progress", 1).with_wip_limit(3),
            Column::new("done", "demo", "Done", 2),
        ],
    )
}

/// The running service: coordinator, sessions and the publisher between them.
#[derive(Clone)]
pub struct Services {
    pub coordinator: Arc<MoveCoordinator>,
    pub sessions: Arc<SessionManager>,
    pub publisher: Arc<EventPublisher>,
}

impl Services {
    pub fn new(backends: Backends, config: &AppConfig) -> Self {
        let publisher = Arc::new(EventPublisher::new(Duration::from_millis(
            config.session.sequencer_gap_timeout_ms,
        )));
        let coordinator = Arc::new(MoveCoordinator::new(
            backends.store,
            backends.boards,
            publisher.clone(),
            &config.engine,
        ));
        let sessions = Arc::new(SessionManager::new(config.server.session_buffer));

        Self {
            coordinator,
            sessions,
            publisher,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.coordinator.clone(), self.sessions.clone())
    }

    /// Start the event relay and the stale-lock sweeper.
    pub fn spawn_background(&self, config: &SessionConfig) -> Vec<JoinHandle<()>> {
        let relay = tokio::spawn(self.sessions.clone().run_relay(self.publisher.subscribe()));

        let sessions = self.sessions.clone();
        let publisher = self.publisher.clone();
        let ttl = Duration::from_secs(config.drag_lock_ttl_secs);
        let period = Duration::from_secs(config.sweep_interval_secs.max(1));
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let released = sessions.sweep_stale_locks(ttl).await;
                let flushed = publisher.flush_expired();
                if released > 0 || flushed > 0 {
                    debug!(released, flushed, "sweeper tick");
                }
            }
        });

        vec![relay, sweeper]
    }
}
