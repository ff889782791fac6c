use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::coordinator::MoveCoordinator;
use crate::session::SessionManager;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// Every position mutation goes through here
    pub coordinator: Arc<MoveCoordinator>,

    /// Live WebSocket sessions
    pub sessions: Arc<SessionManager>,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(coordinator: Arc<MoveCoordinator>, sessions: Arc<SessionManager>) -> Self {
        Self {
            coordinator,
            sessions,
            start_time: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
