//! Application state shared across routes

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::Config;
use crate::game::{GameSession, SessionHandle};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session: SessionHandle,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build the state and the session it fronts. The caller runs the session.
    pub fn new(config: Config) -> (Self, GameSession) {
        let config = Arc::new(config);
        let (session, handle) = GameSession::new(&config);

        let state = Self {
            config,
            session: handle,
            started_at: Utc::now(),
        };

        (state, session)
    }
}
