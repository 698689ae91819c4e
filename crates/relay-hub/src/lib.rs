//! The hub binary's library half: Hub registry, Event Session actors,
//! Connection/Heartbeat, Join Gate, Repository trait + in-memory adapter,
//! Scoring, and the axum handlers that sit on top of them. Split out of
//! `main.rs` so the scenario tests under `tests/` can drive the hub without
//! going through a real socket.

pub mod connection;
pub mod handlers;
pub mod heartbeat;
pub mod hub;
pub mod join;
pub mod join_gate;
pub mod repository;
pub mod scoring;
pub mod session;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_core::clock::SharedClock;
use relay_core::config::Config;

use crate::hub::Hub;
use crate::repository::Repository;

/// Shared application state handed to every axum handler.
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub hub: Arc<Hub>,
    pub repository: Arc<dyn Repository>,
    pub clock: SharedClock,
    pub config: Config,
}

impl AppState {
    pub fn new(repository: Arc<dyn Repository>, clock: SharedClock, config: Config) -> Arc<Self> {
        let hub = Hub::new(repository.clone(), clock.clone(), config.clone());
        Arc::new(Self {
            started_at: Utc::now(),
            hub,
            repository,
            clock,
            config,
        })
    }
}
