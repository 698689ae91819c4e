//! Ping/pong liveness tracking, grounded on `ws/heartbeat.py`'s
//! `HeartbeatManager`. The send-side ping loop and pong bookkeeping live
//! here; the connection task owns the actual socket write.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_core::clock::SharedClock;
use relay_core::id::ParticipantId;
use tokio::sync::RwLock;

/// Tracks the last pong received from each connected participant and
/// decides whether a connection is still healthy.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    clock: SharedClock,
    grace_period: chrono::Duration,
    last_pong: RwLock<HashMap<ParticipantId, DateTime<Utc>>>,
}

impl HeartbeatMonitor {
    pub fn new(clock: SharedClock, grace_period: std::time::Duration) -> Self {
        Self {
            clock,
            grace_period: chrono::Duration::from_std(grace_period)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
            last_pong: RwLock::new(HashMap::new()),
        }
    }

    pub async fn track(&self, participant_id: ParticipantId) {
        self.last_pong
            .write()
            .await
            .insert(participant_id, self.clock.now());
    }

    pub async fn record_pong(&self, participant_id: ParticipantId) {
        self.last_pong
            .write()
            .await
            .insert(participant_id, self.clock.now());
    }

    pub async fn stop_tracking(&self, participant_id: ParticipantId) {
        self.last_pong.write().await.remove(&participant_id);
    }

    pub async fn is_healthy(&self, participant_id: ParticipantId) -> bool {
        match self.last_pong.read().await.get(&participant_id) {
            Some(last_pong) => self.clock.now() - *last_pong <= self.grace_period,
            None => false,
        }
    }

    /// Returns every tracked participant whose last pong is older than the
    /// grace period.
    pub async fn stale_participants(&self) -> Vec<ParticipantId> {
        let now = self.clock.now();
        self.last_pong
            .read()
            .await
            .iter()
            .filter(|(_, last_pong)| now - **last_pong > self.grace_period)
            .map(|(id, _)| *id)
            .collect()
    }
}

pub fn shared(monitor: HeartbeatMonitor) -> Arc<HeartbeatMonitor> {
    Arc::new(monitor)
}
