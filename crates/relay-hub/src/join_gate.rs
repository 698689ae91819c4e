//! Per-event serialization for concurrent join attempts, grounded on
//! `services/join_queue.py`'s `JoinQueue`. Where the original tracked a
//! list of in-flight `(device_id, timestamp)` pairs per event, this keeps
//! only the lock map — the queue-size/observability accessors that list
//! was used for were never exercised anywhere else in that source and have
//! no surface in this spec.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_core::errors::{ErrorKind, SessionError};
use relay_core::id::EventId;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

/// Guards admission into the per-event join critical section (§4.9).
#[derive(Debug, Default)]
pub struct JoinGate {
    locks: Mutex<HashMap<EventId, Arc<Mutex<()>>>>,
}

impl JoinGate {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, event_id: EventId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(event_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquires the event's join lock and holds it for the returned guard's
    /// lifetime, failing with `too_many_requests` if it can't be acquired
    /// within `acquire_timeout` (§5 "Join Gate acquisition: hard timeout").
    pub async fn acquire(
        &self,
        event_id: EventId,
        acquire_timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, SessionError> {
        let lock = self.lock_for(event_id).await;
        timeout(acquire_timeout, lock.lock_owned())
            .await
            .map_err(|_| SessionError::new(ErrorKind::TooManyRequests, "join gate busy"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::id::Id;

    #[tokio::test]
    async fn concurrent_joins_on_the_same_event_serialize() {
        let gate = Arc::new(JoinGate::new());
        let event_id: EventId = Id::new();

        let guard = gate.acquire(event_id, Duration::from_secs(1)).await.unwrap();

        let gate_clone = gate.clone();
        let blocked = tokio::spawn(async move {
            gate_clone
                .acquire(event_id, Duration::from_millis(50))
                .await
        });

        let result = blocked.await.unwrap();
        assert!(result.is_err());
        drop(guard);
    }

    #[tokio::test]
    async fn distinct_events_do_not_contend() {
        let gate = JoinGate::new();
        let a: EventId = Id::new();
        let b: EventId = Id::new();

        let _guard_a = gate.acquire(a, Duration::from_millis(50)).await.unwrap();
        let guard_b = gate.acquire(b, Duration::from_millis(50)).await;
        assert!(guard_b.is_ok());
    }
}
