//! The process-wide registry of live Event Sessions, grounded on
//! `ws/hub.py`'s `Hub`. Owns the connection table, lazily creates sessions on
//! first touch, and fans broadcasts out to every connected participant after
//! releasing the session's state lock (§4.1, §5).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_core::clock::SharedClock;
use relay_core::config::Config;
use relay_core::data::EventStatus;
use relay_core::errors::{ErrorKind, SessionError};
use relay_core::id::{EventId, ParticipantId, UserId};
use relay_core::protocol::{ClientMessage, ServerMessage};
use tracing::{debug, info};

use crate::connection::OutboundHandle;
use crate::heartbeat::HeartbeatMonitor;
use crate::join_gate::JoinGate;
use crate::repository::Repository;
use crate::session::{Broadcast, EventSession};

/// Registry of live sessions plus the connections attached to them.
pub struct Hub {
    repository: Arc<dyn Repository>,
    clock: SharedClock,
    config: Config,
    sessions: DashMap<EventId, Arc<EventSession>>,
    connections: DashMap<ParticipantId, OutboundHandle>,
    last_activity: DashMap<EventId, DateTime<Utc>>,
    pub heartbeat: Arc<HeartbeatMonitor>,
    pub join_gate: Arc<JoinGate>,
}

impl Hub {
    pub fn new(repository: Arc<dyn Repository>, clock: SharedClock, config: Config) -> Arc<Self> {
        let heartbeat = Arc::new(HeartbeatMonitor::new(clock.clone(), config.grace_period()));
        Arc::new(Self {
            repository,
            clock,
            config,
            sessions: DashMap::new(),
            connections: DashMap::new(),
            last_activity: DashMap::new(),
            heartbeat,
            join_gate: Arc::new(JoinGate::new()),
        })
    }

    /// Returns the session for `event_id`, creating it on first touch.
    pub fn get_or_create(&self, event_id: EventId) -> Arc<EventSession> {
        self.touch(event_id);
        self.sessions
            .entry(event_id)
            .or_insert_with(|| {
                Arc::new(EventSession::new(
                    event_id,
                    self.repository.clone(),
                    self.clock.clone(),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, event_id: EventId) -> Option<Arc<EventSession>> {
        self.sessions.get(&event_id).map(|entry| entry.clone())
    }

    fn touch(&self, event_id: EventId) {
        self.last_activity.insert(event_id, self.clock.now());
    }

    /// Registers a connection's outbound handle so broadcasts can reach it.
    pub fn register_connection(&self, handle: OutboundHandle) {
        self.connections.insert(handle.participant_id(), handle);
    }

    pub fn unregister_connection(&self, participant_id: ParticipantId) {
        self.connections.remove(&participant_id);
    }

    pub fn send_to(&self, participant_id: ParticipantId, message: ServerMessage) -> bool {
        match self.connections.get(&participant_id) {
            Some(handle) => handle.try_send(message),
            None => false,
        }
    }

    /// Sends `message` to every participant `event_id`'s session currently
    /// knows about. The participant list is snapshotted while holding the
    /// session's state lock; the sends themselves happen after it's
    /// released, so a slow or closed connection never stalls the others.
    pub async fn broadcast(&self, event_id: EventId, message: ServerMessage) {
        let Some(session) = self.get(event_id) else {
            return;
        };
        let participant_ids = session.participant_ids().await;
        for participant_id in participant_ids {
            if !self.send_to(participant_id, message.clone()) {
                debug!(%participant_id, "dropped broadcast to unreachable connection");
            }
        }
    }

    /// Delivers every frame a session operation produced, dispatching
    /// `ToAll` as a broadcast and `ToOne` directly to its target.
    pub async fn deliver(&self, event_id: EventId, broadcasts: Vec<Broadcast>) {
        self.touch(event_id);
        for item in broadcasts {
            match item {
                Broadcast::ToAll(message) => self.broadcast(event_id, message).await,
                Broadcast::ToOne(participant_id, message) => {
                    self.send_to(participant_id, message);
                }
            }
        }
    }

    /// Resolves the authenticated user behind a connected participant,
    /// rejecting callers the session doesn't recognize.
    async fn caller_user_id(
        &self,
        session: &EventSession,
        caller_participant_id: ParticipantId,
    ) -> Result<UserId, SessionError> {
        session
            .participant_user_id(caller_participant_id)
            .await
            .ok_or_else(|| SessionError::new(ErrorKind::Unauthorized, "unknown participant"))
    }

    /// Authorizes a host-only operation (`admin_select_presenter`,
    /// `start_mega_quiz`, `skip_mega_quiz`) against the event's recorded
    /// host (§4.5).
    async fn authorize_host(
        &self,
        event_id: EventId,
        session: &EventSession,
        caller_participant_id: ParticipantId,
    ) -> Result<(), SessionError> {
        let event = self
            .repository
            .get_event(event_id)
            .await?
            .ok_or_else(|| SessionError::new(ErrorKind::NotFound, "event not found"))?;
        let caller_user_id = self.caller_user_id(session, caller_participant_id).await?;
        if event.host_id != caller_user_id {
            return Err(SessionError::new(ErrorKind::Unauthorized, "host-only operation"));
        }
        Ok(())
    }

    /// Authorizes a control operation (`start_game`, `next_question`,
    /// `reveal_answer`, `show_leaderboard`, `end_game`, `pass_presenter`):
    /// the host or the segment's current presenter (§4.5).
    async fn authorize_control(
        &self,
        event_id: EventId,
        session: &EventSession,
        caller_participant_id: ParticipantId,
    ) -> Result<(), SessionError> {
        if self
            .authorize_host(event_id, session, caller_participant_id)
            .await
            .is_ok()
        {
            return Ok(());
        }
        if session.current_presenter_participant_id().await == Some(caller_participant_id) {
            return Ok(());
        }
        Err(SessionError::new(
            ErrorKind::Unauthorized,
            "requires the event host or the current presenter",
        ))
    }

    /// Authorizes `select_presenter`: the caller claiming the seat for
    /// themselves, or the host claiming it on someone's behalf.
    async fn authorize_self_or_host(
        &self,
        event_id: EventId,
        session: &EventSession,
        caller_participant_id: ParticipantId,
        target_user_id: UserId,
    ) -> Result<(), SessionError> {
        let caller_user_id = self.caller_user_id(session, caller_participant_id).await?;
        if caller_user_id == target_user_id {
            return Ok(());
        }
        self.authorize_host(event_id, session, caller_participant_id).await
    }

    /// Marks a participant online in its session, resuming a paused segment
    /// when that arrival is a resume trigger, and delivers the result.
    pub async fn mark_participant_online(&self, event_id: EventId, participant_id: ParticipantId) {
        let Some(session) = self.get(event_id) else {
            return;
        };
        let broadcasts = session.mark_online(participant_id).await;
        self.deliver(event_id, broadcasts).await;
    }

    /// Marks a participant offline in its session and delivers any pause
    /// the disconnect triggers.
    pub async fn mark_participant_offline(&self, event_id: EventId, participant_id: ParticipantId) {
        let Some(session) = self.get(event_id) else {
            return;
        };
        let broadcasts = session.mark_offline(participant_id).await;
        self.deliver(event_id, broadcasts).await;
    }

    /// Routes one client message to the event's session after checking
    /// authorization (§4.5), delivering whatever broadcasts the operation
    /// produces. `ClientMessage::Join` and `ClientMessage::Pong` are
    /// handled by the connection layer before a message ever reaches here —
    /// join needs the Join Gate and participant creation, and pong only
    /// updates the heartbeat monitor, neither of which touches game state.
    pub async fn dispatch(
        &self,
        event_id: EventId,
        caller_participant_id: ParticipantId,
        message: ClientMessage,
    ) -> Result<(), SessionError> {
        let session = self.get_or_create(event_id);

        let broadcasts = match message {
            ClientMessage::Join { .. } | ClientMessage::Pong => {
                return Err(SessionError::new(
                    ErrorKind::InvalidMessage,
                    "join and pong are handled by the connection layer",
                ));
            }
            ClientMessage::Answer {
                question_id,
                selected_answer,
                ..
            } => {
                session
                    .answer(caller_participant_id, question_id, selected_answer)
                    .await?
            }
            ClientMessage::StartGame => {
                self.authorize_control(event_id, &session, caller_participant_id).await?;
                session.start_game().await?
            }
            ClientMessage::NextQuestion => {
                self.authorize_control(event_id, &session, caller_participant_id).await?;
                session.next_question().await?
            }
            ClientMessage::RevealAnswer => {
                self.authorize_control(event_id, &session, caller_participant_id).await?;
                session.reveal_answer().await?
            }
            ClientMessage::ShowLeaderboard => {
                self.authorize_control(event_id, &session, caller_participant_id).await?;
                session.show_leaderboard().await?
            }
            ClientMessage::EndGame => {
                self.authorize_control(event_id, &session, caller_participant_id).await?;
                session.end_game().await?
            }
            ClientMessage::PassPresenter {
                next_presenter_user_id,
            } => {
                self.authorize_control(event_id, &session, caller_participant_id).await?;
                let caller_user_id = self.caller_user_id(&session, caller_participant_id).await?;
                session
                    .pass_presenter(caller_user_id, next_presenter_user_id)
                    .await?
            }
            ClientMessage::AdminSelectPresenter {
                presenter_user_id,
                segment_id,
            } => {
                self.authorize_host(event_id, &session, caller_participant_id).await?;
                session
                    .admin_select_presenter(segment_id, presenter_user_id)
                    .await?
            }
            ClientMessage::StartMegaQuiz { question_count } => {
                self.authorize_host(event_id, &session, caller_participant_id).await?;
                session.start_mega_quiz(question_count).await?
            }
            ClientMessage::SkipMegaQuiz => {
                self.authorize_host(event_id, &session, caller_participant_id).await?;
                session.skip_mega_quiz().await?
            }
            ClientMessage::SelectPresenter { presenter_user_id } => {
                self.authorize_self_or_host(event_id, &session, caller_participant_id, presenter_user_id)
                    .await?;
                session.select_presenter(presenter_user_id).await?
            }
            ClientMessage::StartPresentation { title } => {
                self.authorize_control(event_id, &session, caller_participant_id).await?;
                session.start_presentation(title).await?
            }
            ClientMessage::ResumeSegment { segment_id } => {
                self.authorize_control(event_id, &session, caller_participant_id).await?;
                session.resume_segment(segment_id).await?
            }
        };

        self.deliver(event_id, broadcasts).await;
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Evicts sessions for events that finished more than
    /// `event_complete_eviction_s` ago, dropping their in-memory game state
    /// and connection table entries. Run periodically by
    /// [`spawn_idle_sweep`].
    pub async fn sweep_idle_sessions(&self) {
        let now = self.clock.now();
        let eviction_after = self.config.event_complete_eviction();
        let stale: Vec<EventId> = self
            .last_activity
            .iter()
            .filter(|entry| {
                now.signed_duration_since(*entry.value())
                    .to_std()
                    .map(|idle| idle >= eviction_after)
                    .unwrap_or(false)
            })
            .map(|entry| *entry.key())
            .collect();

        for event_id in stale {
            let is_finished = match self.repository.get_event(event_id).await {
                Ok(Some(event)) => event.status == EventStatus::Finished,
                _ => false,
            };
            if !is_finished {
                continue;
            }
            if let Some((_, session)) = self.sessions.remove(&event_id) {
                for participant_id in session.participant_ids().await {
                    self.connections.remove(&participant_id);
                }
            }
            self.last_activity.remove(&event_id);
            info!(%event_id, "evicted idle completed session");
        }
    }
}

/// Spawns the background task that periodically calls
/// [`Hub::sweep_idle_sessions`] until `shutdown` fires.
pub fn spawn_idle_sweep(
    hub: Arc<Hub>,
    shutdown: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let interval = hub.config.idle_sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => hub.sweep_idle_sessions().await,
                _ = shutdown.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::new_outbound;
    use crate::repository::InMemoryRepository;
    use relay_core::clock::ManualClock;
    use relay_core::data::{Event, EventMode};
    use relay_core::id::Id;

    fn make_hub() -> (Arc<Hub>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let repo: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let hub = Hub::new(repo, clock.clone(), Config::default());
        (hub, clock)
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_session_on_repeated_calls() {
        let (hub, _clock) = make_hub();
        let event_id: EventId = Id::new();
        let first = hub.get_or_create(event_id);
        let second = hub.get_or_create(event_id);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_connection() {
        let (hub, _clock) = make_hub();
        let event_id: EventId = Id::new();
        let session = hub.get_or_create(event_id);

        let participant_id = session.join(Id::new(), Id::new(), "Alex".into(), None, false).await;
        let participant_id = match &participant_id[0] {
            Broadcast::ToOne(id, _) => *id,
            _ => panic!("expected ToOne"),
        };

        let (handle, mut rx) = new_outbound(participant_id, 8);
        hub.register_connection(handle);

        hub.broadcast(event_id, ServerMessage::Pong).await;
        assert!(matches!(rx.recv().await, Some(ServerMessage::Pong)));
    }

    #[tokio::test]
    async fn sweep_evicts_only_finished_events_past_the_grace_window() {
        let (hub, clock) = make_hub();
        let event_id: EventId = Id::new();
        hub.get_or_create(event_id);

        let repo = InMemoryRepository::new();
        repo.save_event(Event {
            event_id,
            host_id: Id::new(),
            title: "Demo".into(),
            join_code: "CODE02".into(),
            mode: EventMode::Normal,
            status: EventStatus::Finished,
            previous_status: None,
            join_locked: false,
            join_locked_at: None,
            time_per_question: 30,
            num_fake_answers: 3,
        })
        .await
        .unwrap();

        let hub = Hub::new(Arc::new(repo), clock.clone(), Config::default());
        hub.get_or_create(event_id);
        clock.advance(chrono::Duration::seconds(301));
        hub.sweep_idle_sessions().await;
        assert_eq!(hub.session_count(), 0);
    }
}
