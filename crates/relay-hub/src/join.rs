//! The participant join transaction (§4.8), run under the Join Gate's
//! per-event lock so the uniqueness and lock checks are atomic. Grounded on
//! `services/join_queue.py`'s caller and `ws/game_handler.py`'s join
//! handling.

use chrono::Utc;
use relay_core::clock::SharedClock;
use relay_core::config::Config;
use relay_core::data::{EventStatus, JoinStatus, Participant};
use relay_core::errors::{ErrorKind, SessionError};
use relay_core::id::{EventId, ParticipantId, UserId};
use relay_core::protocol::QuizPhase;

use crate::repository::Repository;

/// The outcome of a successful join transaction.
pub struct JoinOutcome {
    pub participant: Participant,
    pub is_rejoining: bool,
}

/// Runs the full join transaction for one device against `event_id`. The
/// caller is expected to hold the event's Join Gate lock for the duration of
/// this call.
pub async fn join_event(
    repository: &dyn Repository,
    clock: &SharedClock,
    config: &Config,
    event_id: EventId,
    user_id: UserId,
    device_fingerprint: &str,
    display_name: &str,
    avatar: Option<String>,
    current_phase: QuizPhase,
) -> Result<JoinOutcome, SessionError> {
    let event = repository
        .get_event(event_id)
        .await?
        .ok_or_else(|| SessionError::new(ErrorKind::NotFound, "event not found"))?;

    let now = clock.now();
    if event.join_locked {
        let locked_at = event.join_locked_at.unwrap_or(now);
        if (now - locked_at).num_seconds() > config.join_lock_grace_s as i64 {
            return Err(SessionError::new(ErrorKind::Locked, "join is locked"));
        }
    }

    if let Some(other) = repository
        .find_active_event_for_device(device_fingerprint, Some(event_id))
        .await?
    {
        return Err(SessionError::new(
            ErrorKind::Conflict,
            format!("device already active in event \"{}\"", other.title),
        ));
    }

    if let Some(mut existing) = repository
        .get_participant_by_device(event_id, device_fingerprint)
        .await?
    {
        existing.user_id = user_id;
        existing.last_heartbeat = now;
        existing.session_token = relay_core::uuid::Uuid::new_v4().to_string();
        let updated = repository.update_participant(existing).await?;
        return Ok(JoinOutcome {
            participant: updated,
            is_rejoining: true,
        });
    }

    let unique_name = unique_display_name(repository, event_id, display_name).await?;
    let mid_quiz = matches!(
        current_phase,
        QuizPhase::ShowingQuestion | QuizPhase::RevealingAnswer | QuizPhase::ShowingLeaderboard
    );

    let participant = Participant {
        participant_id: ParticipantId::new(),
        user_id,
        event_id,
        device_fingerprint: device_fingerprint.to_string(),
        display_name: unique_name,
        avatar,
        session_token: relay_core::uuid::Uuid::new_v4().to_string(),
        is_late_joiner: mid_quiz,
        join_status: if mid_quiz {
            JoinStatus::WaitingForSegment
        } else {
            JoinStatus::Joined
        },
        total_score: 0,
        total_response_time_ms: 0,
        joined_at: now,
        last_heartbeat: now,
    };

    if event.status == EventStatus::Waiting {
        repository
            .set_event_status(event_id, EventStatus::Active, None)
            .await?;
    }

    let created = repository.create_participant(participant).await?;
    Ok(JoinOutcome {
        participant: created,
        is_rejoining: false,
    })
}

/// Appends " 2", " 3", … to `base` (trimmed) until it is unique within the
/// event, case-sensitively (U7).
async fn unique_display_name(
    repository: &dyn Repository,
    event_id: EventId,
    base: &str,
) -> Result<String, SessionError> {
    let trimmed = base.trim();
    let existing = repository.list_participants_by_event(event_id).await?;
    let taken: std::collections::HashSet<&str> =
        existing.iter().map(|p| p.display_name.as_str()).collect();

    if !taken.contains(trimmed) {
        return Ok(trimmed.to_string());
    }

    let mut suffix = 2;
    loop {
        let candidate = format!("{trimmed} {suffix}");
        if !taken.contains(candidate.as_str()) {
            return Ok(candidate);
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use relay_core::clock::ManualClock;
    use relay_core::data::{Event, EventMode};
    use relay_core::id::Id;
    use std::sync::Arc;

    fn make_event() -> Event {
        Event {
            event_id: Id::new(),
            host_id: Id::new(),
            title: "Demo".into(),
            join_code: "CODE09".into(),
            mode: EventMode::Normal,
            status: EventStatus::Waiting,
            previous_status: None,
            join_locked: false,
            join_locked_at: None,
            time_per_question: 30,
            num_fake_answers: 3,
        }
    }

    #[tokio::test]
    async fn three_devices_named_alex_receive_uniqued_names() {
        let repo = InMemoryRepository::new();
        let event = make_event();
        repo.save_event(event.clone()).await.unwrap();
        let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
        let config = Config::default();

        let a = join_event(&repo, &clock, &config, event.event_id, Id::new(), "device-a", "Alex", None, QuizPhase::NotStarted)
            .await
            .unwrap();
        let b = join_event(&repo, &clock, &config, event.event_id, Id::new(), "device-b", "Alex", None, QuizPhase::NotStarted)
            .await
            .unwrap();
        let c = join_event(&repo, &clock, &config, event.event_id, Id::new(), "device-c", "Alex", None, QuizPhase::NotStarted)
            .await
            .unwrap();

        assert_eq!(a.participant.display_name, "Alex");
        assert_eq!(b.participant.display_name, "Alex 2");
        assert_eq!(c.participant.display_name, "Alex 3");
    }

    #[tokio::test]
    async fn whitespace_is_trimmed_and_case_is_significant() {
        let repo = InMemoryRepository::new();
        let event = make_event();
        repo.save_event(event.clone()).await.unwrap();
        let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
        let config = Config::default();

        let sam = join_event(&repo, &clock, &config, event.event_id, Id::new(), "device-a", " Sam ", None, QuizPhase::NotStarted)
            .await
            .unwrap();
        assert_eq!(sam.participant.display_name, "Sam");

        let lower_alex =
            join_event(&repo, &clock, &config, event.event_id, Id::new(), "device-b", "alex", None, QuizPhase::NotStarted)
                .await
                .unwrap();
        let upper_alex =
            join_event(&repo, &clock, &config, event.event_id, Id::new(), "device-c", "Alex", None, QuizPhase::NotStarted)
                .await
                .unwrap();
        assert_eq!(lower_alex.participant.display_name, "alex");
        assert_eq!(upper_alex.participant.display_name, "Alex");
    }

    #[tokio::test]
    async fn rejoin_keeps_the_original_display_name() {
        let repo = InMemoryRepository::new();
        let event = make_event();
        repo.save_event(event.clone()).await.unwrap();
        let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
        let config = Config::default();

        let first = join_event(&repo, &clock, &config, event.event_id, Id::new(), "device-a", "Alex", None, QuizPhase::NotStarted)
            .await
            .unwrap();
        let second = join_event(&repo, &clock, &config, event.event_id, Id::new(), "device-a", "Alex", None, QuizPhase::NotStarted)
            .await
            .unwrap();

        assert_eq!(first.participant.display_name, second.participant.display_name);
        assert!(second.is_rejoining);
        assert_eq!(
            first.participant.participant_id,
            second.participant.participant_id
        );
    }

    #[tokio::test]
    async fn device_already_active_in_another_event_is_rejected() {
        let repo = InMemoryRepository::new();
        let event_a = make_event();
        let mut event_b = make_event();
        event_b.event_id = Id::new();
        event_b.join_code = "CODE10".into();
        repo.save_event(event_a.clone()).await.unwrap();
        repo.save_event(event_b.clone()).await.unwrap();
        let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
        let config = Config::default();

        join_event(&repo, &clock, &config, event_a.event_id, Id::new(), "device-a", "Alex", None, QuizPhase::NotStarted)
            .await
            .unwrap();

        let err = join_event(&repo, &clock, &config, event_b.event_id, Id::new(), "device-a", "Alex", None, QuizPhase::NotStarted)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn locked_event_rejects_join_past_grace() {
        let repo = InMemoryRepository::new();
        let mut event = make_event();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        event.join_locked = true;
        event.join_locked_at = Some(clock.now());
        repo.save_event(event.clone()).await.unwrap();
        let config = Config::default();

        clock.advance(chrono::Duration::seconds(6));
        let shared_clock: SharedClock = clock.clone();
        let err = join_event(&repo, &shared_clock, &config, event.event_id, Id::new(), "device-a", "Alex", None, QuizPhase::NotStarted)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Locked);
    }
}
