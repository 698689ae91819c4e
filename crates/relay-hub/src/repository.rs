//! The narrow persistence interface the hub consumes.
//!
//! `Repository` is the trait boundary (§6.2): every call the hub makes to
//! the durable store, grounded on `relay-core::data` row shapes.
//! `InMemoryRepository` is the only adapter shipped here — a real backend
//! (Postgres, say) is out of scope here but it implements every operation
//! so the hub and its tests never need a second implementation to
//! exercise the full contract.

use std::collections::HashMap;

use async_trait::async_trait;
use relay_core::data::{
    Event, EventStatus, JoinStatus, LeaderboardEntry, Participant, Question, Segment,
    SegmentScore, SegmentStatus,
};
use relay_core::errors::RepositoryError;
use relay_core::id::{EventId, ParticipantId, SegmentId};
use tokio::sync::RwLock;

#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_event(&self, id: EventId) -> Result<Option<Event>, RepositoryError>;
    async fn get_event_by_code(&self, code: &str) -> Result<Option<Event>, RepositoryError>;
    async fn save_event(&self, event: Event) -> Result<Event, RepositoryError>;
    async fn set_event_status(
        &self,
        id: EventId,
        status: EventStatus,
        previous_status: Option<EventStatus>,
    ) -> Result<(), RepositoryError>;

    async fn get_segment(&self, id: SegmentId) -> Result<Option<Segment>, RepositoryError>;
    async fn get_segments_by_event(
        &self,
        event_id: EventId,
    ) -> Result<Vec<Segment>, RepositoryError>;
    async fn save_segment(&self, segment: Segment) -> Result<Segment, RepositoryError>;
    async fn set_segment_status(
        &self,
        id: SegmentId,
        status: SegmentStatus,
    ) -> Result<(), RepositoryError>;

    async fn get_questions_by_segment(
        &self,
        segment_id: SegmentId,
    ) -> Result<Vec<Question>, RepositoryError>;
    async fn save_questions(&self, questions: Vec<Question>) -> Result<(), RepositoryError>;

    async fn get_participant_by_device(
        &self,
        event_id: EventId,
        device_fingerprint: &str,
    ) -> Result<Option<Participant>, RepositoryError>;
    async fn get_participant(
        &self,
        id: ParticipantId,
    ) -> Result<Option<Participant>, RepositoryError>;
    async fn create_participant(
        &self,
        participant: Participant,
    ) -> Result<Participant, RepositoryError>;
    async fn update_participant(
        &self,
        participant: Participant,
    ) -> Result<Participant, RepositoryError>;
    async fn list_participants_by_event(
        &self,
        event_id: EventId,
    ) -> Result<Vec<Participant>, RepositoryError>;

    async fn find_active_event_for_device(
        &self,
        device_fingerprint: &str,
        exclude_event_id: Option<EventId>,
    ) -> Result<Option<Event>, RepositoryError>;

    /// Applies a scoring delta to one participant's segment score and their
    /// event-wide total in the same unit of work.
    async fn upsert_segment_score(
        &self,
        segment_id: SegmentId,
        participant_id: ParticipantId,
        delta_score: i64,
        is_correct: bool,
        response_time_ms: i64,
    ) -> Result<SegmentScore, RepositoryError>;

    async fn get_segment_leaderboard(
        &self,
        segment_id: SegmentId,
    ) -> Result<Vec<LeaderboardEntry>, RepositoryError>;
    async fn get_event_leaderboard(
        &self,
        event_id: EventId,
    ) -> Result<Vec<LeaderboardEntry>, RepositoryError>;

    async fn count_event_questions(&self, event_id: EventId) -> Result<u32, RepositoryError>;
    async fn aggregate_event_questions(
        &self,
        event_id: EventId,
        max_questions: Option<u32>,
    ) -> Result<Vec<Question>, RepositoryError>;
}

#[derive(Debug, Default)]
struct Tables {
    events: HashMap<EventId, Event>,
    segments: HashMap<SegmentId, Segment>,
    questions: HashMap<SegmentId, Vec<Question>>,
    participants: HashMap<ParticipantId, Participant>,
    segment_scores: HashMap<(SegmentId, ParticipantId), SegmentScore>,
}

/// An in-memory stand-in for the relational store described in spec §6.3.
/// Every table is keyed exactly as the schema's primary/foreign keys would
/// be, so swapping in a real SQL adapter later changes nothing above this
/// trait boundary.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_event(&self, id: EventId) -> Result<Option<Event>, RepositoryError> {
        Ok(self.tables.read().await.events.get(&id).cloned())
    }

    async fn get_event_by_code(&self, code: &str) -> Result<Option<Event>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .events
            .values()
            .find(|event| event.join_code == code)
            .cloned())
    }

    async fn save_event(&self, event: Event) -> Result<Event, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.events.insert(event.event_id, event.clone());
        Ok(event)
    }

    async fn set_event_status(
        &self,
        id: EventId,
        status: EventStatus,
        previous_status: Option<EventStatus>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let event = tables.events.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        event.previous_status = previous_status.or(Some(event.status));
        event.status = status;
        Ok(())
    }

    async fn get_segment(&self, id: SegmentId) -> Result<Option<Segment>, RepositoryError> {
        Ok(self.tables.read().await.segments.get(&id).cloned())
    }

    async fn get_segments_by_event(
        &self,
        event_id: EventId,
    ) -> Result<Vec<Segment>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut segments: Vec<Segment> = tables
            .segments
            .values()
            .filter(|segment| segment.event_id == event_id)
            .cloned()
            .collect();
        segments.sort_by_key(|segment| segment.order_index);
        Ok(segments)
    }

    async fn save_segment(&self, segment: Segment) -> Result<Segment, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.segments.insert(segment.segment_id, segment.clone());
        Ok(segment)
    }

    async fn set_segment_status(
        &self,
        id: SegmentId,
        status: SegmentStatus,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let segment = tables
            .segments
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        segment.previous_status = Some(segment.status);
        segment.status = status;
        Ok(())
    }

    async fn get_questions_by_segment(
        &self,
        segment_id: SegmentId,
    ) -> Result<Vec<Question>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .questions
            .get(&segment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_questions(&self, questions: Vec<Question>) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        for question in questions {
            tables
                .questions
                .entry(question.segment_id)
                .or_default()
                .push(question);
        }
        Ok(())
    }

    async fn get_participant_by_device(
        &self,
        event_id: EventId,
        device_fingerprint: &str,
    ) -> Result<Option<Participant>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .participants
            .values()
            .find(|p| p.event_id == event_id && p.device_fingerprint == device_fingerprint)
            .cloned())
    }

    async fn get_participant(
        &self,
        id: ParticipantId,
    ) -> Result<Option<Participant>, RepositoryError> {
        Ok(self.tables.read().await.participants.get(&id).cloned())
    }

    async fn create_participant(
        &self,
        participant: Participant,
    ) -> Result<Participant, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables
            .participants
            .insert(participant.participant_id, participant.clone());
        Ok(participant)
    }

    async fn update_participant(
        &self,
        participant: Participant,
    ) -> Result<Participant, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.participants.contains_key(&participant.participant_id) {
            return Err(RepositoryError::NotFound);
        }
        tables
            .participants
            .insert(participant.participant_id, participant.clone());
        Ok(participant)
    }

    async fn list_participants_by_event(
        &self,
        event_id: EventId,
    ) -> Result<Vec<Participant>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .participants
            .values()
            .filter(|p| p.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn find_active_event_for_device(
        &self,
        device_fingerprint: &str,
        exclude_event_id: Option<EventId>,
    ) -> Result<Option<Event>, RepositoryError> {
        let tables = self.tables.read().await;
        let active_event_ids: Vec<EventId> = tables
            .participants
            .values()
            .filter(|p| p.device_fingerprint == device_fingerprint)
            .map(|p| p.event_id)
            .filter(|id| Some(*id) != exclude_event_id)
            .collect();

        Ok(tables
            .events
            .values()
            .find(|event| {
                active_event_ids.contains(&event.event_id)
                    && matches!(event.status, EventStatus::Waiting | EventStatus::Active)
            })
            .cloned())
    }

    async fn upsert_segment_score(
        &self,
        segment_id: SegmentId,
        participant_id: ParticipantId,
        delta_score: i64,
        is_correct: bool,
        response_time_ms: i64,
    ) -> Result<SegmentScore, RepositoryError> {
        let mut tables = self.tables.write().await;

        let score = tables
            .segment_scores
            .entry((segment_id, participant_id))
            .or_insert_with(|| SegmentScore {
                segment_id,
                participant_id,
                score: 0,
                questions_answered: 0,
                questions_correct: 0,
                total_response_time_ms: 0,
            });
        score.score += delta_score;
        score.questions_answered += 1;
        if is_correct {
            score.questions_correct += 1;
        }
        score.total_response_time_ms += response_time_ms;
        let updated = score.clone();

        if let Some(participant) = tables.participants.get_mut(&participant_id) {
            participant.total_score += delta_score;
            participant.total_response_time_ms += response_time_ms;
        }

        Ok(updated)
    }

    async fn get_segment_leaderboard(
        &self,
        segment_id: SegmentId,
    ) -> Result<Vec<LeaderboardEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut entries: Vec<LeaderboardEntry> = tables
            .segment_scores
            .values()
            .filter(|score| score.segment_id == segment_id)
            .filter_map(|score| {
                tables
                    .participants
                    .get(&score.participant_id)
                    .map(|p| LeaderboardEntry {
                        rank: 0,
                        participant_id: p.participant_id,
                        display_name: p.display_name.clone(),
                        avatar: p.avatar.clone(),
                        score: score.score,
                        is_late_joiner: p.is_late_joiner,
                        total_response_time_ms: score.total_response_time_ms,
                        is_present: true,
                    })
            })
            .collect();
        rank_leaderboard(&mut entries);
        Ok(entries)
    }

    async fn get_event_leaderboard(
        &self,
        event_id: EventId,
    ) -> Result<Vec<LeaderboardEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut entries: Vec<LeaderboardEntry> = tables
            .participants
            .values()
            .filter(|p| p.event_id == event_id)
            .map(|p| LeaderboardEntry {
                rank: 0,
                participant_id: p.participant_id,
                display_name: p.display_name.clone(),
                avatar: p.avatar.clone(),
                score: p.total_score,
                is_late_joiner: p.is_late_joiner,
                total_response_time_ms: p.total_response_time_ms,
                is_present: true,
            })
            .collect();
        rank_leaderboard(&mut entries);
        Ok(entries)
    }

    async fn count_event_questions(&self, event_id: EventId) -> Result<u32, RepositoryError> {
        let tables = self.tables.read().await;
        let total = tables
            .segments
            .values()
            .filter(|segment| segment.event_id == event_id)
            .filter_map(|segment| tables.questions.get(&segment.segment_id))
            .map(|questions| questions.len() as u32)
            .sum();
        Ok(total)
    }

    async fn aggregate_event_questions(
        &self,
        event_id: EventId,
        max_questions: Option<u32>,
    ) -> Result<Vec<Question>, RepositoryError> {
        use rand::seq::SliceRandom;

        let tables = self.tables.read().await;
        let mut segments: Vec<&Segment> = tables
            .segments
            .values()
            .filter(|segment| segment.event_id == event_id)
            .collect();
        segments.sort_by_key(|segment| segment.order_index);

        let mut all_questions: Vec<Question> = segments
            .into_iter()
            .flat_map(|segment| {
                tables
                    .questions
                    .get(&segment.segment_id)
                    .cloned()
                    .unwrap_or_default()
            })
            .collect();

        all_questions.shuffle(&mut rand::thread_rng());

        if let Some(max_questions) = max_questions {
            all_questions.truncate(max_questions as usize);
        }

        Ok(all_questions)
    }
}

/// Sorts a leaderboard by score descending, then response time ascending
/// (U9), and assigns dense 1-based ranks.
fn rank_leaderboard(entries: &mut [LeaderboardEntry]) {
    entries.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.total_response_time_ms.cmp(&b.total_response_time_ms))
    });
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.rank = index as u32 + 1;
    }
}
