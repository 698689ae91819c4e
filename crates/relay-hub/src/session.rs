//! The Event Session: the single-writer actor for one event's game state,
//! grounded on `ws/hub.py`'s `GameState`/`EventSession` dataclasses and the
//! control-message handlers spread across `ws/game_handler.py`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_core::clock::SharedClock;
use relay_core::config::Config;
use relay_core::data::{JoinStatus, SegmentStatus, SingleSegmentMode};
use relay_core::errors::{ErrorKind, SessionError};
use relay_core::id::{EventId, ParticipantId, QuestionId, SegmentId, UserId};
use relay_core::protocol::{AnswerDistribution, ParticipantWire, QuizPhase, ServerMessage};
use tokio::sync::Mutex;

use crate::repository::Repository;
use crate::scoring::score_for_answer;

/// Why a segment is currently on hold (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    NoParticipants,
    PresenterDisconnected,
    AllDisconnected,
}

impl PauseReason {
    fn as_str(self) -> &'static str {
        match self {
            PauseReason::NoParticipants => "no_participants",
            PauseReason::PresenterDisconnected => "presenter_disconnected",
            PauseReason::AllDisconnected => "all_disconnected",
        }
    }
}

/// The in-memory mirror of one participant's presence and quiz standing,
/// distinct from the persisted `relay_core::data::Participant` row.
#[derive(Debug, Clone)]
pub struct ParticipantInfo {
    pub participant_id: ParticipantId,
    pub user_id: UserId,
    pub display_name: String,
    pub avatar: Option<String>,
    pub join_status: JoinStatus,
    pub is_late_joiner: bool,
    pub joined_at: DateTime<Utc>,
    pub online: bool,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl ParticipantInfo {
    fn to_wire(&self) -> ParticipantWire {
        ParticipantWire {
            user_id: self.participant_id,
            username: self.display_name.clone(),
            avatar_url: self.avatar.clone(),
            join_status: Some(join_status_str(self.join_status).to_string()),
            is_late_joiner: self.is_late_joiner,
            joined_at: Some(self.joined_at),
            online: self.online,
        }
    }
}

fn join_status_str(status: JoinStatus) -> &'static str {
    match status {
        JoinStatus::Joined => "joined",
        JoinStatus::WaitingForSegment => "waiting_for_segment",
        JoinStatus::ActiveInQuiz => "active_in_quiz",
        JoinStatus::SegmentComplete => "segment_complete",
    }
}

/// A question as cached for the active segment's quiz — text and the
/// correct answer are resolved once when the segment's quiz starts so the
/// hot path never re-reads the repository.
#[derive(Debug, Clone)]
pub struct CachedQuestion {
    pub question_id: QuestionId,
    pub text: String,
    pub correct_answer: String,
    pub answers: Vec<String>,
}

/// Authoritative runtime state for one event (§4.2).
#[derive(Debug)]
pub struct GameState {
    pub event_id: EventId,
    pub current_segment_id: Option<SegmentId>,
    pub current_presenter_id: Option<UserId>,
    pub current_question_id: Option<QuestionId>,
    pub current_question_index: u32,
    pub question_started_at: Option<DateTime<Utc>>,
    pub time_limit_seconds: u32,
    pub quiz_phase: QuizPhase,
    pub presenter_paused: bool,
    pub presenter_pause_reason: Option<PauseReason>,
    pub pending_presenter_id: Option<UserId>,
    pub pending_presenter_name: Option<String>,
    pub questions: Vec<CachedQuestion>,
    pub participants: HashMap<ParticipantId, ParticipantInfo>,
    pub participants_by_user: HashMap<UserId, ParticipantId>,
    pub answers_received: HashMap<ParticipantId, String>,
    pub total_questions: u32,
    pub scored_question_ids: HashSet<QuestionId>,
    pub last_auto_resume_at: Option<DateTime<Utc>>,
    pub segment_resume_at: HashMap<SegmentId, DateTime<Utc>>,
}

impl GameState {
    fn new(event_id: EventId, time_limit_seconds: u32) -> Self {
        Self {
            event_id,
            current_segment_id: None,
            current_presenter_id: None,
            current_question_id: None,
            current_question_index: 0,
            question_started_at: None,
            time_limit_seconds,
            quiz_phase: QuizPhase::NotStarted,
            presenter_paused: false,
            presenter_pause_reason: None,
            pending_presenter_id: None,
            pending_presenter_name: None,
            questions: Vec::new(),
            participants: HashMap::new(),
            participants_by_user: HashMap::new(),
            answers_received: HashMap::new(),
            total_questions: 0,
            scored_question_ids: HashSet::new(),
            last_auto_resume_at: None,
            segment_resume_at: HashMap::new(),
        }
    }

    fn current_question(&self) -> Option<&CachedQuestion> {
        self.current_question_id
            .and_then(|id| self.questions.iter().find(|q| q.question_id == id))
    }

    fn non_presenter_online_count(&self) -> usize {
        self.participants
            .values()
            .filter(|p| p.online)
            .filter(|p| Some(p.participant_id) != self.current_presenter_participant_id())
            .count()
    }

    fn current_presenter_participant_id(&self) -> Option<ParticipantId> {
        // The presenter's seat is addressed by UserId (§3); this resolves
        // to the presenter's live connection, if they're currently joined
        // as a participant in this session.
        self.current_presenter_id
            .and_then(|id| self.participants_by_user.get(&id).copied())
    }
}

/// One outbound frame the caller must deliver, produced while holding the
/// session mutex and sent only after it's released (§4.1, §5).
#[derive(Debug, Clone)]
pub enum Broadcast {
    ToAll(ServerMessage),
    ToOne(ParticipantId, ServerMessage),
}

/// The single-writer actor for one event.
pub struct EventSession {
    pub event_id: EventId,
    repository: Arc<dyn Repository>,
    clock: SharedClock,
    config: Config,
    state: Mutex<GameState>,
}

impl EventSession {
    pub fn new(
        event_id: EventId,
        repository: Arc<dyn Repository>,
        clock: SharedClock,
        config: Config,
    ) -> Self {
        let time_limit = config.time_per_question_s;
        Self {
            event_id,
            repository,
            clock,
            config,
            state: Mutex::new(GameState::new(event_id, time_limit)),
        }
    }

    /// Registers a participant's presence and returns the frames to send
    /// (`connected` to the joiner, `participant_joined` to everyone else).
    pub async fn join(
        &self,
        participant_id: ParticipantId,
        user_id: UserId,
        display_name: String,
        avatar: Option<String>,
        is_late_joiner: bool,
    ) -> Vec<Broadcast> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let join_status = if is_late_joiner {
            JoinStatus::WaitingForSegment
        } else {
            JoinStatus::Joined
        };

        let info = ParticipantInfo {
            participant_id,
            user_id,
            display_name,
            avatar,
            join_status,
            is_late_joiner,
            joined_at: now,
            online: true,
            disconnected_at: None,
        };
        state.participants.insert(participant_id, info.clone());
        state.participants_by_user.insert(user_id, participant_id);

        let participants: Vec<ParticipantWire> =
            state.participants.values().map(ParticipantInfo::to_wire).collect();

        vec![
            Broadcast::ToOne(
                participant_id,
                ServerMessage::Connected { participants },
            ),
            Broadcast::ToAll(ServerMessage::ParticipantJoined {
                user: info.to_wire(),
            }),
        ]
    }

    /// Admission-checked answer submission (§4.4) plus scoring (§4.7).
    pub async fn answer(
        &self,
        participant_id: ParticipantId,
        question_id: QuestionId,
        selected_answer: String,
    ) -> Result<Vec<Broadcast>, SessionError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let question_started_at = state
            .question_started_at
            .ok_or_else(|| SessionError::new(ErrorKind::NoQuestion, "no active question"))?;

        if state.current_question_id != Some(question_id) {
            return Err(SessionError::new(ErrorKind::Stale, "question is no longer active"));
        }

        if state.presenter_paused {
            return Err(SessionError::new(ErrorKind::Paused, "presenter has paused the quiz"));
        }

        if let Some(participant) = state.participants.get(&participant_id) {
            if participant.joined_at > question_started_at {
                return Err(SessionError::new(
                    ErrorKind::LateJoin,
                    "joined after this question started",
                ));
            }
        }

        if state.answers_received.contains_key(&participant_id) {
            return Err(SessionError::new(ErrorKind::Duplicate, "already answered"));
        }

        let elapsed_ms = (now - question_started_at).num_milliseconds();
        let time_limit_ms = state.time_limit_seconds as i64 * 1000;
        let grace_ms = self.config.answer_timeout_grace_ms as i64;
        if elapsed_ms >= time_limit_ms + grace_ms {
            return Err(SessionError::new(ErrorKind::TooLate, "answered after the grace window"));
        }

        let correct_answer = state
            .current_question()
            .map(|q| q.correct_answer.clone())
            .ok_or_else(|| SessionError::new(ErrorKind::NoQuestion, "question not cached"))?;
        let is_correct = selected_answer == correct_answer;
        let delta = score_for_answer(time_limit_ms, elapsed_ms.max(0), is_correct);

        state
            .answers_received
            .insert(participant_id, selected_answer);

        let segment_id = state
            .current_segment_id
            .ok_or_else(|| SessionError::new(ErrorKind::NoQuestion, "no active segment"))?;

        self.repository
            .upsert_segment_score(segment_id, participant_id, delta, is_correct, elapsed_ms.max(0))
            .await?;

        Ok(vec![Broadcast::ToAll(ServerMessage::AnswerReceived {
            user_id: participant_id,
        })])
    }

    /// Applies zero-fill to every participant who hasn't answered the
    /// active question yet (§4.7), guarded by `scored_question_ids`.
    async fn zero_fill_active_question(&self, state: &mut GameState) -> Result<(), SessionError> {
        let Some(question_id) = state.current_question_id else {
            return Ok(());
        };
        if state.scored_question_ids.contains(&question_id) {
            return Ok(());
        }
        let Some(segment_id) = state.current_segment_id else {
            return Ok(());
        };

        let unanswered: Vec<ParticipantId> = state
            .participants
            .values()
            .filter(|p| p.join_status != JoinStatus::SegmentComplete)
            .filter(|p| !state.answers_received.contains_key(&p.participant_id))
            .map(|p| p.participant_id)
            .collect();

        for participant_id in unanswered {
            self.repository
                .upsert_segment_score(segment_id, participant_id, 0, false, 0)
                .await?;
            if let Some(info) = state.participants.get_mut(&participant_id) {
                advance_join_status(info);
            }
        }

        state.scored_question_ids.insert(question_id);
        Ok(())
    }

    /// Builds the segment and event leaderboards, enriching `is_present`
    /// from the in-memory presence map — the repository has no notion of
    /// an open connection.
    async fn leaderboards(
        &self,
        state: &GameState,
        segment_id: SegmentId,
    ) -> Result<(Vec<relay_core::data::LeaderboardEntry>, Vec<relay_core::data::LeaderboardEntry>), SessionError>
    {
        let mut segment_board = self.repository.get_segment_leaderboard(segment_id).await?;
        let mut event_board = self.repository.get_event_leaderboard(self.event_id).await?;
        for entry in segment_board.iter_mut().chain(event_board.iter_mut()) {
            entry.is_present = state
                .participants
                .get(&entry.participant_id)
                .map(|p| p.online)
                .unwrap_or(false);
        }
        Ok((segment_board, event_board))
    }

    /// Sets the segment a presenter is now presenting and who holds the
    /// presenter seat, ahead of `start_game` (§4.2 `StartPresentation` /
    /// `SelectPresenter` / `AdminSelectPresenter`).
    pub async fn set_current_segment(&self, segment_id: SegmentId, presenter_id: UserId) {
        let mut state = self.state.lock().await;
        state.current_segment_id = Some(segment_id);
        state.current_presenter_id = Some(presenter_id);
    }

    /// `start_game`: loads the current segment's questions, initializes the
    /// question sequence, and opens the first question — or pauses
    /// immediately if only the presenter is present.
    pub async fn start_game(&self) -> Result<Vec<Broadcast>, SessionError> {
        let segment_id = {
            let state = self.state.lock().await;
            state
                .current_segment_id
                .ok_or_else(|| SessionError::new(ErrorKind::NoQuestion, "no current segment"))?
        };
        let rows = self.repository.get_questions_by_segment(segment_id).await?;
        let questions: Vec<CachedQuestion> = rows
            .into_iter()
            .map(|q| CachedQuestion {
                question_id: q.question_id,
                text: q.question_text,
                correct_answer: q.correct_answer,
                answers: q.fake_answers,
            })
            .collect();

        let mut state = self.state.lock().await;
        state.total_questions = questions.len() as u32;
        state.questions = questions;
        state.current_question_index = 0;
        state.answers_received.clear();
        state.scored_question_ids.clear();

        self.repository
            .set_segment_status(segment_id, SegmentStatus::Quizzing)
            .await?;

        if state.non_presenter_online_count() == 0 {
            return Ok(self.enter_pause(&mut state, PauseReason::NoParticipants));
        }

        Ok(self.open_question(&mut state))
    }

    fn open_question(&self, state: &mut GameState) -> Vec<Broadcast> {
        let Some(question) = state.questions.get(state.current_question_index as usize).cloned()
        else {
            return Vec::new();
        };

        state.current_question_id = Some(question.question_id);
        state.question_started_at = Some(self.clock.now());
        state.quiz_phase = QuizPhase::ShowingQuestion;
        state.presenter_paused = false;
        state.presenter_pause_reason = None;
        state.answers_received.clear();

        vec![
            Broadcast::ToAll(ServerMessage::PhaseChanged {
                phase: QuizPhase::ShowingQuestion,
                question_index: state.current_question_index,
                total_questions: state.total_questions,
            }),
            Broadcast::ToAll(ServerMessage::Question {
                question_id: question.question_id,
                question_number: state.current_question_index + 1,
                total_questions: state.total_questions,
                text: question.text,
                answers: question.answers,
                time_limit: state.time_limit_seconds,
            }),
        ]
    }

    /// `reveal_answer`: zero-fills stragglers then broadcasts the
    /// distribution and both leaderboards.
    pub async fn reveal_answer(&self) -> Result<Vec<Broadcast>, SessionError> {
        let mut state = self.state.lock().await;
        self.zero_fill_active_question(&mut state).await?;

        let Some(question) = state.current_question().cloned() else {
            return Err(SessionError::new(ErrorKind::NoQuestion, "no active question"));
        };
        let Some(segment_id) = state.current_segment_id else {
            return Err(SessionError::new(ErrorKind::NoQuestion, "no active segment"));
        };

        let distribution = answer_distribution(&state.answers_received, &question.answers);
        let (segment_board, event_board) = self.leaderboards(&state, segment_id).await?;

        state.quiz_phase = QuizPhase::RevealingAnswer;

        Ok(vec![
            Broadcast::ToAll(ServerMessage::PhaseChanged {
                phase: QuizPhase::RevealingAnswer,
                question_index: state.current_question_index,
                total_questions: state.total_questions,
            }),
            Broadcast::ToAll(ServerMessage::Reveal {
                question_id: question.question_id,
                question_number: state.current_question_index + 1,
                question_text: question.text,
                correct_answer: question.correct_answer,
                distribution,
                segment_leaderboard: segment_board,
                event_leaderboard: event_board,
            }),
        ])
    }

    /// `next_question`: zero-fills, then either opens the next question or
    /// transitions to `segment_complete`.
    pub async fn next_question(&self) -> Result<Vec<Broadcast>, SessionError> {
        let mut state = self.state.lock().await;
        self.zero_fill_active_question(&mut state).await?;

        if state.current_question_index + 1 >= state.total_questions {
            return Ok(self.complete_segment(&mut state).await?);
        }

        state.current_question_index += 1;
        Ok(self.open_question(&mut state))
    }

    /// `show_leaderboard`: an explicit leaderboard frame outside the
    /// regular reveal cycle.
    pub async fn show_leaderboard(&self) -> Result<Vec<Broadcast>, SessionError> {
        let state = self.state.lock().await;
        let rankings = self.repository.get_event_leaderboard(self.event_id).await?;
        Ok(vec![
            Broadcast::ToAll(ServerMessage::PhaseChanged {
                phase: QuizPhase::ShowingLeaderboard,
                question_index: state.current_question_index,
                total_questions: state.total_questions,
            }),
            Broadcast::ToAll(ServerMessage::Leaderboard { rankings }),
        ])
    }

    /// `end_game`: forces the current segment to `completed` regardless of
    /// question progress.
    pub async fn end_game(&self) -> Result<Vec<Broadcast>, SessionError> {
        let mut state = self.state.lock().await;
        self.zero_fill_active_question(&mut state).await?;
        self.complete_segment(&mut state).await
    }

    async fn complete_segment(&self, state: &mut GameState) -> Result<Vec<Broadcast>, SessionError> {
        let Some(segment_id) = state.current_segment_id else {
            return Err(SessionError::new(ErrorKind::NoQuestion, "no active segment"));
        };

        self.repository
            .set_segment_status(segment_id, SegmentStatus::Completed)
            .await?;

        let segment = self.repository.get_segment(segment_id).await?;
        let (segment_board, event_board) = self.leaderboards(state, segment_id).await?;
        let segment_winner = top_entry(&segment_board).map(|entry| relay_core::data::SegmentWinner {
            segment_id,
            segment_title: segment.as_ref().map(|s| s.title.clone()).unwrap_or_default(),
            winner_name: entry.display_name.clone(),
            winner_score: entry.score,
        });
        let event_leader = top_entry(&event_board).cloned();

        state.quiz_phase = QuizPhase::SegmentComplete;

        let mut broadcasts = vec![
            Broadcast::ToAll(ServerMessage::PhaseChanged {
                phase: QuizPhase::SegmentComplete,
                question_index: state.current_question_index,
                total_questions: state.total_questions,
            }),
            Broadcast::ToAll(ServerMessage::SegmentComplete {
                segment_id,
                segment_title: segment.map(|s| s.title).unwrap_or_default(),
                presenter_name: state
                    .pending_presenter_name
                    .clone()
                    .unwrap_or_default(),
                segment_leaderboard: segment_board,
                event_leaderboard: event_board,
                segment_winner,
                event_leader,
            }),
        ];

        if self.all_segments_completed().await? {
            broadcasts.extend(self.project_mega_quiz_or_completion(state).await?);
        }

        Ok(broadcasts)
    }

    async fn all_segments_completed(&self) -> Result<bool, SessionError> {
        let segments = self.repository.get_segments_by_event(self.event_id).await?;
        Ok(!segments.is_empty()
            && segments.iter().all(|s| s.status == SegmentStatus::Completed))
    }

    /// The mega-quiz projection (§4.11): always offers `mega_quiz_ready`
    /// when any question is available across all segments — this mirrors
    /// `should_emit_mega_quiz_ready` in the source verbatim, including for
    /// single-segment events in `skip` mode (see DESIGN.md).
    async fn project_mega_quiz_or_completion(
        &self,
        state: &GameState,
    ) -> Result<Vec<Broadcast>, SessionError> {
        let segments = self.repository.get_segments_by_event(self.event_id).await?;
        let available_questions = self.repository.count_event_questions(self.event_id).await?;
        let is_single_segment = segments.len() == 1;
        let single_segment_mode = if is_single_segment {
            Some(self.config_single_segment_mode())
        } else {
            None
        };

        if available_questions > 0 {
            let current_leaderboard = self.repository.get_event_leaderboard(self.event_id).await?;
            return Ok(vec![
                Broadcast::ToAll(ServerMessage::PhaseChanged {
                    phase: QuizPhase::MegaQuizReady,
                    question_index: state.current_question_index,
                    total_questions: state.total_questions,
                }),
                Broadcast::ToAll(ServerMessage::MegaQuizReady {
                    event_id: self.event_id,
                    available_questions,
                    current_leaderboard,
                    is_single_segment,
                    single_segment_mode,
                }),
            ]);
        }

        self.finalize_event(state).await
    }

    fn config_single_segment_mode(&self) -> SingleSegmentMode {
        self.config.mega_quiz_single_segment_mode
    }

    async fn finalize_event(&self, state: &GameState) -> Result<Vec<Broadcast>, SessionError> {
        let final_leaderboard = self.repository.get_event_leaderboard(self.event_id).await?;
        let winner = top_entry(&final_leaderboard).cloned();

        let segments = self.repository.get_segments_by_event(self.event_id).await?;
        let mut segment_winners = Vec::new();
        for segment in &segments {
            let board = self.repository.get_segment_leaderboard(segment.segment_id).await?;
            if let Some(top) = top_entry(&board) {
                segment_winners.push(relay_core::data::SegmentWinner {
                    segment_id: segment.segment_id,
                    segment_title: segment.title.clone(),
                    winner_name: top.display_name.clone(),
                    winner_score: top.score,
                });
            }
        }

        self.repository
            .set_event_status(
                self.event_id,
                relay_core::data::EventStatus::Finished,
                None,
            )
            .await?;

        Ok(vec![
            Broadcast::ToAll(ServerMessage::PhaseChanged {
                phase: QuizPhase::EventComplete,
                question_index: state.current_question_index,
                total_questions: state.total_questions,
            }),
            Broadcast::ToAll(ServerMessage::EventComplete {
                event_id: self.event_id,
                final_leaderboard,
                winner,
                segment_winners,
            }),
        ])
    }

    /// `start_mega_quiz`: aggregates and shuffles every segment's questions
    /// (§4.11), capping at `question_count` when given.
    pub async fn start_mega_quiz(&self, question_count: Option<u32>) -> Result<Vec<Broadcast>, SessionError> {
        let questions = self
            .repository
            .aggregate_event_questions(self.event_id, question_count)
            .await?;
        let count = questions.len() as u32;

        let mut state = self.state.lock().await;
        state.questions = questions
            .into_iter()
            .map(|q| CachedQuestion {
                question_id: q.question_id,
                text: q.question_text,
                correct_answer: q.correct_answer,
                answers: q.fake_answers,
            })
            .collect();
        state.total_questions = count;
        state.current_question_index = 0;
        state.scored_question_ids.clear();
        state.quiz_phase = QuizPhase::MegaQuiz;

        let mut broadcasts = vec![Broadcast::ToAll(ServerMessage::MegaQuizStarted {
            event_id: self.event_id,
            question_count: count,
        })];
        broadcasts.extend(self.open_question(&mut state));
        Ok(broadcasts)
    }

    /// `skip_mega_quiz`: finalizes the event using the leaderboard as it
    /// stands.
    pub async fn skip_mega_quiz(&self) -> Result<Vec<Broadcast>, SessionError> {
        let state = self.state.lock().await;
        self.finalize_event(&state).await
    }

    /// `pong`: caller updates the heartbeat monitor; the session has no
    /// state of its own to mutate.
    pub async fn pong(&self, _participant_id: ParticipantId) {}

    pub async fn current_segment_id(&self) -> Option<SegmentId> {
        self.state.lock().await.current_segment_id
    }

    /// The presenter seat's participant id, for authorization checks run
    /// outside the state lock (§4.5).
    pub async fn current_presenter_participant_id(&self) -> Option<ParticipantId> {
        self.state.lock().await.current_presenter_participant_id()
    }

    /// Resolves a display name for a user seat, falling back to a generic
    /// label when the participant row can't be found (e.g. a presenter who
    /// never joined as a participant).
    async fn participant_name(&self, user_id: UserId) -> String {
        let Some(participant_id) = self.participant_id_for_user(user_id).await else {
            return "Presenter".to_string();
        };
        self.repository
            .get_participant(participant_id)
            .await
            .ok()
            .flatten()
            .map(|p| p.display_name)
            .unwrap_or_else(|| "Presenter".to_string())
    }

    /// The live connection behind `user_id`, if they're currently joined as
    /// a participant in this session.
    async fn participant_id_for_user(&self, user_id: UserId) -> Option<ParticipantId> {
        self.state
            .lock()
            .await
            .participants_by_user
            .get(&user_id)
            .copied()
    }

    /// The authenticated user behind a connected participant, for
    /// authorization checks run outside the state lock (§4.5).
    pub async fn participant_user_id(&self, participant_id: ParticipantId) -> Option<UserId> {
        self.state
            .lock()
            .await
            .participants
            .get(&participant_id)
            .map(|p| p.user_id)
    }

    /// `pass_presenter`: the current presenter hands the seat to another
    /// connected participant (§4.2).
    pub async fn pass_presenter(
        &self,
        caller_user_id: UserId,
        next_presenter_user_id: UserId,
    ) -> Result<Vec<Broadcast>, SessionError> {
        if next_presenter_user_id == caller_user_id {
            return Err(SessionError::new(
                ErrorKind::InvalidMessage,
                "cannot pass the presenter role to yourself",
            ));
        }
        let next_presenter_name = self.participant_name(next_presenter_user_id).await;

        let (segment_id, previous_presenter_id) = {
            let mut state = self.state.lock().await;
            let online = state
                .participants_by_user
                .get(&next_presenter_user_id)
                .and_then(|id| state.participants.get(id))
                .map(|p| p.online)
                .unwrap_or(false);
            if !online {
                return Err(SessionError::new(
                    ErrorKind::NotFound,
                    "next presenter is not currently connected",
                ));
            }
            let previous_presenter_id = state.current_presenter_id.unwrap_or(caller_user_id);
            state.current_presenter_id = Some(next_presenter_user_id);
            state.pending_presenter_id = Some(next_presenter_user_id);
            state.pending_presenter_name = Some(next_presenter_name.clone());
            (state.current_segment_id, previous_presenter_id)
        };

        if let Some(segment_id) = segment_id {
            if let Some(mut segment) = self.repository.get_segment(segment_id).await? {
                segment.presenter_user_id = Some(next_presenter_user_id);
                segment.presenter_name = next_presenter_name.clone();
                self.repository.save_segment(segment).await?;
            }
        }

        Ok(vec![Broadcast::ToAll(ServerMessage::PresenterChanged {
            previous_presenter_id,
            new_presenter_id: next_presenter_user_id,
            new_presenter_name: next_presenter_name,
            segment_id: segment_id.unwrap_or_default(),
        })])
    }

    /// `admin_select_presenter`: a host assigns the presenter seat for a
    /// segment regardless of who currently holds it, resuming the segment
    /// if it was paused waiting on this presenter.
    pub async fn admin_select_presenter(
        &self,
        segment_id: SegmentId,
        presenter_user_id: UserId,
    ) -> Result<Vec<Broadcast>, SessionError> {
        let presenter_name = self.participant_name(presenter_user_id).await;

        let mut segment = self
            .repository
            .get_segment(segment_id)
            .await?
            .ok_or_else(|| SessionError::new(ErrorKind::NotFound, "segment not found"))?;
        segment.presenter_user_id = Some(presenter_user_id);
        segment.presenter_name = presenter_name.clone();
        self.repository.save_segment(segment).await?;

        let mut state = self.state.lock().await;
        let previous_presenter_id = state.current_presenter_id.unwrap_or(presenter_user_id);
        let should_resume = state.current_segment_id == Some(segment_id) && state.presenter_paused;

        if state.current_segment_id == Some(segment_id) {
            state.current_presenter_id = Some(presenter_user_id);
            state.pending_presenter_id = Some(presenter_user_id);
            state.pending_presenter_name = Some(presenter_name.clone());
        }

        let mut broadcasts = vec![Broadcast::ToAll(ServerMessage::PresenterChanged {
            previous_presenter_id,
            new_presenter_id: presenter_user_id,
            new_presenter_name: presenter_name,
            segment_id,
        })];

        if should_resume {
            broadcasts.extend(self.resume_locked(&mut state));
        }

        Ok(broadcasts)
    }

    /// `select_presenter`: a participant claims the presenter seat for the
    /// segment currently active in this session (self-nomination).
    pub async fn select_presenter(
        &self,
        presenter_user_id: UserId,
    ) -> Result<Vec<Broadcast>, SessionError> {
        let presenter_name = self.participant_name(presenter_user_id).await;
        let mut state = self.state.lock().await;
        let is_first_presenter = state.current_presenter_id.is_none();
        state.current_presenter_id = Some(presenter_user_id);
        state.pending_presenter_id = Some(presenter_user_id);
        state.pending_presenter_name = Some(presenter_name.clone());

        Ok(vec![Broadcast::ToAll(ServerMessage::PresenterSelected {
            presenter_id: presenter_user_id,
            presenter_name,
            is_first_presenter,
        })])
    }

    /// `start_presentation`: the assigned presenter (or host) begins
    /// recording the current segment.
    pub async fn start_presentation(
        &self,
        title: Option<String>,
    ) -> Result<Vec<Broadcast>, SessionError> {
        let (segment_id, presenter_id) = {
            let state = self.state.lock().await;
            let segment_id = state
                .current_segment_id
                .ok_or_else(|| SessionError::new(ErrorKind::NoQuestion, "no current segment"))?;
            let presenter_id = state
                .current_presenter_id
                .ok_or_else(|| SessionError::new(ErrorKind::Unauthorized, "no presenter assigned"))?;
            (segment_id, presenter_id)
        };

        let presenter_name = self.participant_name(presenter_id).await;
        let mut segment = self
            .repository
            .get_segment(segment_id)
            .await?
            .ok_or_else(|| SessionError::new(ErrorKind::NotFound, "segment not found"))?;
        if let Some(title) = title {
            segment.title = title;
        }
        segment.presenter_user_id = Some(presenter_id);
        segment.presenter_name = presenter_name.clone();
        segment.recording_started_at = Some(self.clock.now());
        self.repository.save_segment(segment).await?;
        self.repository
            .set_segment_status(segment_id, SegmentStatus::Recording)
            .await?;

        Ok(vec![Broadcast::ToAll(ServerMessage::PresentationStarted {
            segment_id,
            presenter_id,
            presenter_name,
        })])
    }

    /// `resume_segment`: resumes a paused segment's recording, debounced so
    /// an eager presenter double-clicking doesn't fire it twice.
    pub async fn resume_segment(&self, segment_id: SegmentId) -> Result<Vec<Broadcast>, SessionError> {
        {
            let mut state = self.state.lock().await;
            let now = self.clock.now();
            let debounce = chrono::Duration::seconds(self.config.segment_resume_debounce_s as i64);
            if let Some(last) = state.segment_resume_at.get(&segment_id) {
                if now - *last < debounce {
                    return Err(SessionError::new(
                        ErrorKind::TooManyRequests,
                        "resume_segment debounced",
                    ));
                }
            }
            state.segment_resume_at.insert(segment_id, now);
        }

        let mut segment = self
            .repository
            .get_segment(segment_id)
            .await?
            .ok_or_else(|| SessionError::new(ErrorKind::NotFound, "segment not found"))?;
        segment.recording_paused_at = None;
        let presenter_id = segment.presenter_user_id;
        self.repository.save_segment(segment).await?;
        self.repository
            .set_segment_status(segment_id, SegmentStatus::Recording)
            .await?;

        let Some(presenter_id) = presenter_id else {
            return Ok(Vec::new());
        };
        let presenter_name = self.participant_name(presenter_id).await;

        Ok(vec![Broadcast::ToAll(ServerMessage::PresentationStarted {
            segment_id,
            presenter_id,
            presenter_name,
        })])
    }

    /// Enters `presenter_paused` for `reason`, preserving
    /// `current_question_index` (invariant 8).
    fn enter_pause(&self, state: &mut GameState, reason: PauseReason) -> Vec<Broadcast> {
        state.presenter_paused = true;
        state.presenter_pause_reason = Some(reason);
        state.quiz_phase = QuizPhase::PresenterPaused;

        vec![Broadcast::ToAll(ServerMessage::PresenterPaused {
            presenter_id: state.current_presenter_id.unwrap_or_default(),
            presenter_name: String::new(),
            segment_id: state.current_segment_id.unwrap_or_default(),
            question_index: state.current_question_index,
            total_questions: state.total_questions,
            reason: Some(reason.as_str().to_string()),
        })]
    }

    /// Resumes a paused segment without resetting `current_question_index`
    /// (§4.10); `question_started_at` restarts at `now`.
    pub async fn resume_from_pause(&self) -> Vec<Broadcast> {
        let mut state = self.state.lock().await;
        self.resume_locked(&mut state)
    }

    fn resume_locked(&self, state: &mut GameState) -> Vec<Broadcast> {
        if !state.presenter_paused {
            return Vec::new();
        }
        state.presenter_paused = false;
        state.presenter_pause_reason = None;
        state.question_started_at = Some(self.clock.now());
        state.quiz_phase = QuizPhase::ShowingQuestion;

        let Some(question) = state.current_question().cloned() else {
            return Vec::new();
        };

        vec![
            Broadcast::ToAll(ServerMessage::PhaseChanged {
                phase: QuizPhase::ShowingQuestion,
                question_index: state.current_question_index,
                total_questions: state.total_questions,
            }),
            Broadcast::ToAll(ServerMessage::Question {
                question_id: question.question_id,
                question_number: state.current_question_index + 1,
                total_questions: state.total_questions,
                text: question.text,
                answers: question.answers,
                time_limit: state.time_limit_seconds,
            }),
        ]
    }

    /// Marks a participant offline and, if they were mid-quiz, evaluates
    /// whether the segment should pause (§4.10).
    pub async fn mark_offline(&self, participant_id: ParticipantId) -> Vec<Broadcast> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        if let Some(info) = state.participants.get_mut(&participant_id) {
            info.online = false;
            info.disconnected_at = Some(now);
        }

        let mut broadcasts = vec![Broadcast::ToAll(ServerMessage::ParticipantLeft {
            user_id: participant_id,
            online: false,
        })];

        if state.presenter_paused || state.quiz_phase == QuizPhase::NotStarted {
            return broadcasts;
        }

        if Some(participant_id) == state.current_presenter_participant_id() {
            broadcasts.extend(self.enter_pause(&mut state, PauseReason::PresenterDisconnected));
        } else if state.participants.values().all(|p| !p.online) {
            broadcasts.extend(self.enter_pause(&mut state, PauseReason::AllDisconnected));
        }

        broadcasts
    }

    /// Marks a participant online and, per §4.10's resume triggers, resumes
    /// a paused segment when the arrival is the one it was waiting on —
    /// debounced against `event_resume_debounce_s` so a flurry of
    /// reconnects only resumes once.
    pub async fn mark_online(&self, participant_id: ParticipantId) -> Vec<Broadcast> {
        let mut state = self.state.lock().await;
        if let Some(info) = state.participants.get_mut(&participant_id) {
            info.online = true;
            info.disconnected_at = None;
        }

        if !state.presenter_paused {
            return Vec::new();
        }

        let triggers_resume = match state.presenter_pause_reason {
            Some(PauseReason::PresenterDisconnected) => {
                Some(participant_id) == state.current_presenter_participant_id()
            }
            Some(PauseReason::NoParticipants) | Some(PauseReason::AllDisconnected) => {
                Some(participant_id) != state.current_presenter_participant_id()
            }
            None => false,
        };
        if !triggers_resume {
            return Vec::new();
        }

        let now = self.clock.now();
        let debounce = chrono::Duration::seconds(self.config.event_resume_debounce_s as i64);
        if let Some(last) = state.last_auto_resume_at {
            if now - last < debounce {
                return Vec::new();
            }
        }
        state.last_auto_resume_at = Some(now);

        self.resume_locked(&mut state)
    }

    /// Snapshot sent to a reconnecting participant within the reconnect
    /// window instead of a fresh `connected` frame (S5).
    pub async fn state_restored(&self, participant_id: ParticipantId) -> Option<ServerMessage> {
        let your_score = self
            .repository
            .get_participant(participant_id)
            .await
            .ok()
            .flatten()
            .map(|p| p.total_score)
            .unwrap_or(0);

        let state = self.state.lock().await;
        let _ = state.participants.get(&participant_id)?;
        let question = state.current_question();

        Some(ServerMessage::StateRestored {
            event_id: self.event_id,
            segment_id: state.current_segment_id,
            current_phase: state.quiz_phase,
            current_question_id: question.map(|q| q.question_id),
            question_text: question.map(|q| q.text.clone()),
            answers: question.map(|q| q.answers.clone()).unwrap_or_default(),
            time_limit: Some(state.time_limit_seconds),
            question_started_at: state.question_started_at,
            your_score,
            your_answer: state.answers_received.get(&participant_id).cloned(),
            participants: state
                .participants
                .values()
                .map(ParticipantInfo::to_wire)
                .collect(),
        })
    }

    pub async fn is_participant_present(&self, participant_id: ParticipantId) -> bool {
        self.state
            .lock()
            .await
            .participants
            .get(&participant_id)
            .map(|p| p.online)
            .unwrap_or(false)
    }

    /// Whether `participant_id` is already known to this session and
    /// disconnected recently enough to qualify for `state_restored` instead
    /// of a fresh `connected` (§4.3 reconnect window).
    pub async fn reconnect_eligible(&self, participant_id: ParticipantId) -> bool {
        let state = self.state.lock().await;
        let Some(info) = state.participants.get(&participant_id) else {
            return false;
        };
        match info.disconnected_at {
            Some(disconnected_at) => {
                let window = chrono::Duration::seconds(self.config.reconnect_window_s as i64);
                self.clock.now() - disconnected_at <= window
            }
            None => true,
        }
    }

    pub async fn snapshot_participant_count(&self) -> usize {
        self.state.lock().await.participants.len()
    }

    /// Every participant currently known to this session, for the Hub's
    /// broadcast fan-out (snapshot taken and released before any send).
    pub async fn participant_ids(&self) -> Vec<ParticipantId> {
        self.state.lock().await.participants.keys().copied().collect()
    }

    /// The phase a freshly admitted join should be evaluated against
    /// (§4.8's "mid-question/mid-reveal/mid-leaderboard" check).
    pub async fn current_phase(&self) -> QuizPhase {
        self.state.lock().await.quiz_phase
    }
}

fn advance_join_status(info: &mut ParticipantInfo) {
    if info.join_status == JoinStatus::WaitingForSegment {
        info.join_status = JoinStatus::ActiveInQuiz;
    }
}

fn top_entry(board: &[relay_core::data::LeaderboardEntry]) -> Option<&relay_core::data::LeaderboardEntry> {
    board.iter().min_by_key(|entry| entry.rank)
}

fn answer_distribution(
    answers_received: &HashMap<ParticipantId, String>,
    possible_answers: &[String],
) -> Vec<AnswerDistribution> {
    let total = answers_received.len().max(1) as f64;
    let mut counts: HashMap<&str, u32> = possible_answers.iter().map(|a| (a.as_str(), 0)).collect();
    for answer in answers_received.values() {
        *counts.entry(answer.as_str()).or_insert(0) += 1;
    }
    possible_answers
        .iter()
        .map(|answer| {
            let count = *counts.get(answer.as_str()).unwrap_or(&0);
            AnswerDistribution {
                answer: answer.clone(),
                count,
                percentage: (count as f64 / total) * 100.0,
            }
        })
        .collect()
}
