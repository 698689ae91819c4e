//! The wire protocol: every message a client can send and every message the
//! hub can broadcast or reply with, grounded on the original Python
//! implementation's `ws/messages.py`. Both enums are internally tagged on
//! `type` so they deserialize straight off a WebSocket text frame with
//! `serde_json::from_str`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{LeaderboardEntry, SegmentWinner, SingleSegmentMode};
use crate::errors::ErrorKind;
use crate::id::{EventId, ParticipantId, QuestionId, SegmentId, UserId};

/// Where the Event Session's game state machine currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizPhase {
    NotStarted,
    ShowingQuestion,
    RevealingAnswer,
    ShowingLeaderboard,
    BetweenQuestions,
    SegmentComplete,
    MegaQuizReady,
    MegaQuiz,
    EventComplete,
    PresenterPaused,
}

/// A participant as rendered to clients — a projection of `data::Participant`
/// plus the connection-derived `online` flag that never gets persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantWire {
    pub user_id: ParticipantId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub join_status: Option<String>,
    #[serde(default)]
    pub is_late_joiner: bool,
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub online: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerDistribution {
    pub answer: String,
    pub count: u32,
    pub percentage: f64,
}

/// Every message a connected client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        user_id: UserId,
        session_code: String,
    },
    Answer {
        question_id: QuestionId,
        selected_answer: String,
        response_time_ms: i64,
    },
    StartGame,
    NextQuestion,
    RevealAnswer,
    ShowLeaderboard,
    EndGame,
    PassPresenter {
        next_presenter_user_id: UserId,
    },
    AdminSelectPresenter {
        presenter_user_id: UserId,
        segment_id: SegmentId,
    },
    StartMegaQuiz {
        #[serde(default)]
        question_count: Option<u32>,
    },
    SkipMegaQuiz,
    SelectPresenter {
        presenter_user_id: UserId,
    },
    StartPresentation {
        #[serde(default)]
        title: Option<String>,
    },
    ResumeSegment {
        segment_id: SegmentId,
    },
    Pong,
}

/// Every message the hub can send to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        participants: Vec<ParticipantWire>,
    },
    ParticipantJoined {
        user: ParticipantWire,
    },
    ParticipantLeft {
        user_id: ParticipantId,
        #[serde(default)]
        online: bool,
    },
    GameStarted,
    GameEnded,
    Question {
        question_id: QuestionId,
        question_number: u32,
        total_questions: u32,
        text: String,
        answers: Vec<String>,
        time_limit: u32,
    },
    TimeUpdate {
        remaining_seconds: u32,
    },
    AnswerReceived {
        user_id: ParticipantId,
    },
    Reveal {
        question_id: QuestionId,
        question_number: u32,
        question_text: String,
        correct_answer: String,
        distribution: Vec<AnswerDistribution>,
        segment_leaderboard: Vec<LeaderboardEntry>,
        event_leaderboard: Vec<LeaderboardEntry>,
    },
    Leaderboard {
        rankings: Vec<LeaderboardEntry>,
    },
    PhaseChanged {
        phase: QuizPhase,
        question_index: u32,
        total_questions: u32,
    },
    AllAnswered {
        answer_count: u32,
        total_participants: u32,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    MegaQuizReady {
        event_id: EventId,
        available_questions: u32,
        current_leaderboard: Vec<LeaderboardEntry>,
        #[serde(default)]
        is_single_segment: bool,
        #[serde(default)]
        single_segment_mode: Option<SingleSegmentMode>,
    },
    MegaQuizStarted {
        event_id: EventId,
        question_count: u32,
    },
    SegmentComplete {
        segment_id: SegmentId,
        segment_title: String,
        presenter_name: String,
        segment_leaderboard: Vec<LeaderboardEntry>,
        event_leaderboard: Vec<LeaderboardEntry>,
        segment_winner: Option<SegmentWinner>,
        event_leader: Option<LeaderboardEntry>,
    },
    EventComplete {
        event_id: EventId,
        final_leaderboard: Vec<LeaderboardEntry>,
        winner: Option<LeaderboardEntry>,
        #[serde(default)]
        segment_winners: Vec<SegmentWinner>,
    },
    PresenterChanged {
        previous_presenter_id: UserId,
        new_presenter_id: UserId,
        new_presenter_name: String,
        segment_id: SegmentId,
    },
    PresenterDisconnected {
        presenter_id: UserId,
        presenter_name: String,
        segment_id: SegmentId,
    },
    PresenterPaused {
        presenter_id: UserId,
        presenter_name: String,
        segment_id: SegmentId,
        question_index: u32,
        total_questions: u32,
        #[serde(default)]
        reason: Option<String>,
    },
    PresenterOverrideNeeded {
        presenter_id: UserId,
        presenter_name: String,
        segment_id: SegmentId,
    },
    NoQuestionsGenerated {
        segment_id: SegmentId,
        #[serde(default)]
        segment_title: Option<String>,
        presenter_name: String,
        #[serde(default = "default_insufficient_content")]
        reason: String,
    },
    ParticipantNameChanged {
        user_id: ParticipantId,
        old_name: String,
        new_name: String,
    },
    JoinLockStatusChanged {
        event_id: EventId,
        join_locked: bool,
        locked_at: Option<DateTime<Utc>>,
        message: String,
    },
    QuizGenerating {
        segment_id: SegmentId,
    },
    QuizReady {
        segment_id: SegmentId,
        questions_count: u32,
        #[serde(default = "default_true")]
        auto_start: bool,
    },
    ProcessingStatus {
        segment_id: SegmentId,
        stage: String,
        message: String,
    },
    StateRestored {
        event_id: EventId,
        segment_id: Option<SegmentId>,
        current_phase: QuizPhase,
        current_question_id: Option<QuestionId>,
        question_text: Option<String>,
        #[serde(default)]
        answers: Vec<String>,
        time_limit: Option<u32>,
        question_started_at: Option<DateTime<Utc>>,
        #[serde(default)]
        your_score: i64,
        your_answer: Option<String>,
        #[serde(default)]
        participants: Vec<ParticipantWire>,
    },
    Pong,
    Ping,
    PresenterSelected {
        presenter_id: UserId,
        presenter_name: String,
        #[serde(default)]
        is_first_presenter: bool,
    },
    PresentationStarted {
        segment_id: SegmentId,
        presenter_id: UserId,
        presenter_name: String,
    },
    WaitingForPresenter {
        event_id: EventId,
        participant_count: u32,
    },
}

fn default_insufficient_content() -> String {
    "insufficient_content".to_string()
}
