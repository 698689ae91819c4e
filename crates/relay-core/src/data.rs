//! Domain entities shared between the hub and the repository it talks to.
//!
//! These are plain data rows — the durable shape of an Event, Segment,
//! Question, Participant, and SegmentScore as persisted by the Repository
//! (see `relay-hub::repository`). The Event Session's in-memory runtime
//! state is a different, smaller shape (`relay_hub::session::ParticipantInfo`
//! and friends) that mirrors only what the hub needs while an event is live.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{EventId, ParticipantId, QuestionId, SegmentId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMode {
    ListenOnly,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Waiting,
    Active,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Pending,
    Recording,
    RecordingPaused,
    QuizReady,
    Quizzing,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    Joined,
    WaitingForSegment,
    ActiveInQuiz,
    SegmentComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleSegmentMode {
    Remix,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinAttemptStatus {
    Pending,
    Admitted,
    Rejected,
}

/// A live quiz instance, identified by a short join code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub host_id: UserId,
    pub title: String,
    pub join_code: String,
    pub mode: EventMode,
    pub status: EventStatus,
    pub previous_status: Option<EventStatus>,
    pub join_locked: bool,
    pub join_locked_at: Option<DateTime<Utc>>,
    pub time_per_question: u32,
    pub num_fake_answers: u32,
}

/// One presenter's slice of an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub segment_id: SegmentId,
    pub event_id: EventId,
    pub presenter_name: String,
    pub presenter_user_id: Option<UserId>,
    pub title: String,
    pub order_index: u32,
    pub status: SegmentStatus,
    pub previous_status: Option<SegmentStatus>,
    pub recording_started_at: Option<DateTime<Utc>>,
    pub recording_paused_at: Option<DateTime<Utc>>,
    pub quiz_ready_at: Option<DateTime<Utc>>,
    pub quiz_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A single multiple-choice question, immutable once generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question_id: QuestionId,
    pub segment_id: SegmentId,
    pub question_text: String,
    pub correct_answer: String,
    pub fake_answers: Vec<String>,
    pub order_index: u32,
    pub is_ai_generated: bool,
    pub source_transcript: Option<String>,
}

/// A persisted attendee row, keyed by `(event_id, device_fingerprint)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: ParticipantId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub device_fingerprint: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub session_token: String,
    pub is_late_joiner: bool,
    pub join_status: JoinStatus,
    pub total_score: i64,
    pub total_response_time_ms: i64,
    pub joined_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

/// Per-segment score accumulator, unique on `(segment_id, participant_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentScore {
    pub segment_id: SegmentId,
    pub participant_id: ParticipantId,
    pub score: i64,
    pub questions_answered: u32,
    pub questions_correct: u32,
    pub total_response_time_ms: i64,
}

/// Transient audit record for a single join attempt, used for race debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinAttempt {
    pub event_id: EventId,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JoinAttemptStatus,
}

/// One row of a segment or event leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub avatar: Option<String>,
    pub score: i64,
    pub is_late_joiner: bool,
    pub total_response_time_ms: i64,
    pub is_present: bool,
}

/// The top scorer of one completed segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentWinner {
    pub segment_id: SegmentId,
    pub segment_title: String,
    pub winner_name: String,
    pub winner_score: i64,
}

/// Health status enumeration.
///
/// Represents the overall health state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Dead,
}

/// Health check response structure.
///
/// Contains server health information including status, uptime, and service states.
/// Used by the `/health` endpoint to provide structured health check data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: String,
    pub started_at: String,
    pub uptime: UptimeInfo,
    pub services: ServiceInfo,
}

/// Uptime information in both seconds and human-readable format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UptimeInfo {
    pub seconds: i64,
    pub human: String,
}

/// Service status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub events: String,
    pub active_events: usize,
}
