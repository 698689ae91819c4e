//! Runtime configuration, loaded from environment variables with sensible
//! defaults. Every field can be overridden by setting `RELAY_<FIELD_UPPER>`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::SingleSegmentMode;

/// Tunables for the hub's timing, concurrency, and eviction behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default time allotted to answer one question, in seconds.
    pub time_per_question_s: u32,
    /// Extra time an answer is still accepted after the nominal deadline,
    /// to absorb network jitter between server deadline and client submit.
    pub answer_timeout_grace_ms: u64,
    /// Interval between server pings on an idle connection.
    pub heartbeat_interval_s: u32,
    /// How long a connection may go without a pong before it's considered dead.
    pub grace_period_s: u32,
    /// Window after a disconnect during which a reconnecting device resumes
    /// its existing participant row instead of being treated as a new join.
    pub reconnect_window_s: u32,
    /// Capacity of each connection's outbound mpsc channel.
    pub outbound_queue_capacity: usize,
    /// How long a Join Gate lock may be held before it's force-released.
    pub join_lock_grace_s: u32,
    /// Minimum gap between accepting a resume_segment message for the same
    /// event, collapsing accidental double-clicks from a presenter.
    pub event_resume_debounce_s: u32,
    /// Same debounce, scoped to a single segment.
    pub segment_resume_debounce_s: u32,
    /// How often the hub sweeps for idle sessions to evict.
    pub idle_sweep_interval_s: u32,
    /// How long an `event_complete` session sits idle before eviction.
    pub event_complete_eviction_s: u32,
    /// Which branch the mega-quiz projector offers for a single-segment
    /// event: remix the lone segment into a mega-quiz, or go straight to
    /// `event_complete`.
    pub mega_quiz_single_segment_mode: SingleSegmentMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_per_question_s: 30,
            answer_timeout_grace_ms: 500,
            heartbeat_interval_s: 15,
            grace_period_s: 30,
            reconnect_window_s: 60,
            outbound_queue_capacity: 64,
            join_lock_grace_s: 5,
            event_resume_debounce_s: 2,
            segment_resume_debounce_s: 2,
            idle_sweep_interval_s: 60,
            event_complete_eviction_s: 300,
            mega_quiz_single_segment_mode: SingleSegmentMode::Remix,
        }
    }
}

impl Config {
    /// Builds a `Config` from defaults overridden by `RELAY_*` environment
    /// variables, mirroring the shape of each field name uppercased.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        macro_rules! override_from_env {
            ($field:ident, $env_name:literal) => {
                if let Ok(raw) = std::env::var($env_name) {
                    match raw.parse() {
                        Ok(value) => config.$field = value,
                        Err(_) => tracing::warn!(
                            var = $env_name,
                            value = raw,
                            "ignoring unparseable config override"
                        ),
                    }
                }
            };
        }

        override_from_env!(time_per_question_s, "RELAY_TIME_PER_QUESTION_S");
        override_from_env!(answer_timeout_grace_ms, "RELAY_ANSWER_TIMEOUT_GRACE_MS");
        override_from_env!(heartbeat_interval_s, "RELAY_HEARTBEAT_INTERVAL_S");
        override_from_env!(grace_period_s, "RELAY_GRACE_PERIOD_S");
        override_from_env!(reconnect_window_s, "RELAY_RECONNECT_WINDOW_S");
        override_from_env!(outbound_queue_capacity, "RELAY_OUTBOUND_QUEUE_CAPACITY");
        override_from_env!(join_lock_grace_s, "RELAY_JOIN_LOCK_GRACE_S");
        override_from_env!(event_resume_debounce_s, "RELAY_EVENT_RESUME_DEBOUNCE_S");
        override_from_env!(segment_resume_debounce_s, "RELAY_SEGMENT_RESUME_DEBOUNCE_S");
        override_from_env!(idle_sweep_interval_s, "RELAY_IDLE_SWEEP_INTERVAL_S");
        override_from_env!(event_complete_eviction_s, "RELAY_EVENT_COMPLETE_EVICTION_S");

        if let Ok(raw) = std::env::var("RELAY_MEGA_QUIZ_SINGLE_SEGMENT_MODE") {
            match raw.as_str() {
                "remix" => config.mega_quiz_single_segment_mode = SingleSegmentMode::Remix,
                "skip" => config.mega_quiz_single_segment_mode = SingleSegmentMode::Skip,
                _ => tracing::warn!(
                    value = raw,
                    "ignoring unrecognized RELAY_MEGA_QUIZ_SINGLE_SEGMENT_MODE override"
                ),
            }
        }

        config
    }

    pub fn answer_timeout_grace(&self) -> Duration {
        Duration::from_millis(self.answer_timeout_grace_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_s as u64)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_s as u64)
    }

    pub fn reconnect_window(&self) -> Duration {
        Duration::from_secs(self.reconnect_window_s as u64)
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval_s as u64)
    }

    pub fn event_complete_eviction(&self) -> Duration {
        Duration::from_secs(self.event_complete_eviction_s as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.time_per_question_s, 30);
        assert_eq!(config.answer_timeout_grace_ms, 500);
        assert_eq!(config.heartbeat_interval_s, 15);
        assert_eq!(config.outbound_queue_capacity, 64);
    }

    #[test]
    fn env_override_parses_and_applies() {
        unsafe {
            std::env::set_var("RELAY_TIME_PER_QUESTION_S", "45");
        }
        let config = Config::from_env();
        assert_eq!(config.time_per_question_s, 45);
        unsafe {
            std::env::remove_var("RELAY_TIME_PER_QUESTION_S");
        }
    }

    #[test]
    fn unparseable_override_is_ignored() {
        unsafe {
            std::env::set_var("RELAY_HEARTBEAT_INTERVAL_S", "not-a-number");
        }
        let config = Config::from_env();
        assert_eq!(config.heartbeat_interval_s, 15);
        unsafe {
            std::env::remove_var("RELAY_HEARTBEAT_INTERVAL_S");
        }
    }
}
