//! Speed-weighted scoring, grounded on `services/scoring.py`'s
//! `calculate_speed_based_score`.

/// `score = clamp(1, 1000, floor(1000 * (time_limit_ms - response_time_ms) / time_limit_ms))`.
/// A response at or past the deadline scores the floor of 1. Callers apply
/// the wrong-answer override (`score = 0`) themselves — this function only
/// knows about timing.
pub fn speed_based_score(time_limit_ms: i64, response_time_ms: i64) -> i64 {
    if response_time_ms >= time_limit_ms {
        return 1;
    }

    let remaining = time_limit_ms - response_time_ms;
    let score = (1000 * remaining) / time_limit_ms;
    score.clamp(1, 1000)
}

/// The score to apply for one admitted answer: zero if wrong, otherwise the
/// speed-weighted value (§4.7).
pub fn score_for_answer(time_limit_ms: i64, response_time_ms: i64, is_correct: bool) -> i64 {
    if !is_correct {
        return 0;
    }
    speed_based_score(time_limit_ms, response_time_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_answer_scores_maximum() {
        assert_eq!(speed_based_score(30_000, 0), 1000);
    }

    #[test]
    fn answer_at_deadline_scores_minimum() {
        assert_eq!(speed_based_score(30_000, 30_000), 1);
    }

    #[test]
    fn answer_past_deadline_scores_minimum() {
        assert_eq!(speed_based_score(30_000, 45_000), 1);
    }

    #[test]
    fn matches_the_documented_example() {
        // S1: time_limit 30s, answered at 2s -> +933.
        assert_eq!(speed_based_score(30_000, 2_000), 933);
        // S2: answered at 10s -> +666; at 3s -> +900.
        assert_eq!(speed_based_score(30_000, 10_000), 666);
        assert_eq!(speed_based_score(30_000, 3_000), 900);
    }

    #[test]
    fn wrong_answer_always_scores_zero() {
        assert_eq!(score_for_answer(30_000, 100, false), 0);
    }

    #[test]
    fn score_never_leaves_its_bounds() {
        for response_time_ms in [0, 1, 15_000, 29_999] {
            let score = speed_based_score(30_000, response_time_ms);
            assert!((1..=1000).contains(&score));
        }
    }
}
