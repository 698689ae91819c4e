//! End-to-end scenario coverage driving a real `EventSession` against the
//! in-memory repository and a manual clock, exercising flows a single
//! module's unit tests can't reach on their own.

use std::sync::Arc;

use chrono::Utc;
use relay_core::clock::ManualClock;
use relay_core::config::Config;
use relay_core::data::{
    Event, EventMode, EventStatus, JoinStatus, Participant, Question, Segment, SegmentStatus,
};
use relay_core::errors::ErrorKind;
use relay_core::id::{EventId, Id, ParticipantId, QuestionId, SegmentId, UserId};
use relay_core::protocol::{QuizPhase, ServerMessage};
use relay_hub::repository::{InMemoryRepository, Repository};
use relay_hub::session::{Broadcast, EventSession};

fn make_event(event_id: EventId) -> Event {
    Event {
        event_id,
        host_id: Id::new(),
        title: "Trivia Night".into(),
        join_code: "NIGHT1".into(),
        mode: EventMode::Normal,
        status: EventStatus::Active,
        previous_status: None,
        join_locked: false,
        join_locked_at: None,
        time_per_question: 30,
        num_fake_answers: 3,
    }
}

fn make_segment(segment_id: SegmentId, event_id: EventId, order_index: u32) -> Segment {
    Segment {
        segment_id,
        event_id,
        presenter_name: "Presenter".into(),
        presenter_user_id: None,
        title: format!("Segment {order_index}"),
        order_index,
        status: SegmentStatus::Quizzing,
        previous_status: None,
        recording_started_at: None,
        recording_paused_at: None,
        quiz_ready_at: None,
        quiz_started_at: None,
        completed_at: None,
    }
}

fn make_question(segment_id: SegmentId, order_index: u32) -> Question {
    Question {
        question_id: Id::new(),
        segment_id,
        question_text: format!("Question {order_index}"),
        correct_answer: "4".into(),
        fake_answers: vec!["3".into(), "5".into()],
        order_index,
        is_ai_generated: false,
        source_transcript: None,
    }
}

fn make_participant(event_id: EventId, name: &str) -> Participant {
    Participant {
        participant_id: Id::new(),
        user_id: Id::new(),
        event_id,
        device_fingerprint: format!("device-{name}"),
        display_name: name.into(),
        avatar: None,
        session_token: "token".into(),
        is_late_joiner: false,
        join_status: JoinStatus::Joined,
        total_score: 0,
        total_response_time_ms: 0,
        joined_at: Utc::now(),
        last_heartbeat: Utc::now(),
    }
}

fn event_leaderboard_score(entries: &[relay_core::data::LeaderboardEntry], id: ParticipantId) -> i64 {
    entries
        .iter()
        .find(|entry| entry.participant_id == id)
        .map(|entry| entry.score)
        .unwrap_or(-1)
}

/// S1 + S2: scores accumulate across two questions of the same segment,
/// zero-fill covers whoever didn't answer, and the segment/event
/// leaderboards agree on the final standing.
#[tokio::test]
async fn scenario_scores_accumulate_and_zero_fill_covers_stragglers() {
    let repo = Arc::new(InMemoryRepository::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let event_id: EventId = Id::new();
    let segment_id: SegmentId = Id::new();

    repo.save_event(make_event(event_id)).await.unwrap();
    repo.save_segment(make_segment(segment_id, event_id, 0))
        .await
        .unwrap();
    let q1 = make_question(segment_id, 0);
    let q2 = make_question(segment_id, 1);
    let (q1_id, q2_id) = (q1.question_id, q2.question_id);
    repo.save_questions(vec![q1, q2]).await.unwrap();

    let session = EventSession::new(event_id, repo.clone(), clock.clone(), Config::default());

    let a = repo.create_participant(make_participant(event_id, "A")).await.unwrap();
    let b = repo.create_participant(make_participant(event_id, "B")).await.unwrap();
    let c = repo.create_participant(make_participant(event_id, "C")).await.unwrap();
    session.join(a.participant_id, a.user_id, "A".into(), None, false).await;
    session.join(b.participant_id, b.user_id, "B".into(), None, false).await;
    session.join(c.participant_id, c.user_id, "C".into(), None, false).await;

    session.set_current_segment(segment_id, UserId::new()).await;
    session.start_game().await.unwrap();

    // Q1: A correct at 2s (+933), B wrong at 5s (+0), C never answers.
    clock.advance(chrono::Duration::seconds(2));
    session.answer(a.participant_id, q1_id, "4".into()).await.unwrap();
    clock.advance(chrono::Duration::seconds(3));
    session.answer(b.participant_id, q1_id, "3".into()).await.unwrap();
    session.reveal_answer().await.unwrap();

    let board_after_q1 = repo.get_event_leaderboard(event_id).await.unwrap();
    assert_eq!(event_leaderboard_score(&board_after_q1, a.participant_id), 933);
    assert_eq!(event_leaderboard_score(&board_after_q1, b.participant_id), 0);
    assert_eq!(event_leaderboard_score(&board_after_q1, c.participant_id), 0);

    session.next_question().await.unwrap();

    // Q2: A correct at 10s (+666), C correct at 3s (+900), B never answers.
    clock.advance(chrono::Duration::seconds(3));
    session.answer(c.participant_id, q2_id, "4".into()).await.unwrap();
    clock.advance(chrono::Duration::seconds(7));
    session.answer(a.participant_id, q2_id, "4".into()).await.unwrap();

    let broadcasts = session.end_game().await.unwrap();
    let board_after_q2 = repo.get_event_leaderboard(event_id).await.unwrap();
    assert_eq!(event_leaderboard_score(&board_after_q2, a.participant_id), 1599);
    assert_eq!(event_leaderboard_score(&board_after_q2, c.participant_id), 900);
    assert_eq!(event_leaderboard_score(&board_after_q2, b.participant_id), 0);

    let winner_is_a = broadcasts.iter().any(|broadcast| {
        matches!(
            broadcast,
            Broadcast::ToAll(ServerMessage::SegmentComplete { segment_winner: Some(winner), .. })
                if winner.winner_name == "A"
        )
    });
    assert!(winner_is_a, "segment winner should be A, the event leader");
}

/// S3: once every segment in a multi-segment event is completed, the
/// projector offers a mega-quiz rather than finalizing, since questions
/// remain available to replay.
#[tokio::test]
async fn scenario_completed_multi_segment_event_offers_mega_quiz() {
    let repo = Arc::new(InMemoryRepository::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let event_id: EventId = Id::new();
    let seg1: SegmentId = Id::new();
    let seg2: SegmentId = Id::new();

    repo.save_event(make_event(event_id)).await.unwrap();
    repo.save_segment(make_segment(seg1, event_id, 0)).await.unwrap();
    repo.save_segment(make_segment(seg2, event_id, 1)).await.unwrap();
    repo.save_questions(vec![
        make_question(seg1, 0),
        make_question(seg1, 1),
        make_question(seg1, 2),
    ])
    .await
    .unwrap();
    let seg2_questions: Vec<Question> = (0u32..3).map(|i| make_question(seg2, i)).collect();
    let seg2_question_ids: Vec<QuestionId> =
        seg2_questions.iter().map(|q| q.question_id).collect();
    repo.save_questions(seg2_questions).await.unwrap();

    repo.set_segment_status(seg1, SegmentStatus::Completed)
        .await
        .unwrap();

    let session = EventSession::new(event_id, repo.clone(), clock.clone(), Config::default());
    let participant = repo
        .create_participant(make_participant(event_id, "A"))
        .await
        .unwrap();
    session.join(participant.participant_id, participant.user_id, "A".into(), None, false).await;

    session.set_current_segment(seg2, UserId::new()).await;
    session.start_game().await.unwrap();

    session.answer(participant.participant_id, seg2_question_ids[0], "4".into()).await.unwrap();
    session.next_question().await.unwrap();
    session.answer(participant.participant_id, seg2_question_ids[1], "4".into()).await.unwrap();
    session.next_question().await.unwrap();
    session.answer(participant.participant_id, seg2_question_ids[2], "4".into()).await.unwrap();
    let broadcasts = session.next_question().await.unwrap();

    let ready = broadcasts.iter().find_map(|broadcast| match broadcast {
        Broadcast::ToAll(ServerMessage::MegaQuizReady {
            available_questions,
            is_single_segment,
            single_segment_mode,
            ..
        }) => Some((*available_questions, *is_single_segment, *single_segment_mode)),
        _ => None,
    });

    let (available_questions, is_single_segment, single_segment_mode) =
        ready.expect("completing the last segment should offer a mega-quiz");
    assert_eq!(available_questions, 6);
    assert!(!is_single_segment);
    assert_eq!(single_segment_mode, None);
}

/// Regression coverage for a zero-fill gap across a segment boundary:
/// completing segment 1 through real session calls must not block zero-fill
/// for stragglers in segment 2, for any participant who was present when
/// segment 1 completed.
#[tokio::test]
async fn scenario_zero_fill_still_applies_after_a_segment_completes() {
    let repo = Arc::new(InMemoryRepository::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let event_id: EventId = Id::new();
    let seg1: SegmentId = Id::new();
    let seg2: SegmentId = Id::new();

    repo.save_event(make_event(event_id)).await.unwrap();
    repo.save_segment(make_segment(seg1, event_id, 0)).await.unwrap();
    repo.save_segment(make_segment(seg2, event_id, 1)).await.unwrap();

    let seg1_questions: Vec<Question> = (0u32..2).map(|i| make_question(seg1, i)).collect();
    let seg1_question_ids: Vec<QuestionId> = seg1_questions.iter().map(|q| q.question_id).collect();
    repo.save_questions(seg1_questions).await.unwrap();

    let seg2_questions: Vec<Question> = (0u32..2).map(|i| make_question(seg2, i)).collect();
    let seg2_question_ids: Vec<QuestionId> = seg2_questions.iter().map(|q| q.question_id).collect();
    repo.save_questions(seg2_questions).await.unwrap();

    let session = EventSession::new(event_id, repo.clone(), clock.clone(), Config::default());

    let a = repo.create_participant(make_participant(event_id, "A")).await.unwrap();
    let b = repo.create_participant(make_participant(event_id, "B")).await.unwrap();
    session.join(a.participant_id, a.user_id, "A".into(), None, false).await;
    session.join(b.participant_id, b.user_id, "B".into(), None, false).await;

    // Segment 1 completes entirely through the session: A answers every
    // question, B never does and is zero-filled.
    session.set_current_segment(seg1, UserId::new()).await;
    session.start_game().await.unwrap();
    session.answer(a.participant_id, seg1_question_ids[0], "4".into()).await.unwrap();
    session.next_question().await.unwrap();
    session.answer(a.participant_id, seg1_question_ids[1], "4".into()).await.unwrap();
    session.next_question().await.unwrap();

    let seg1_board = repo.get_segment_leaderboard(seg1).await.unwrap();
    assert!(
        seg1_board.iter().any(|entry| entry.participant_id == b.participant_id),
        "B should have been zero-filled in segment 1"
    );
    let segment1 = repo.get_segment(seg1).await.unwrap().unwrap();
    assert_eq!(segment1.status, SegmentStatus::Completed);

    // Segment 2: B answers the opening question, A doesn't this time. A
    // having finished segment 1 must not exempt them from zero-fill here.
    session.set_current_segment(seg2, UserId::new()).await;
    session.start_game().await.unwrap();
    session.answer(b.participant_id, seg2_question_ids[0], "4".into()).await.unwrap();
    session.next_question().await.unwrap();

    let seg2_board = repo.get_segment_leaderboard(seg2).await.unwrap();
    let a_entry = seg2_board
        .iter()
        .find(|entry| entry.participant_id == a.participant_id);
    assert!(
        a_entry.is_some(),
        "a participant present at the last segment's completion must still be zero-fillable in the next one"
    );
    assert_eq!(a_entry.unwrap().score, 0);
}

/// S5: a participant who reconnects within the window keeps their score
/// and answer, and is not treated as a late joiner.
#[tokio::test]
async fn scenario_reconnect_within_window_restores_state() {
    let repo = Arc::new(InMemoryRepository::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let event_id: EventId = Id::new();
    let segment_id: SegmentId = Id::new();

    repo.save_event(make_event(event_id)).await.unwrap();
    repo.save_segment(make_segment(segment_id, event_id, 0)).await.unwrap();
    let question = make_question(segment_id, 0);
    let question_id = question.question_id;
    repo.save_questions(vec![question]).await.unwrap();

    let session = EventSession::new(event_id, repo.clone(), clock.clone(), Config::default());
    let p = repo.create_participant(make_participant(event_id, "P")).await.unwrap();
    session.join(p.participant_id, p.user_id, "P".into(), None, false).await;
    session.set_current_segment(segment_id, UserId::new()).await;
    session.start_game().await.unwrap();

    clock.advance(chrono::Duration::seconds(2));
    session.answer(p.participant_id, question_id, "4".into()).await.unwrap();

    clock.advance(chrono::Duration::seconds(1));
    session.mark_offline(p.participant_id).await;

    clock.advance(chrono::Duration::seconds(7));
    assert!(session.reconnect_eligible(p.participant_id).await);

    session.mark_online(p.participant_id).await;
    let restored = session
        .state_restored(p.participant_id)
        .await
        .expect("reconnecting participant should get a state_restored frame");

    match restored {
        ServerMessage::StateRestored {
            your_score,
            your_answer,
            participants,
            ..
        } => {
            assert_eq!(your_score, 933);
            assert_eq!(your_answer, Some("4".to_string()));
            let wire = participants
                .iter()
                .find(|participant| participant.user_id == p.participant_id)
                .unwrap();
            assert!(!wire.is_late_joiner);
        }
        other => panic!("expected StateRestored, got {other:?}"),
    }
}

/// S6: the presenter dropping pauses the segment and blocks every answer;
/// the presenter reconnecting resumes it without resetting progress.
#[tokio::test]
async fn scenario_presenter_disconnect_pauses_and_reconnect_resumes() {
    let repo = Arc::new(InMemoryRepository::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let event_id: EventId = Id::new();
    let segment_id: SegmentId = Id::new();

    repo.save_event(make_event(event_id)).await.unwrap();
    repo.save_segment(make_segment(segment_id, event_id, 0)).await.unwrap();
    let question = make_question(segment_id, 0);
    let question_id = question.question_id;
    repo.save_questions(vec![question]).await.unwrap();

    let session = EventSession::new(event_id, repo.clone(), clock.clone(), Config::default());

    let presenter = repo
        .create_participant(make_participant(event_id, "Presenter"))
        .await
        .unwrap();
    let presenter_user_id = presenter.user_id;
    let presenter_participant_id = presenter.participant_id;
    session
        .join(presenter_participant_id, presenter_user_id, "Presenter".into(), None, false)
        .await;

    let mut others = Vec::new();
    for name in ["A", "B", "C", "D"] {
        let participant = repo.create_participant(make_participant(event_id, name)).await.unwrap();
        session.join(participant.participant_id, participant.user_id, name.into(), None, false).await;
        others.push(participant);
    }

    session.set_current_segment(segment_id, presenter_user_id).await;
    session.start_game().await.unwrap();
    assert_eq!(session.current_phase().await, QuizPhase::ShowingQuestion);

    let pause_broadcasts = session.mark_offline(presenter_participant_id).await;
    let paused = pause_broadcasts.iter().any(|broadcast| {
        matches!(
            broadcast,
            Broadcast::ToAll(ServerMessage::PresenterPaused { reason: Some(reason), .. })
                if reason == "presenter_disconnected"
        )
    });
    assert!(paused, "presenter disconnect should pause with the right reason");
    assert_eq!(session.current_phase().await, QuizPhase::PresenterPaused);

    let err = session
        .answer(others[0].participant_id, question_id, "4".into())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Paused);

    session.mark_online(presenter_participant_id).await;
    assert_eq!(session.current_phase().await, QuizPhase::ShowingQuestion);

    // The pause lifted; a fresh answer is admitted again.
    session
        .answer(others[1].participant_id, question_id, "4".into())
        .await
        .unwrap();
}

/// U11: once every segment is complete and no questions remain to replay,
/// the projector finalizes the event and names the top scorer the winner.
#[tokio::test]
async fn scenario_completion_with_no_remaining_questions_finalizes_event() {
    let repo = Arc::new(InMemoryRepository::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let event_id: EventId = Id::new();
    let segment_id: SegmentId = Id::new();

    repo.save_event(make_event(event_id)).await.unwrap();
    repo.save_segment(make_segment(segment_id, event_id, 0)).await.unwrap();

    let x = repo.create_participant(make_participant(event_id, "X")).await.unwrap();
    let y = repo.create_participant(make_participant(event_id, "Y")).await.unwrap();
    repo.upsert_segment_score(segment_id, x.participant_id, 500, true, 2_000)
        .await
        .unwrap();
    repo.upsert_segment_score(segment_id, y.participant_id, 300, true, 4_000)
        .await
        .unwrap();

    let session = EventSession::new(event_id, repo.clone(), clock.clone(), Config::default());
    session.set_current_segment(segment_id, UserId::new()).await;

    let broadcasts = session.end_game().await.unwrap();

    let winner = broadcasts.iter().find_map(|broadcast| match broadcast {
        Broadcast::ToAll(ServerMessage::EventComplete { winner, .. }) => winner.clone(),
        _ => None,
    });
    let winner = winner.expect("event should finalize once no questions remain");
    assert_eq!(winner.participant_id, x.participant_id);
    assert_eq!(winner.score, 500);

    let event = repo.get_event(event_id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Finished);
}
