//! Engine integration tests
//!
//! Timer-driven tests run on a paused clock so deadlines fire exactly when the
//! test sleeps past them.

use pledge_core::{EngineError, GroupId, ParticipantId, QueueKey, Status, VariantRegistry};
use pledge_engine::{Audience, Engine, Outbound, Ports, Recorder, Timing};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn engine_with(timing: Timing) -> (Arc<Engine>, Arc<Recorder>) {
    let recorder = Recorder::new();
    let engine = Engine::new(
        Arc::new(VariantRegistry::builtin()),
        timing,
        Some(11),
        Ports::recording(recorder.clone()),
    );
    (engine, recorder)
}

fn engine() -> (Arc<Engine>, Arc<Recorder>) {
    engine_with(Timing::default())
}

fn win_as_much() -> QueueKey {
    QueueKey::new("win-as-much", "CLASS1")
}

fn pid(i: usize) -> ParticipantId {
    ParticipantId::from(format!("student-{}", i))
}

/// Open the queue and fill one group
fn form_group(engine: &Engine, key: &QueueKey, offset: usize) -> (GroupId, Vec<ParticipantId>) {
    engine.open_queue(key).unwrap();
    let size = engine.registry().get(&key.variant).unwrap().member_count();
    let mut formed = Vec::new();
    for i in 0..size {
        formed.extend(engine.join(key, pid(offset + i)).unwrap().formed);
    }
    assert_eq!(formed.len(), 1);
    let group = formed[0];
    let members = engine.snapshot(group).unwrap().members;
    (group, members)
}

fn play_round(engine: &Engine, group: GroupId, members: &[ParticipantId], symbols: &[&str]) {
    let round = engine.snapshot(group).unwrap().current_round;
    for (member, symbol) in members.iter().zip(symbols) {
        engine.submit_move(group, member, round, symbol).unwrap();
    }
}

// ============================================================================
// FULL GAMES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_all_contribute_reaches_group_benchmark() {
    let (engine, recorder) = engine();
    let (group, members) = form_group(&engine, &win_as_much(), 0);

    for _ in 0..8 {
        play_round(&engine, group, &members, &["Contribute"; 4]);
    }

    let snapshot = engine.snapshot(group).unwrap();
    assert_eq!(snapshot.status, Status::Complete);
    assert_eq!(snapshot.rounds_resolved, 8);
    for score in &snapshot.scores {
        assert_eq!(score.total, 19);
    }
    assert_eq!(snapshot.scores.iter().map(|s| s.total).sum::<i64>(), 76);

    assert_eq!(recorder.results().len(), 8);
    assert_eq!(recorder.stored_results().len(), 8);
    assert_eq!(recorder.completed().len(), 1);
    assert!(!engine.scheduler().is_armed(group));
    assert_eq!(engine.group_of(&members[0]), None);
}

#[tokio::test(start_paused = true)]
async fn test_single_defection_lands_between_benchmarks() {
    let (engine, _) = engine();
    let (group, members) = form_group(&engine, &win_as_much(), 0);

    for round in 1..=8 {
        if round == 3 {
            play_round(
                &engine,
                group,
                &members,
                &["Contribute", "Contribute", "Protect", "Contribute"],
            );
        } else {
            play_round(&engine, group, &members, &["Contribute"; 4]);
        }
    }

    let total: i64 = engine
        .snapshot(group)
        .unwrap()
        .scores
        .iter()
        .map(|s| s.total)
        .sum();
    assert_eq!(total, 72);
    assert!(total < 76 && total > -76);
}

#[tokio::test(start_paused = true)]
async fn test_group_complete_sent_to_members_and_dashboard() {
    let (engine, recorder) = engine();
    let (group, members) = form_group(&engine, &win_as_much(), 0);
    for _ in 0..8 {
        play_round(&engine, group, &members, &["Protect"; 4]);
    }

    let to_members = recorder.events_for(&Audience::Members(members.clone()), "groupComplete");
    let to_dashboard = recorder.events_for(&Audience::Dashboard, "groupComplete");
    assert_eq!(to_members.len(), 1);
    assert_eq!(to_dashboard.len(), 1);
    match &to_dashboard[0] {
        Outbound::GroupComplete { final_scores, .. } => {
            assert!(final_scores.iter().all(|s| s.total == -19));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

// ============================================================================
// DEADLINES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_deadline_submits_default_for_silent_members() {
    let (engine, recorder) = engine();
    let (group, members) = form_group(&engine, &win_as_much(), 0);

    for member in &members[..3] {
        engine.submit_move(group, member, 1, "Contribute").unwrap();
    }
    tokio::time::sleep(Duration::from_secs(31)).await;

    let results = engine.results(group).unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.count_of("Protect"), 1);
    assert_eq!(result.auto_moves(), 1);
    let silent = result
        .per_member
        .iter()
        .find(|line| line.participant_id == members[3])
        .unwrap();
    assert!(silent.is_auto);
    assert_eq!(silent.delta, 3);
    assert_eq!(engine.snapshot(group).unwrap().current_round, 2);

    // next deadline includes the result display pause
    tokio::time::sleep(Duration::from_secs(33)).await;
    assert_eq!(engine.results(group).unwrap().len(), 1);
    tokio::time::sleep(Duration::from_secs(2)).await;
    let results = engine.results(group).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].count_of("Protect"), 4);
    assert_eq!(results[1].auto_moves(), 4);
    assert_eq!(recorder.results().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_silent_group_plays_out_on_defaults() {
    let (engine, recorder) = engine();
    let (group, _) = form_group(&engine, &QueueKey::new("stag-hunt", "QUIET"), 0);

    tokio::time::sleep(Duration::from_secs(6 * 36)).await;

    let snapshot = engine.snapshot(group).unwrap();
    assert_eq!(snapshot.status, Status::Complete);
    // everyone hunts hare: +1 a round, x2 on the last
    assert!(snapshot.scores.iter().all(|s| s.total == 7));
    assert_eq!(recorder.completed().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_final_move_beats_deadline_exactly_once() {
    let (engine, recorder) = engine();
    let (group, members) = form_group(&engine, &win_as_much(), 0);

    for member in &members[..3] {
        engine.submit_move(group, member, 1, "Contribute").unwrap();
    }
    tokio::time::sleep(Duration::from_millis(29_999)).await;
    let outcome = engine.submit_move(group, &members[3], 1, "Contribute").unwrap();
    assert!(outcome.resolved.is_some());

    // the old deadline passes without a second resolution
    tokio::time::sleep(Duration::from_secs(2)).await;
    let dashboard = recorder.events_for(&Audience::Dashboard, "roundResolved");
    assert_eq!(dashboard.len(), 1);
    assert_eq!(engine.results(group).unwrap()[0].auto_moves(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_move_and_deadline_race_resolves_each_round_once() {
    let timing = Timing {
        round_deadline_ms: 1,
        result_display_ms: 0,
        ..Timing::fast()
    };
    let (engine, recorder) = engine_with(timing);
    let key = win_as_much();
    engine.open_queue(&key).unwrap();

    let mut groups = Vec::new();
    for i in 0..40 {
        groups.extend(engine.join(&key, pid(i)).unwrap().formed);
    }
    assert_eq!(groups.len(), 10);

    let mut tasks = Vec::new();
    for &group in &groups {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            let members = engine.snapshot(group).unwrap().members;
            for member in &members {
                let round = engine.snapshot(group).unwrap().current_round;
                match engine.submit_move(group, member, round, "Contribute") {
                    Ok(_) => {}
                    Err(err) => assert!(err.is_protocol(), "unexpected error {}", err),
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // let the remaining rounds run out on their 1ms deadlines
    for _ in 0..200 {
        if engine.counts().active == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(engine.counts().complete, 10);

    let results = recorder.results();
    for &group in &groups {
        let rounds: Vec<u32> = results
            .iter()
            .filter(|r| r.group_id == group)
            .map(|r| r.round)
            .collect();
        assert_eq!(rounds, (1..=8).collect::<Vec<_>>());
    }
    assert_eq!(recorder.completed().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_stale_timeout_is_ignored() {
    let (engine, _) = engine();
    let (group, _) = form_group(&engine, &win_as_much(), 0);
    engine.handle_timeout(group, 5);
    engine.handle_timeout(GroupId(404), 1);
    assert_eq!(engine.snapshot(group).unwrap().current_round, 1);
    assert!(engine.results(group).unwrap().is_empty());
}

// ============================================================================
// PROTOCOL ERRORS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_resolve_is_idempotent() {
    let (engine, recorder) = engine();
    let (group, members) = form_group(&engine, &win_as_much(), 0);

    assert!(matches!(
        engine.resolve_round(group, 1),
        Err(EngineError::RoundIncomplete { received: 0, .. })
    ));
    play_round(&engine, group, &members, &["Contribute"; 4]);

    let before = engine.snapshot(group).unwrap();
    let err = engine.resolve_round(group, 1).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyResolved { round: 1, .. }));
    assert!(err.is_protocol());
    assert_eq!(engine.snapshot(group).unwrap(), before);
    assert_eq!(recorder.results().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_move_is_rejected() {
    let (engine, _) = engine();
    let (group, members) = form_group(&engine, &win_as_much(), 0);
    play_round(&engine, group, &members, &["Contribute"; 4]);

    assert!(matches!(
        engine.submit_move(group, &members[0], 1, "Protect"),
        Err(EngineError::RoundMismatch { expected: 2, got: 1 })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_resubmission_keeps_first_move() {
    let (engine, _) = engine();
    let (group, members) = form_group(&engine, &win_as_much(), 0);
    engine.submit_move(group, &members[0], 1, "Contribute").unwrap();
    assert!(matches!(
        engine.submit_move(group, &members[0], 1, "Protect"),
        Err(EngineError::AlreadySubmitted { .. })
    ));
    assert!(matches!(
        engine.submit_move(group, &members[1], 1, "Defect"),
        Err(EngineError::UnknownChoice(_))
    ));
    assert!(matches!(
        engine.submit_move(group, &pid(99), 1, "Contribute"),
        Err(EngineError::NotAMember { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_abandon_rejects_everything_after() {
    let (engine, recorder) = engine();
    let (group, members) = form_group(&engine, &win_as_much(), 0);

    engine.abandon(group, "member disconnected").unwrap();
    assert!(!engine.scheduler().is_armed(group));
    assert!(matches!(
        engine.submit_move(group, &members[0], 1, "Contribute"),
        Err(EngineError::NotActive(_))
    ));
    assert!(matches!(
        engine.abandon(group, "again"),
        Err(EngineError::NotActive(_))
    ));

    // the deadline never fires
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(engine.results(group).unwrap().is_empty());

    let snapshot = engine.snapshot(group).unwrap();
    assert_eq!(snapshot.status, Status::Abandoned);
    assert_eq!(snapshot.abandon_reason.as_deref(), Some("member disconnected"));
    assert_eq!(recorder.abandoned().len(), 1);
    assert_eq!(
        recorder
            .events_for(&Audience::Members(members.clone()), "groupAbandoned")
            .len(),
        1
    );

    // members are free to queue again
    assert_eq!(engine.group_of(&members[0]), None);
    assert_eq!(engine.join(&win_as_much(), members[0].clone()).unwrap().queue_size, 1);
}

// ============================================================================
// MATCHMAKING AND PRIVACY
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_matchmaking_never_duplicates_or_drops() {
    let (engine, _) = engine();
    let key = win_as_much();
    engine.open_queue(&key).unwrap();

    let mut groups = Vec::new();
    for i in 0..23 {
        groups.extend(engine.join(&key, pid(i)).unwrap().formed);
    }
    assert_eq!(groups.len(), 5);
    assert_eq!(engine.queue_size(&key), 3);

    let mut seen = HashSet::new();
    for &group in &groups {
        for member in engine.snapshot(group).unwrap().members {
            assert!(seen.insert(member.clone()));
            assert_eq!(engine.group_of(&member), Some(group));
        }
    }
    for i in 0..23 {
        let matched = seen.contains(&pid(i));
        let waiting = engine.queue_of(&pid(i)).is_some();
        assert!(matched != waiting);
    }
}

#[tokio::test(start_paused = true)]
async fn test_round_results_never_pair_members_with_choices() {
    let (engine, recorder) = engine();
    let (group, members) = form_group(&engine, &win_as_much(), 0);
    play_round(
        &engine,
        group,
        &members,
        &["Protect", "Contribute", "Contribute", "Contribute"],
    );

    for member in &members {
        let events = recorder.events_for(&Audience::Participant(member.clone()), "roundResolved");
        assert_eq!(events.len(), 1);
        match &events[0] {
            Outbound::RoundResolved { result, .. } => {
                assert_eq!(result.per_member.len(), 1);
                assert_eq!(&result.per_member[0].participant_id, member);
                assert_eq!(result.count_of("Protect"), 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    match &recorder.events_for(&Audience::Dashboard, "roundResolved")[0] {
        Outbound::RoundResolved { result, .. } => {
            // the dashboard learns counts, never who chose what
            assert!(result.per_member.is_empty());
            assert_eq!(result.count_of("Protect"), 1);
            assert_eq!(result.count_of("Contribute"), 3);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_leave_and_expire_queue() {
    let (engine, _) = engine_with(Timing::fast());
    let key = win_as_much();
    engine.open_queue(&key).unwrap();
    engine.join(&key, pid(0)).unwrap();
    engine.join(&key, pid(1)).unwrap();

    assert_eq!(engine.leave_queue(&pid(0)), Some(key.clone()));
    assert_eq!(engine.leave_queue(&pid(0)), None);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(engine.expire_queues(), 1);
    assert_eq!(engine.queue_size(&key), 0);
}
