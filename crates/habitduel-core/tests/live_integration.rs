//! Live timer flow through the endpoint: coordinator, registry, storage,
//! and the challenge broadcast channel together.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use habitduel_core::storage::{Database, NewChallenge, ProgressStore};
use habitduel_core::{
    Challenge, ChallengeMode, CoreError, LiveAction, LiveEndpoint, LiveRequest, ManualClock,
    Principal, ProgressStateMachine, RealtimeBroadcaster, SessionRegistry, SignalStatus,
    TargetReached, TimerCoordinator, WeeklyStatus,
};
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    db: Arc<Database>,
    clock: Arc<ManualClock>,
    coordinator: Arc<TimerCoordinator>,
    endpoint: LiveEndpoint,
    challenge: Challenge,
}

const HOST: i64 = 1;
const OPPONENT: i64 = 2;

fn harness() -> Harness {
    let db = Arc::new(Database::open_memory().unwrap());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap(),
    ));
    let challenge = db
        .create_challenge(&NewChallenge {
            mode: ChallengeMode::Vs,
            started_at: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            duration_weeks: 4,
            host_id: HOST,
            member_id: Some(OPPONENT),
            target_time_seconds: 200,
        })
        .unwrap();

    let coordinator = Arc::new(TimerCoordinator::new(
        db.clone(),
        Arc::new(SessionRegistry::new(clock.clone())),
        Arc::new(ProgressStateMachine::new(Box::new(TargetReached))),
        clock.clone(),
    ));
    let endpoint = LiveEndpoint::new(coordinator.clone(), Arc::new(RealtimeBroadcaster::new(16)));

    Harness {
        db,
        clock,
        coordinator,
        endpoint,
        challenge,
    }
}

fn act(h: &Harness, user_id: i64, action: LiveAction) -> Result<habitduel_core::TimerMessage, CoreError> {
    h.endpoint
        .handle(h.challenge.id, Principal { user_id }, LiveRequest { action })
}

// ============================================================================
// Broadcast flow
// ============================================================================

#[tokio::test]
async fn test_opponent_sees_on_then_off_with_week_total() {
    let h = harness();
    let mut rx = h.endpoint.broadcaster().subscribe(h.challenge.id);

    act(&h, HOST, LiveAction::Start).unwrap();
    h.clock.advance(Duration::seconds(120));
    act(&h, HOST, LiveAction::Stop).unwrap();

    let on = rx.recv().await.unwrap();
    assert_eq!(on.status, SignalStatus::On);
    assert_eq!(on.sender_id, HOST);
    assert!(on.started_at.is_some());

    let off = rx.recv().await.unwrap();
    assert_eq!(off.status, SignalStatus::Off);
    assert_eq!(off.accumulated_time, Some(120));
}

#[tokio::test]
async fn test_two_sessions_accumulate_and_seal_success() {
    let h = harness();

    act(&h, HOST, LiveAction::Start).unwrap();
    h.clock.advance(Duration::seconds(100));
    act(&h, HOST, LiveAction::Stop).unwrap();

    act(&h, HOST, LiveAction::Start).unwrap();
    h.clock.advance(Duration::seconds(150));
    let off = act(&h, HOST, LiveAction::Stop).unwrap();
    assert_eq!(off.accumulated_time, Some(250));

    // 2026-01-15 is week 3 of a challenge started 2026-01-01.
    let week = h.db.find_progress(h.challenge.id, HOST, 3).unwrap().unwrap();
    assert_eq!(week.elapsed_time_seconds, 250);
    assert_eq!(week.weekly_status, WeeklyStatus::Success);
    assert!(week.is_complete);

    // A sealed week refuses new sessions.
    let rejected = act(&h, HOST, LiveAction::Start).unwrap();
    assert_eq!(rejected.status, SignalStatus::Error);
}

#[tokio::test]
async fn test_state_conflicts_become_error_broadcasts() {
    let h = harness();
    let mut rx = h.endpoint.broadcaster().subscribe(h.challenge.id);

    let msg = act(&h, OPPONENT, LiveAction::Stop).unwrap();
    assert_eq!(msg.status, SignalStatus::Error);

    act(&h, OPPONENT, LiveAction::Start).unwrap();
    let msg = act(&h, OPPONENT, LiveAction::Start).unwrap();
    assert_eq!(msg.status, SignalStatus::Error);

    let statuses: Vec<_> = (0..3).map(|_| rx.try_recv().unwrap().status).collect();
    assert_eq!(
        statuses,
        vec![SignalStatus::Error, SignalStatus::On, SignalStatus::Error]
    );
    // The first session is still running.
    assert!(h.coordinator.registry().is_running(h.challenge.id, OPPONENT));
}

#[tokio::test]
async fn test_malformed_payload_is_broadcast_as_error() {
    let h = harness();
    let mut rx = h.endpoint.broadcaster().subscribe(h.challenge.id);

    let msg = h
        .endpoint
        .handle_raw(h.challenge.id, Principal { user_id: HOST }, r#"{"action":"PAUSE"}"#)
        .unwrap();
    assert_eq!(msg.status, SignalStatus::Error);
    assert_eq!(rx.recv().await.unwrap().status, SignalStatus::Error);
    assert!(!h.coordinator.registry().is_running(h.challenge.id, HOST));
}

#[tokio::test]
async fn test_non_member_is_rejected_without_broadcast() {
    let h = harness();
    let mut rx = h.endpoint.broadcaster().subscribe(h.challenge.id);

    let err = act(&h, 99, LiveAction::Start).unwrap_err();
    assert!(matches!(err, CoreError::Authorization { user_id: 99, .. }));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_channel_is_dropped_once_viewers_leave() {
    let h = harness();
    let broadcaster = h.endpoint.broadcaster();
    let mut rx = broadcaster.subscribe(h.challenge.id);

    act(&h, HOST, LiveAction::Start).unwrap();
    assert_eq!(rx.recv().await.unwrap().status, SignalStatus::On);
    assert_eq!(broadcaster.channel_count(), 1);

    drop(rx);
    h.clock.advance(Duration::seconds(10));
    let off = act(&h, HOST, LiveAction::Stop).unwrap();
    assert_eq!(off.accumulated_time, Some(10));
    assert_eq!(broadcaster.channel_count(), 0);

    // Timer state is unaffected; a returning viewer subscribes afresh.
    let mut rx = broadcaster.subscribe(h.challenge.id);
    act(&h, HOST, LiveAction::Start).unwrap();
    assert_eq!(rx.recv().await.unwrap().status, SignalStatus::On);
}

#[test]
fn test_unknown_challenge_is_not_found() {
    let h = harness();
    let err = h
        .endpoint
        .handle(404, Principal { user_id: HOST }, LiveRequest { action: LiveAction::Start })
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

// ============================================================================
// Status read-model
// ============================================================================

#[test]
fn test_status_reports_running_session_and_week_totals() {
    let h = harness();

    let idle = h.coordinator.status(h.challenge.id, OPPONENT).unwrap();
    assert_eq!(idle.week, 3);
    assert_eq!(idle.elapsed_time_seconds, 0);
    assert_eq!(idle.target_time_seconds, 200);
    assert!(idle.running_since.is_none());

    let started = h.coordinator.start(h.challenge.id, OPPONENT).unwrap();
    let running = h.coordinator.status(h.challenge.id, OPPONENT).unwrap();
    assert_eq!(running.running_since, Some(started.started_at));
}

#[test]
fn test_sessions_of_different_participants_are_independent() {
    let h = harness();
    h.coordinator.start(h.challenge.id, HOST).unwrap();
    h.clock.advance(Duration::seconds(30));
    h.coordinator.start(h.challenge.id, OPPONENT).unwrap();
    h.clock.advance(Duration::seconds(30));

    let host = h.coordinator.stop(h.challenge.id, HOST).unwrap();
    let opponent = h.coordinator.stop(h.challenge.id, OPPONENT).unwrap();
    assert_eq!(host.elapsed_secs, 60);
    assert_eq!(opponent.elapsed_secs, 30);
    assert!(h.coordinator.registry().is_empty());
}
