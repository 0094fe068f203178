use super::*;
use crate::config::OpenHours;
use crate::notify::{Notice, NoticeKind, Notifier, NotifyError};

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roombook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn ts(s: &str) -> Timestamp {
    DateTime::parse_from_rfc3339(s).unwrap()
}

fn utc_validator() -> ReservationValidator {
    ReservationValidator::new(OpenHours::default(), FixedOffset::east_opt(0).unwrap())
}

fn open_engine(path: PathBuf) -> Engine {
    Engine::new(path, Arc::new(NotifyHub::new()), utc_validator()).unwrap()
}

/// "Now" for most tests: early on the booking day.
fn morning() -> Timestamp {
    ts("2024-03-10T06:00:00Z")
}

struct Fixture {
    engine: Engine,
    room: Ulid,
    team: Ulid,
    other_team: Ulid,
}

async fn fixture(name: &str) -> Fixture {
    let engine = open_engine(test_wal_path(name));
    let room = Ulid::new();
    let team = Ulid::new();
    let other_team = Ulid::new();
    engine.create_resource(room, "Blue".into(), 8, None).await.unwrap();
    engine.create_team(team, "Platform".into()).await.unwrap();
    engine.create_team(other_team, "Design".into()).await.unwrap();
    Fixture {
        engine,
        room,
        team,
        other_team,
    }
}

fn proposal(room: Ulid, team: Ulid, start: &str, end: &str) -> Proposal {
    Proposal {
        resource_id: room,
        team_id: team,
        requester_id: Ulid::new(),
        start: ts(start),
        end: ts(end),
        note: None,
    }
}

fn user(username: &str, team: Option<Ulid>) -> User {
    User {
        id: Ulid::new(),
        username: username.into(),
        first_name: username.into(),
        last_name: "Tester".into(),
        email: format!("{username}@example.com"),
        team_id: team,
    }
}

fn rejection(result: Result<ReservedInterval, CreateError>) -> Rejection {
    match result {
        Err(CreateError::Rejected(r)) => r,
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[derive(Default)]
struct Recorder {
    notices: Mutex<Vec<Notice>>,
}

#[async_trait]
impl Notifier for Recorder {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

struct Broken;

#[async_trait]
impl Notifier for Broken {
    async fn send(&self, _notice: &Notice) -> Result<(), NotifyError> {
        Err(NotifyError::Unavailable)
    }
}

// ── Rooms ────────────────────────────────────────────────

#[tokio::test]
async fn room_create_update_and_list() {
    let engine = open_engine(test_wal_path("rooms.wal"));
    let a = Ulid::new();
    let b = Ulid::new();
    engine.create_resource(a, "Orange".into(), 4, None).await.unwrap();
    engine
        .create_resource(b, "Blue".into(), 10, Some("projector".into()))
        .await
        .unwrap();

    let names: Vec<_> = engine.list_resources().await.into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["Blue", "Orange"]);

    engine.update_resource(a, "Amber".into(), 6, None).await.unwrap();
    let info = engine.get_resource_info(a).await.unwrap();
    assert_eq!(info.name, "Amber");
    assert_eq!(info.capacity, 6);
    assert!(info.active);
}

#[tokio::test]
async fn room_duplicate_and_bad_capacity() {
    let engine = open_engine(test_wal_path("room_errors.wal"));
    let id = Ulid::new();
    engine.create_resource(id, "Blue".into(), 1, None).await.unwrap();
    assert!(matches!(
        engine.create_resource(id, "Blue".into(), 1, None).await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert!(matches!(
        engine.create_resource(Ulid::new(), "Empty".into(), 0, None).await,
        Err(EngineError::InvalidCapacity)
    ));
    assert!(matches!(
        engine.update_resource(id, "Blue".into(), 0, None).await,
        Err(EngineError::InvalidCapacity)
    ));
    assert!(matches!(
        engine.create_resource(Ulid::new(), "x".repeat(101), 1, None).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine.update_resource(Ulid::new(), "Ghost".into(), 1, None).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn inactive_room_keeps_history_and_refuses_new() {
    let f = fixture("inactive_room.wal").await;
    let admin = Actor::admin(Ulid::new());
    let kept = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();

    f.engine.set_resource_active(f.room, false).await.unwrap();
    let refused = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T12:00:00Z", "2024-03-10T13:00:00Z"),
            &admin,
            morning(),
        )
        .await;
    assert_eq!(rejection(refused).reason, RejectReason::ResourceInactive(f.room));
    assert_eq!(f.engine.get_reservation(kept.id).await, Some(kept));

    f.engine.set_resource_active(f.room, true).await.unwrap();
    assert!(
        f.engine
            .create_reservation(
                proposal(f.room, f.team, "2024-03-10T12:00:00Z", "2024-03-10T13:00:00Z"),
                &admin,
                morning(),
            )
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn deleting_room_cascades_without_notices() {
    let f = fixture("delete_room.wal").await;
    let admin = Actor::admin(Ulid::new());
    let r = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();

    let dropped = f.engine.delete_resource(f.room).await.unwrap();
    assert_eq!(dropped, vec![r.clone()]);
    assert!(f.engine.get_reservation(r.id).await.is_none());
    assert!(f.engine.get_resource_info(f.room).await.is_none());
    assert!(matches!(
        f.engine.delete_resource(f.room).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Create ───────────────────────────────────────────────

#[tokio::test]
async fn boundary_touching_admitted_straddle_conflicts() {
    let f = fixture("boundary.wal").await;
    let admin = Actor::admin(Ulid::new());
    let existing = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T10:00:00Z", "2024-03-10T11:00:00Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();

    f.engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T11:00:00Z", "2024-03-10T12:00:00Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();

    let straddle = f
        .engine
        .create_reservation(
            proposal(f.room, f.other_team, "2024-03-10T10:30:00Z", "2024-03-10T11:30:00Z"),
            &admin,
            morning(),
        )
        .await;
    let r = rejection(straddle);
    assert!(matches!(&r.reason, RejectReason::Conflict(ids) if ids.contains(&existing.id)));
    assert_eq!(r.field, Field::Window);
    assert_eq!(f.engine.store.interval_count(), 2);
}

#[tokio::test]
async fn sub_millisecond_overlap_conflicts_exact_touch_admitted() {
    let f = fixture("sub_ms_boundary.wal").await;
    let admin = Actor::admin(Ulid::new());
    let first = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T10:00:00Z", "2024-03-10T11:00:00.000900Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();

    let r = rejection(
        f.engine
            .create_reservation(
                proposal(f.room, f.team, "2024-03-10T11:00:00.000500Z", "2024-03-10T12:00:00Z"),
                &admin,
                morning(),
            )
            .await,
    );
    assert_eq!(r.reason, RejectReason::Conflict(vec![first.id]));

    f.engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T11:00:00.000900Z", "2024-03-10T12:00:00Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();
    assert_eq!(f.engine.store.interval_count(), 2);
}

#[tokio::test]
async fn booking_shorter_than_a_millisecond() {
    let f = fixture("sub_ms_booking.wal").await;
    let admin = Actor::admin(Ulid::new());
    let tiny = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T10:00:00.000100Z", "2024-03-10T10:00:00.000900Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();

    let r = rejection(
        f.engine
            .create_reservation(
                proposal(f.room, f.team, "2024-03-10T10:00:00.000500Z", "2024-03-10T10:00:00.000700Z"),
                &admin,
                morning(),
            )
            .await,
    );
    assert_eq!(r.reason, RejectReason::Conflict(vec![tiny.id]));

    let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
    let free = f.engine.free_windows(f.room, date).await.unwrap();
    assert_eq!(
        free,
        vec![
            (ts("2024-03-10T07:00:00Z"), ts("2024-03-10T10:00:00Z")),
            (ts("2024-03-10T10:00:00.001Z"), ts("2024-03-10T22:00:00Z")),
        ]
    );
}

#[tokio::test]
async fn team_leader_books_for_own_team_whatever_was_asked() {
    let f = fixture("leader_override.wal").await;
    let leader = Actor::team_leader(Ulid::new(), f.team);
    let created = f
        .engine
        .create_reservation(
            proposal(f.room, f.other_team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
            &leader,
            morning(),
        )
        .await
        .unwrap();
    assert_eq!(created.team_id, f.team);
}

#[tokio::test]
async fn plain_member_cannot_book() {
    let f = fixture("member_denied.wal").await;
    let member = Actor::member(Ulid::new(), Some(f.team));
    let result = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
            &member,
            morning(),
        )
        .await;
    let r = rejection(result);
    assert_eq!(r.reason, RejectReason::PermissionDenied);
    assert_eq!(r.field, Field::Team);
    assert_eq!(f.engine.store.interval_count(), 0);
}

#[tokio::test]
async fn unknown_room_and_team_are_not_found() {
    let f = fixture("unknown_refs.wal").await;
    let admin = Actor::admin(Ulid::new());
    let ghost_room = Ulid::new();
    let r = rejection(
        f.engine
            .create_reservation(
                proposal(ghost_room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
                &admin,
                morning(),
            )
            .await,
    );
    assert_eq!(r.reason, RejectReason::NotFound(ghost_room));
    assert_eq!(r.field, Field::Resource);

    let ghost_team = Ulid::new();
    let r = rejection(
        f.engine
            .create_reservation(
                proposal(f.room, ghost_team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
                &admin,
                morning(),
            )
            .await,
    );
    assert_eq!(r.reason, RejectReason::NotFound(ghost_team));
    assert_eq!(r.field, Field::Team);
}

#[tokio::test]
async fn overlong_note_is_rejected() {
    let f = fixture("long_note.wal").await;
    let mut p = proposal(f.room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z");
    p.note = Some("n".repeat(crate::limits::MAX_NOTE_LEN + 1));
    let r = rejection(
        f.engine
            .create_reservation(p, &Actor::admin(Ulid::new()), morning())
            .await,
    );
    assert!(matches!(r.reason, RejectReason::LimitExceeded(_)));
    assert_eq!(r.field, Field::Note);
}

#[tokio::test]
async fn malformed_window_reported_before_size_limits() {
    let f = fixture("rule_order.wal").await;
    let admin = Actor::admin(Ulid::new());
    let long_note = Some("n".repeat(crate::limits::MAX_NOTE_LEN + 1));

    let mut reversed = proposal(f.room, f.team, "2024-03-10T10:00:00Z", "2024-03-10T09:00:00Z");
    reversed.note = long_note.clone();
    let r = rejection(f.engine.create_reservation(reversed, &admin, morning()).await);
    assert_eq!(r.reason, RejectReason::InvalidRange(RangeError::EndNotAfterStart));

    let mut past = proposal(f.room, f.team, "2024-03-09T09:00:00Z", "2024-03-09T10:00:00Z");
    past.note = long_note;
    let r = rejection(f.engine.create_reservation(past.clone(), &admin, morning()).await);
    assert_eq!(r.reason, RejectReason::Expired);
    assert_eq!(
        f.engine.check_reservation(&past, &admin, &morning(), None).await,
        ValidationOutcome::Rejected(Rejection::new(RejectReason::Expired, Field::End))
    );
}

#[tokio::test]
async fn temporal_rules_apply_through_engine() {
    let f = fixture("temporal.wal").await;
    let admin = Actor::admin(Ulid::new());

    let early = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T06:59:00Z", "2024-03-10T08:00:00Z"),
            &admin,
            ts("2024-03-10T00:00:00Z"),
        )
        .await;
    assert!(matches!(rejection(early).reason, RejectReason::OutOfHours { .. }));

    let past = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T09:59:59Z"),
            &admin,
            ts("2024-03-10T10:00:00Z"),
        )
        .await;
    assert_eq!(rejection(past).reason, RejectReason::Expired);

    let overnight = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-01-01T20:00:00Z", "2024-01-02T01:00:00Z"),
            &admin,
            ts("2023-12-31T00:00:00Z"),
        )
        .await;
    assert_eq!(
        rejection(overnight).reason,
        RejectReason::InvalidRange(RangeError::SpansDays)
    );
}

#[tokio::test]
async fn rejections_write_nothing() {
    let f = fixture("reject_no_wal.wal").await;
    let before = f.engine.wal_appends_since_compact().await;
    let _ = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T10:00:00Z", "2024-03-10T09:00:00Z"),
            &Actor::admin(Ulid::new()),
            morning(),
        )
        .await;
    assert_eq!(f.engine.wal_appends_since_compact().await, before);
    assert_eq!(f.engine.store.interval_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_creates_admit_exactly_one() {
    let f = fixture("stress_one_winner.wal").await;
    let engine = Arc::new(f.engine);
    let admin = Actor::admin(Ulid::new());

    let n = 32;
    let mut handles = Vec::new();
    for i in 0..n {
        let engine = engine.clone();
        let admin = admin.clone();
        // Every proposal covers 10:00-10:30 plus a varying tail.
        let end = format!("2024-03-10T10:{:02}:00Z", 30 + i % 30);
        let p = proposal(f.room, f.team, "2024-03-10T10:00:00Z", &end);
        handles.push(tokio::spawn(async move {
            engine.create_reservation(p, &admin, morning()).await
        }));
    }

    let mut admitted = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(CreateError::Rejected(r)) if matches!(r.reason, RejectReason::Conflict(_)) => {
                conflicts += 1
            }
            Err(e) => panic!("unexpected failure: {e}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(conflicts, n - 1);
    assert_eq!(engine.store.interval_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_disjoint_creates_all_admitted() {
    let f = fixture("stress_disjoint.wal").await;
    let engine = Arc::new(f.engine);
    let admin = Actor::admin(Ulid::new());

    let mut handles = Vec::new();
    for hour in 7..22 {
        let engine = engine.clone();
        let admin = admin.clone();
        let p = proposal(
            f.room,
            f.team,
            &format!("2024-03-10T{hour:02}:00:00Z"),
            &format!("2024-03-10T{:02}:00:00Z", hour + 1),
        );
        handles.push(tokio::spawn(async move {
            engine.create_reservation(p, &admin, morning()).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let day = engine
        .store
        .find_by_resource_and_date(f.room, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap())
        .await;
    assert_eq!(day.len(), 15);
    assert!(day.windows(2).all(|w| w[0].end <= w[1].start));
}

#[tokio::test]
async fn check_reservation_previews_without_committing() {
    let f = fixture("check_preview.wal").await;
    let admin = Actor::admin(Ulid::new());
    let existing = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T10:00:00Z", "2024-03-10T11:00:00Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();

    let moved = proposal(f.room, f.team, "2024-03-10T10:30:00Z", "2024-03-10T11:30:00Z");
    let outcome = f
        .engine
        .check_reservation(&moved, &admin, &morning(), Some(existing.id))
        .await;
    assert_eq!(outcome, ValidationOutcome::Admitted(Admission { team_id: f.team }));

    let outcome = f.engine.check_reservation(&moved, &admin, &morning(), None).await;
    assert!(!outcome.is_admitted());
    assert_eq!(f.engine.store.interval_count(), 1);
}

#[tokio::test]
async fn created_reservation_is_broadcast() {
    let f = fixture("broadcast.wal").await;
    let mut rx = f.engine.notify.subscribe(f.room);
    let created = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
            &Actor::admin(Ulid::new()),
            morning(),
        )
        .await
        .unwrap();
    assert_eq!(
        rx.recv().await.unwrap(),
        Event::ReservationCreated { interval: created }
    );
}

// ── Cancel ───────────────────────────────────────────────

#[tokio::test]
async fn cancel_notifies_whole_team_then_not_found() {
    let f = fixture("cancel_notify.wal").await;
    f.engine.register_user(user("carol", Some(f.team))).await.unwrap();
    f.engine.register_user(user("alice", Some(f.team))).await.unwrap();
    f.engine.register_user(user("dave", Some(f.other_team))).await.unwrap();

    let leader = Actor::team_leader(Ulid::new(), f.team);
    let r = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
            &leader,
            morning(),
        )
        .await
        .unwrap();

    let recorder = Recorder::default();
    let cancelled = f.engine.cancel_reservation(r.id, &leader, &recorder).await.unwrap();
    assert_eq!(cancelled, r);
    assert!(f.engine.get_reservation(r.id).await.is_none());

    {
        let notices = recorder.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::Cancelled);
        assert_eq!(notices[0].room_name, "Blue");
        let names: Vec<_> = notices[0].recipients.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "carol"]);
    }

    assert!(matches!(
        f.engine.cancel_reservation(r.id, &leader, &recorder).await,
        Err(CancellationError::NotFound(id)) if id == r.id
    ));
    assert!(matches!(
        f.engine.cancel_reservation(Ulid::new(), &leader, &recorder).await,
        Err(CancellationError::NotFound(_))
    ));
    assert_eq!(recorder.notices.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn cancel_requires_authority_over_owning_team() {
    let f = fixture("cancel_permission.wal").await;
    let r = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
            &Actor::admin(Ulid::new()),
            morning(),
        )
        .await
        .unwrap();
    let recorder = Recorder::default();

    let foreign_leader = Actor::team_leader(Ulid::new(), f.other_team);
    assert!(matches!(
        f.engine.cancel_reservation(r.id, &foreign_leader, &recorder).await,
        Err(CancellationError::PermissionDenied)
    ));
    let member = Actor::member(Ulid::new(), Some(f.team));
    assert!(matches!(
        f.engine.cancel_reservation(r.id, &member, &recorder).await,
        Err(CancellationError::PermissionDenied)
    ));
    assert!(f.engine.get_reservation(r.id).await.is_some());

    let mut manager = Actor::member(Ulid::new(), None);
    manager.can_manage_all_reservations = true;
    f.engine.cancel_reservation(r.id, &manager, &recorder).await.unwrap();
}

#[tokio::test]
async fn failed_notice_does_not_resurrect() {
    let f = fixture("cancel_broken_notifier.wal").await;
    f.engine.register_user(user("erin", Some(f.team))).await.unwrap();
    let admin = Actor::admin(Ulid::new());
    let r = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();

    f.engine.cancel_reservation(r.id, &admin, &Broken).await.unwrap();
    assert!(f.engine.get_reservation(r.id).await.is_none());

    // The freed slot is bookable again.
    f.engine
        .create_reservation(
            proposal(f.room, f.other_team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_succeed_once() {
    let f = fixture("cancel_race.wal").await;
    let engine = Arc::new(f.engine);
    let admin = Actor::admin(Ulid::new());
    let r = engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();

    let id = r.id;
    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let admin = admin.clone();
        handles.push(tokio::spawn(async move {
            engine.cancel_reservation(id, &admin, &Recorder::default()).await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(CancellationError::NotFound(_)) => {}
            Err(e) => panic!("unexpected failure: {e}"),
        }
    }
    assert_eq!(ok, 1);
}

// ── Directory ────────────────────────────────────────────

#[tokio::test]
async fn team_with_members_cannot_be_deleted() {
    let f = fixture("team_in_use.wal").await;
    let frank = user("frank", Some(f.team));
    f.engine.register_user(frank.clone()).await.unwrap();
    assert!(matches!(
        f.engine.delete_team(f.team).await,
        Err(EngineError::TeamInUse(_))
    ));

    f.engine
        .update_user(User {
            team_id: None,
            ..frank
        })
        .await
        .unwrap();
    f.engine.delete_team(f.team).await.unwrap();
    assert!(f.engine.get_team(&f.team).is_none());
}

#[tokio::test]
async fn deleting_team_drops_its_reservations_everywhere() {
    let f = fixture("team_cascade.wal").await;
    let second_room = Ulid::new();
    f.engine
        .create_resource(second_room, "Green".into(), 2, None)
        .await
        .unwrap();
    let admin = Actor::admin(Ulid::new());
    for room in [f.room, second_room] {
        f.engine
            .create_reservation(
                proposal(room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
                &admin,
                morning(),
            )
            .await
            .unwrap();
    }
    let survivor = f
        .engine
        .create_reservation(
            proposal(f.room, f.other_team, "2024-03-10T11:00:00Z", "2024-03-10T12:00:00Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();

    let dropped = f.engine.delete_team(f.team).await.unwrap();
    assert_eq!(dropped.len(), 2);
    assert_eq!(f.engine.store.interval_count(), 1);
    assert!(f.engine.get_reservation(survivor.id).await.is_some());
}

#[tokio::test]
async fn teams_list_by_name_after_rename() {
    let f = fixture("team_rename.wal").await;
    let names = |teams: Vec<crate::model::Team>| teams.into_iter().map(|t| t.name).collect::<Vec<_>>();
    assert_eq!(names(f.engine.list_teams()), vec!["Design", "Platform"]);

    f.engine.rename_team(f.team, "Apps".into()).await.unwrap();
    assert_eq!(names(f.engine.list_teams()), vec!["Apps", "Design"]);
    assert!(matches!(
        f.engine.rename_team(Ulid::new(), "Ghost".into()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn user_registration_checks_team_and_duplicates() {
    let f = fixture("users.wal").await;
    let grace = user("grace", Some(f.team));
    f.engine.register_user(grace.clone()).await.unwrap();
    assert!(matches!(
        f.engine.register_user(grace.clone()).await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert!(matches!(
        f.engine.register_user(user("heidi", Some(Ulid::new()))).await,
        Err(EngineError::NotFound(_))
    ));
    f.engine.remove_user(grace.id).await.unwrap();
    assert!(f.engine.get_user(&grace.id).is_none());
    assert!(matches!(
        f.engine.remove_user(grace.id).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn upcoming_for_team_through_store() {
    let f = fixture("upcoming.wal").await;
    let admin = Actor::admin(Ulid::new());
    let later = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-11T09:00:00Z", "2024-03-11T10:00:00Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();
    let sooner = f
        .engine
        .create_reservation(
            proposal(f.room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
            &admin,
            morning(),
        )
        .await
        .unwrap();
    let upcoming = f
        .engine
        .store
        .find_upcoming_for_team(f.team, &morning())
        .await;
    assert_eq!(upcoming, vec![sooner, later]);
    assert!(
        f.engine
            .store
            .find_upcoming_for_team(f.other_team, &morning())
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn calendar_day_names_teams_rooms_and_reservers() {
    let f = fixture("calendar.wal").await;
    let ivan = user("ivan", Some(f.team));
    f.engine.register_user(ivan.clone()).await.unwrap();
    let mut p = proposal(f.room, f.team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z");
    p.requester_id = ivan.id;
    p.note = Some("retro".into());
    let r = f
        .engine
        .create_reservation(p, &Actor::admin(Ulid::new()), morning())
        .await
        .unwrap();

    let feed = f
        .engine
        .calendar_day(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap())
        .await;
    assert_eq!(feed.events.len(), 1);
    let e = &feed.events[0];
    assert_eq!(e.id, r.id);
    assert_eq!(e.title, "Platform");
    assert_eq!(e.room, "Blue");
    assert_eq!(e.extended_props.reserver, "ivan");
    assert_eq!(e.extended_props.note.as_deref(), Some("retro"));

    let empty = f
        .engine
        .calendar_day(NaiveDate::from_ymd_opt(2024, 3, 11).unwrap())
        .await;
    assert!(empty.events.is_empty());
}

#[tokio::test]
async fn free_windows_are_open_hours_minus_bookings() {
    let f = fixture("free_windows.wal").await;
    let admin = Actor::admin(Ulid::new());
    for (start, end) in [
        ("2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
        ("2024-03-10T10:00:00Z", "2024-03-10T11:30:00Z"),
        ("2024-03-10T20:00:00Z", "2024-03-10T22:00:00Z"),
    ] {
        f.engine
            .create_reservation(proposal(f.room, f.team, start, end), &admin, morning())
            .await
            .unwrap();
    }
    let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
    let free = f.engine.free_windows(f.room, date).await.unwrap();
    assert_eq!(
        free,
        vec![
            (ts("2024-03-10T07:00:00Z"), ts("2024-03-10T09:00:00Z")),
            (ts("2024-03-10T11:30:00Z"), ts("2024-03-10T20:00:00Z")),
        ]
    );
    assert!(matches!(
        f.engine.free_windows(Ulid::new(), date).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── WAL ──────────────────────────────────────────────────

#[tokio::test]
async fn replay_restores_rooms_directory_and_reservations() {
    let path = test_wal_path("replay_full.wal");
    let room = Ulid::new();
    let team = Ulid::new();
    let judy = user("judy", Some(team));
    let kept;
    {
        let engine = open_engine(path.clone());
        let admin = Actor::admin(Ulid::new());
        engine.create_resource(room, "Blue".into(), 8, None).await.unwrap();
        engine.create_team(team, "Platform".into()).await.unwrap();
        engine.rename_team(team, "Infra".into()).await.unwrap();
        engine.register_user(judy.clone()).await.unwrap();
        kept = engine
            .create_reservation(
                proposal(room, team, "2024-03-10T09:00:00+02:00", "2024-03-10T10:00:00+02:00"),
                &admin,
                morning(),
            )
            .await
            .unwrap();
        let gone = engine
            .create_reservation(
                proposal(room, team, "2024-03-10T12:00:00Z", "2024-03-10T13:00:00Z"),
                &admin,
                morning(),
            )
            .await
            .unwrap();
        engine
            .cancel_reservation(gone.id, &admin, &Recorder::default())
            .await
            .unwrap();
        engine.set_resource_active(room, false).await.unwrap();
    }

    let engine = open_engine(path);
    let info = engine.get_resource_info(room).await.unwrap();
    assert!(!info.active);
    assert_eq!(engine.get_team(&team).unwrap().name, "Infra");
    assert_eq!(engine.team_members(team), vec![judy]);
    assert_eq!(engine.store.interval_count(), 1);
    let replayed = engine.get_reservation(kept.id).await.unwrap();
    assert_eq!(replayed, kept);
    assert_eq!(replayed.start.offset().local_minus_utc(), 2 * 3600);
}

#[tokio::test]
async fn replay_repeats_team_cascade() {
    let path = test_wal_path("replay_team_cascade.wal");
    let room = Ulid::new();
    let team = Ulid::new();
    {
        let engine = open_engine(path.clone());
        engine.create_resource(room, "Blue".into(), 8, None).await.unwrap();
        engine.create_team(team, "Platform".into()).await.unwrap();
        engine
            .create_reservation(
                proposal(room, team, "2024-03-10T09:00:00Z", "2024-03-10T10:00:00Z"),
                &Actor::admin(Ulid::new()),
                morning(),
            )
            .await
            .unwrap();
        engine.delete_team(team).await.unwrap();
    }
    let engine = open_engine(path);
    assert!(engine.get_team(&team).is_none());
    assert_eq!(engine.store.interval_count(), 0);
    assert_eq!(engine.store.resource_count(), 1);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let f_room = Ulid::new();
    let team = Ulid::new();
    let kept;
    {
        let engine = open_engine(path.clone());
        let admin = Actor::admin(Ulid::new());
        engine.create_resource(f_room, "Blue".into(), 8, None).await.unwrap();
        engine.create_team(team, "Platform".into()).await.unwrap();
        engine.register_user(user("kim", Some(team))).await.unwrap();
        for hour in 8..12 {
            let r = engine
                .create_reservation(
                    proposal(
                        f_room,
                        team,
                        &format!("2024-03-10T{hour:02}:00:00Z"),
                        &format!("2024-03-10T{hour:02}:30:00Z"),
                    ),
                    &admin,
                    morning(),
                )
                .await
                .unwrap();
            engine
                .cancel_reservation(r.id, &admin, &Recorder::default())
                .await
                .unwrap();
        }
        kept = engine
            .create_reservation(
                proposal(f_room, team, "2024-03-10T15:00:00Z", "2024-03-10T16:00:00Z"),
                &admin,
                morning(),
            )
            .await
            .unwrap();
        engine.set_resource_active(f_room, false).await.unwrap();

        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should shrink: {after} < {before}");
    }

    let engine = open_engine(path);
    assert_eq!(engine.store.interval_count(), 1);
    assert_eq!(engine.get_reservation(kept.id).await, Some(kept));
    assert!(!engine.get_resource_info(f_room).await.unwrap().active);
    assert_eq!(engine.team_members(team).len(), 1);
}

#[tokio::test]
async fn group_commit_batches_appends() {
    let path = test_wal_path("group_commit_batch.wal");
    let engine = Arc::new(open_engine(path.clone()));

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_resource(Ulid::new(), format!("Room {i}"), 4, None)
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.list_resources().await.len(), n);
    assert_eq!(engine.wal_appends_since_compact().await, n as u64);

    let engine2 = open_engine(path);
    assert_eq!(engine2.list_resources().await.len(), n);
}
