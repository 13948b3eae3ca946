use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use rust_decimal::Decimal;
use ulid::Ulid;

use seatd::auth::UserDirectory;
use seatd::clock::{Clock, ManualClock};
use seatd::engine::{Engine, EngineError};
use seatd::limits::HOUR_MS;
use seatd::model::*;
use seatd::notify::NotifyHub;
use seatd::scheduler::LifecycleScheduler;

const T0: Ms = 1_767_225_600_000;

// ── Test infrastructure ──────────────────────────────────────

struct World {
    engine: Arc<Engine>,
    users: Arc<UserDirectory>,
    clock: Arc<ManualClock>,
    wal: PathBuf,
}

fn world() -> World {
    let dir = std::env::temp_dir().join(format!("seatd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let wal = dir.join("seatd.wal");
    let users = Arc::new(UserDirectory::new());
    let clock = Arc::new(ManualClock::new(T0));
    let engine = Engine::new(wal.clone(), Arc::new(NotifyHub::new()), users.clone(), clock.clone()).unwrap();
    World {
        engine: Arc::new(engine),
        users,
        clock,
        wal,
    }
}

impl World {
    fn register(&self, email: &str, role: Role) -> Ulid {
        self.users.register(email, email, role, self.clock.now_ms()).unwrap().id
    }

    async fn concert(&self, organizer: Ulid, capacity: u32, unit_price: Decimal, starts_in: Ms) -> Event {
        let start = self.clock.now_ms() + starts_in;
        let draft = self
            .engine
            .create_event(
                NewEvent {
                    title: "Mawazine warm-up".into(),
                    description: None,
                    category: EventCategory::Concert,
                    start,
                    end: start + 4 * HOUR_MS,
                    venue: "OLM Souissi".into(),
                    city: "Rabat".into(),
                    capacity,
                    unit_price,
                    image_url: None,
                },
                organizer,
            )
            .await
            .unwrap();
        self.engine.publish_event(draft.id, organizer).await.unwrap()
    }
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn organizer_to_holder_round_trip() {
    let w = world();
    let organizer = w.register("org@example.com", Role::Organizer);
    let holder = w.register("holder@example.com", Role::Client);
    let event = w.concert(organizer, 10, Decimal::new(2000, 2), 200 * HOUR_MS).await;

    let first = w
        .engine
        .create_reservation(ReservationRequest::seats(4), holder, event.id)
        .await
        .unwrap();
    let second = w
        .engine
        .create_reservation(ReservationRequest::seats(4), holder, event.id)
        .await
        .unwrap();
    assert_eq!(first.total, Decimal::from(80));

    let err = w
        .engine
        .create_reservation(ReservationRequest::seats(3), holder, event.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ref m) if m.contains("available 2, requested 3")));

    w.engine.cancel_reservation(second.id, holder).await.unwrap();
    assert_eq!(w.engine.available_seats(event.id).await.unwrap(), 6);

    let third = w
        .engine
        .create_reservation(ReservationRequest::seats(3), holder, event.id)
        .await
        .unwrap();
    w.engine.confirm_reservation(first.id, holder).await.unwrap();
    w.engine.confirm_reservation(third.id, holder).await.unwrap();

    let stats = w.engine.reservation_stats().await.unwrap();
    assert_eq!(stats.confirmed_seats, 7);
    assert_eq!(stats.confirmed_revenue, Decimal::from(140));

    let summary = w.engine.reservation_summary(third.id).await.unwrap();
    assert_eq!(summary.status, ReservationStatus::Confirmed);
    assert_eq!(summary.holder.map(|h| h.email), Some("holder@example.com".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_holders_race_for_the_last_seats() {
    let w = world();
    let organizer = w.register("org@example.com", Role::Organizer);
    let a = w.register("a@example.com", Role::Client);
    let b = w.register("b@example.com", Role::Client);

    for round in 0..20 {
        let event = w.concert(organizer, 5, Decimal::ONE, 200 * HOUR_MS).await;
        let ea = w.engine.clone();
        let eb = w.engine.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { ea.create_reservation(ReservationRequest::seats(3), a, event.id).await }),
            tokio::spawn(async move { eb.create_reservation(ReservationRequest::seats(3), b, event.id).await }),
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert!(ra.is_ok() ^ rb.is_ok(), "round {round}: {ra:?} / {rb:?}");
        let loser = if ra.is_ok() { rb } else { ra };
        assert!(matches!(loser, Err(EngineError::Conflict(_))));
        assert_eq!(w.engine.committed_seats(event.id).await.unwrap(), 3);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn events_do_not_block_each_other() {
    let w = world();
    let organizer = w.register("org@example.com", Role::Organizer);
    let holder = w.register("holder@example.com", Role::Client);

    let mut events = Vec::new();
    for _ in 0..8 {
        events.push(w.concert(organizer, 30, Decimal::ONE, 200 * HOUR_MS).await);
    }

    let mut handles = Vec::new();
    for event in &events {
        for _ in 0..12 {
            let engine = w.engine.clone();
            let id = event.id;
            handles.push(tokio::spawn(async move {
                engine.create_reservation(ReservationRequest::seats(3), holder, id).await
            }));
        }
    }

    let mut codes = HashSet::new();
    for handle in handles {
        if let Ok(r) = handle.await.unwrap() {
            assert!(codes.insert(r.code));
        }
    }
    // 10 of 12 fit per event.
    assert_eq!(codes.len(), 80);
    for event in &events {
        assert_eq!(w.engine.committed_seats(event.id).await.unwrap(), 30);
    }
}

#[tokio::test]
async fn restart_keeps_everything() {
    let w = world();
    let organizer = w.register("org@example.com", Role::Organizer);
    let holder = w.register("holder@example.com", Role::Client);
    let event = w.concert(organizer, 10, Decimal::new(999, 2), 200 * HOUR_MS).await;
    let r = w
        .engine
        .create_reservation(ReservationRequest::seats(2), holder, event.id)
        .await
        .unwrap();
    w.engine.confirm_reservation(r.id, holder).await.unwrap();
    w.engine.compact_wal().await.unwrap();
    let after = w
        .engine
        .create_reservation(ReservationRequest::seats(1), holder, event.id)
        .await
        .unwrap();

    let restarted = Engine::new(w.wal.clone(), Arc::new(NotifyHub::new()), w.users.clone(), w.clock.clone()).unwrap();
    assert_eq!(restarted.committed_seats(event.id).await.unwrap(), 3);
    assert_eq!(restarted.find_by_code(&r.code).await.unwrap().status, ReservationStatus::Confirmed);
    assert_eq!(restarted.find_by_code(&after.code).await.unwrap().total, Decimal::new(999, 2));

    // Codes survive the restart, so a new draw can't reuse them.
    assert!(restarted.code_exists(&r.code));
    assert!(restarted.code_exists(&after.code));
}

#[tokio::test]
async fn scheduler_closes_out_past_events() {
    let w = world();
    let organizer = w.register("org@example.com", Role::Organizer);
    let holder = w.register("holder@example.com", Role::Client);
    let event = w.concert(organizer, 10, Decimal::ONE, 100 * HOUR_MS).await;
    w.engine
        .create_reservation(ReservationRequest::seats(1), holder, event.id)
        .await
        .unwrap();

    let scheduler = LifecycleScheduler::new(w.engine.clone());
    assert!(scheduler.tick(w.clock.now_ms()).await.completed.is_empty());

    w.clock.set(event.end + 1);
    let report = scheduler.tick(w.clock.now_ms()).await;
    assert_eq!(report.completed, vec![event.id]);
    assert!(scheduler.tick(w.clock.now_ms()).await.completed.is_empty());

    let err = w
        .engine
        .create_reservation(ReservationRequest::seats(1), holder, event.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BusinessRule(_)));
    let stats = w.engine.organizer_stats(organizer).await.unwrap();
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn event_cancellation_reaches_subscribers() {
    let w = world();
    let organizer = w.register("org@example.com", Role::Organizer);
    let event = w.concert(organizer, 10, Decimal::ONE, 100 * HOUR_MS).await;
    let mut rx = w.engine.notify.subscribe(event.id);

    w.engine.cancel_event(event.id, organizer).await.unwrap();
    let change = rx.recv().await.unwrap();
    assert_eq!(
        change,
        Change::EventStatusChanged {
            id: event.id,
            status: EventStatus::Cancelled,
            at: T0,
        }
    );
}
