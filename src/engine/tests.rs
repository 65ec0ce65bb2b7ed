use std::path::PathBuf;

use super::*;
use crate::demand::{DemandConfig, DemandError, PricingConfig};
use crate::limits::*;

const DAY: Ms = 86_400_000;
const T0: Ms = 1_767_225_600_000; // 2026-01-01

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roomrate_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn demand() -> Arc<DemandService> {
    Arc::new(DemandService::new(&DemandConfig::default()).unwrap())
}

fn open(path: &Path) -> Engine {
    Engine::open(path, demand()).unwrap()
}

async fn seeded(name: &str) -> (Engine, PathBuf) {
    let path = test_wal_path(name);
    let engine = open(&path);
    engine.seed_default_rooms().await.unwrap();
    (engine, path)
}

fn assert_price(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected price {expected}, got {actual}"
    );
}

// ── Rooms ───────────────────────────────────────────────

#[tokio::test]
async fn seed_inserts_default_rooms_once() {
    let (engine, _) = seeded("seed_once.wal").await;
    assert_eq!(engine.seed_default_rooms().await.unwrap(), 0);

    let rooms = engine.list_rooms().await;
    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[0].id, "1");
    assert_price(rooms[0].base_price, 100.0);
    assert_eq!(rooms[1].id, "2");
    assert_price(rooms[1].base_price, 120.0);
}

#[tokio::test]
async fn duplicate_room_rejected() {
    let (engine, _) = seeded("dup_room.wal").await;
    let result = engine.create_room("1".into(), 80.0).await;
    assert!(matches!(result, Err(EngineError::RoomExists(_))));
}

#[tokio::test]
async fn batch_with_duplicate_ids_writes_nothing() {
    let path = test_wal_path("batch_dup.wal");
    let engine = open(&path);
    let result = engine
        .create_rooms(vec![("3".into(), 90.0), ("3".into(), 95.0)])
        .await;
    assert!(matches!(result, Err(EngineError::RoomExists(_))));
    assert!(engine.list_rooms().await.is_empty());
}

#[tokio::test]
async fn invalid_rooms_rejected() {
    let path = test_wal_path("invalid_rooms.wal");
    let engine = open(&path);
    assert!(matches!(
        engine.create_room(String::new(), 10.0).await,
        Err(EngineError::InvalidRoomId(_))
    ));
    assert!(matches!(
        engine.create_room("4".into(), -1.0).await,
        Err(EngineError::InvalidPrice(_))
    ));
    assert!(matches!(
        engine.create_room("4".into(), f64::NAN).await,
        Err(EngineError::InvalidPrice(_))
    ));
    assert!(matches!(
        engine.create_room("x".repeat(MAX_ROOM_ID_LEN + 1), 10.0).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn rooms_listed_in_numeric_order() {
    let path = test_wal_path("room_order.wal");
    let engine = open(&path);
    engine
        .create_rooms(vec![("10".into(), 1.0), ("9".into(), 1.0), ("2".into(), 1.0)])
        .await
        .unwrap();
    let ids: Vec<_> = engine.list_rooms().await.into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["2", "9", "10"]);
}

#[tokio::test]
async fn non_numeric_rooms_listed_after_numeric() {
    let path = test_wal_path("room_order_mixed.wal");
    let engine = open(&path);
    engine
        .create_rooms(vec![
            ("abc".into(), 1.0),
            ("1000".into(), 1.0),
            ("b".into(), 1.0),
            ("2".into(), 1.0),
        ])
        .await
        .unwrap();
    let ids: Vec<_> = engine.list_rooms().await.into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["2", "1000", "abc", "b"]);
}

// ── Booking workflow ────────────────────────────────────

#[tokio::test]
async fn first_booking_priced_with_own_demand() {
    let (engine, _) = seeded("first_booking.wal").await;
    let booking = engine
        .book_room(Ulid::new(), "alice", "1", T0, T0 + DAY)
        .await
        .unwrap();
    assert_price(booking.price, 110.0);
    assert_eq!(booking.user_id, "alice");
    assert_eq!(booking.stay, Span::new(T0, T0 + DAY));
    assert_eq!(engine.demand().current_aggregate_demand(), 1);
    assert_eq!(engine.get_room("1").await.unwrap().bookings, 1);
}

#[tokio::test]
async fn demand_is_aggregate_across_rooms() {
    let (engine, _) = seeded("aggregate_rooms.wal").await;
    engine
        .book_room(Ulid::new(), "alice", "1", T0, T0 + DAY)
        .await
        .unwrap();
    let second = engine
        .book_room(Ulid::new(), "bob", "2", T0, T0 + DAY)
        .await
        .unwrap();
    // 120 * (1 + 2 * 0.1)
    assert_price(second.price, 144.0);
}

#[tokio::test]
async fn unknown_room_is_not_found() {
    let (engine, _) = seeded("unknown_room.wal").await;
    let result = engine
        .book_room(Ulid::new(), "alice", "42", T0, T0 + DAY)
        .await;
    assert!(matches!(result, Err(EngineError::RoomNotFound(_))));
    assert_eq!(engine.demand().current_aggregate_demand(), 0);
}

#[tokio::test]
async fn unmappable_room_refused_before_persisting() {
    let (engine, path) = seeded("unmappable.wal").await;
    engine.create_room("suite-a".into(), 300.0).await.unwrap();
    engine.create_room("100".into(), 300.0).await.unwrap();

    for room in ["suite-a", "100"] {
        let err = engine
            .book_room(Ulid::new(), "alice", room, T0, T0 + DAY)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Demand(DemandError::KeyMapping { .. })));
        assert!(err.to_string().contains("room not recognized for pricing"));
    }
    assert!(engine.list_bookings(None).is_empty());
    assert_eq!(engine.get_room("suite-a").await.unwrap().bookings, 0);
    assert_eq!(engine.demand().current_aggregate_demand(), 0);

    drop(engine);
    let replayed = open(&path);
    assert!(replayed.list_bookings(None).is_empty());
}

#[tokio::test]
async fn invalid_stays_rejected() {
    let (engine, _) = seeded("invalid_stay.wal").await;
    assert!(matches!(
        engine.book_room(Ulid::new(), "alice", "1", T0, T0).await,
        Err(EngineError::InvalidStay { .. })
    ));
    assert!(matches!(
        engine.book_room(Ulid::new(), "alice", "1", T0 + DAY, T0).await,
        Err(EngineError::InvalidStay { .. })
    ));
    assert!(matches!(
        engine.book_room(Ulid::new(), "alice", "1", T0, T0 + MAX_STAY_MS + 1).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert_eq!(engine.demand().current_aggregate_demand(), 0);
}

#[tokio::test]
async fn duplicate_booking_id_rejected() {
    let (engine, _) = seeded("dup_booking.wal").await;
    let id = Ulid::new();
    engine.book_room(id, "alice", "1", T0, T0 + DAY).await.unwrap();
    let result = engine.book_room(id, "alice", "1", T0, T0 + DAY).await;
    assert!(matches!(result, Err(EngineError::BookingExists(_))));
    assert_eq!(engine.demand().current_aggregate_demand(), 1);
}

#[tokio::test]
async fn failed_log_append_reverts_demand() {
    let (mut engine, path) = seeded("wal_down.wal").await;
    let (closed_tx, closed_rx) = mpsc::channel(1);
    drop(closed_rx);
    engine.wal_tx = closed_tx;

    let id = Ulid::new();
    let result = engine.book_room(id, "alice", "1", T0, T0 + DAY).await;
    assert!(matches!(result, Err(EngineError::WalError(_))));
    assert_eq!(engine.demand().current_aggregate_demand(), 0);
    assert!(engine.get_booking(&id).is_none());
    assert_eq!(engine.get_room("1").await.unwrap().bookings, 0);

    drop(engine);
    let replayed = open(&path);
    assert!(replayed.get_booking(&id).is_none());
    assert_eq!(replayed.demand().current_aggregate_demand(), 0);
}

#[tokio::test]
async fn cancel_reverses_demand_but_keeps_counter() {
    let (engine, _) = seeded("cancel.wal").await;
    let id = Ulid::new();
    engine.book_room(id, "alice", "2", T0, T0 + DAY).await.unwrap();

    let cancelled = engine.cancel_booking(id).await.unwrap();
    assert_eq!(cancelled.id, id);
    assert!(engine.get_booking(&id).is_none());
    assert_eq!(engine.demand().current_aggregate_demand(), 0);
    assert_eq!(engine.get_room("2").await.unwrap().bookings, 1);

    let quote = engine.quote_room("2").await.unwrap();
    assert_price(quote.price, 120.0);
}

#[tokio::test]
async fn cancel_twice_is_not_found() {
    let (engine, _) = seeded("cancel_twice.wal").await;
    let id = Ulid::new();
    engine.book_room(id, "alice", "1", T0, T0 + DAY).await.unwrap();
    engine.cancel_booking(id).await.unwrap();
    assert!(matches!(
        engine.cancel_booking(id).await,
        Err(EngineError::BookingNotFound(_))
    ));
    assert_eq!(engine.demand().current_aggregate_demand(), 0);
}

#[tokio::test]
async fn existing_prices_not_repriced() {
    let (engine, _) = seeded("no_reprice.wal").await;
    let first = Ulid::new();
    engine.book_room(first, "alice", "1", T0, T0 + DAY).await.unwrap();
    engine.book_room(Ulid::new(), "bob", "1", T0, T0 + DAY).await.unwrap();
    assert_price(engine.get_booking(&first).unwrap().price, 110.0);
}

#[tokio::test]
async fn list_bookings_filters_by_user() {
    let (engine, _) = seeded("list_by_user.wal").await;
    let a = Ulid::new();
    engine.book_room(a, "alice", "1", T0, T0 + DAY).await.unwrap();
    engine.book_room(Ulid::new(), "bob", "2", T0, T0 + DAY).await.unwrap();

    assert_eq!(engine.list_bookings(None).len(), 2);
    let alice: Vec<_> = engine.list_bookings(Some("alice"));
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].id, a);
    assert!(engine.list_bookings(Some("carol")).is_empty());
}

#[tokio::test]
async fn quote_does_not_record_demand() {
    let (engine, _) = seeded("quote.wal").await;
    engine.book_room(Ulid::new(), "alice", "1", T0, T0 + DAY).await.unwrap();
    let quote = engine.quote_room("2").await.unwrap();
    assert_eq!(quote.demand, 1);
    assert_price(quote.price, 132.0);
    assert_eq!(engine.demand().current_aggregate_demand(), 1);

    assert!(matches!(
        engine.quote_room("nope").await,
        Err(EngineError::RoomNotFound(_))
    ));
}

#[tokio::test]
async fn price_floor_applies_to_bookings() {
    let path = test_wal_path("floor.wal");
    let cfg = DemandConfig {
        capacity: 10,
        pricing: PricingConfig {
            coefficient: 0.1,
            floor: Some(100.0),
        },
    };
    let svc = Arc::new(DemandService::new(&cfg).unwrap());
    // Over-cancellation recorded directly against the shared tracker
    svc.record_demand_change("9", -5).unwrap();
    let engine = Engine::open(&path, svc).unwrap();
    engine.seed_default_rooms().await.unwrap();

    let booking = engine
        .book_room(Ulid::new(), "alice", "2", T0, T0 + DAY)
        .await
        .unwrap();
    // 120 * (1 - 0.4) = 72, clamped
    assert_price(booking.price, 100.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_each_see_distinct_demand() {
    let (engine, _) = seeded("concurrent.wal").await;
    let engine = Arc::new(engine);

    let n = 40;
    let mut tasks = Vec::new();
    for i in 0..n {
        let engine = engine.clone();
        let room = if i % 2 == 0 { "1" } else { "2" };
        tasks.push(tokio::spawn(async move {
            engine
                .book_room(Ulid::new(), "load", room, T0, T0 + DAY)
                .await
                .unwrap()
        }));
    }
    let mut levels = Vec::new();
    for t in tasks {
        let b = t.await.unwrap();
        let base = if b.room_id == "1" { 100.0 } else { 120.0 };
        let level = ((b.price / base - 1.0) / 0.1).round() as i64;
        levels.push(level);
    }
    levels.sort();
    assert_eq!(levels, (1..=n).collect::<Vec<i64>>());
    assert_eq!(engine.demand().current_aggregate_demand(), n);
    assert_eq!(engine.get_room("1").await.unwrap().bookings, (n / 2) as u64);
}

// ── Persistence ─────────────────────────────────────────

#[tokio::test]
async fn replay_restores_state_and_demand() {
    let (engine, path) = seeded("replay.wal").await;
    let keep = Ulid::new();
    let gone = Ulid::new();
    engine.book_room(keep, "alice", "1", T0, T0 + DAY).await.unwrap();
    engine.book_room(gone, "bob", "2", T0, T0 + DAY).await.unwrap();
    engine.cancel_booking(gone).await.unwrap();
    drop(engine);

    let engine = open(&path);
    assert_eq!(engine.list_rooms().await.len(), 2);
    assert_eq!(engine.list_bookings(None).len(), 1);
    assert_price(engine.get_booking(&keep).unwrap().price, 110.0);
    assert_eq!(engine.demand().current_aggregate_demand(), 1);
    assert_eq!(engine.demand().demand_in_range(1, 1), 1);
    assert_eq!(engine.get_room("2").await.unwrap().bookings, 1);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let (engine, path) = seeded("compact.wal").await;
    let mut kept = Vec::new();
    for i in 0..6 {
        let id = Ulid::new();
        let room = if i % 2 == 0 { "1" } else { "2" };
        engine.book_room(id, "alice", room, T0, T0 + DAY).await.unwrap();
        if i < 3 {
            engine.cancel_booking(id).await.unwrap();
        } else {
            kept.push(id);
        }
    }
    // 2 rooms + 6 bookings + 3 cancellations
    assert_eq!(engine.appends_since_compact().await.unwrap(), 11);

    let events = engine.compact().await.unwrap();
    assert_eq!(events, 2 + kept.len());
    assert_eq!(engine.appends_since_compact().await.unwrap(), 0);

    // Writes after compaction land in the new file
    let late = Ulid::new();
    engine.book_room(late, "bob", "1", T0, T0 + DAY).await.unwrap();
    let before: Vec<_> = engine.list_bookings(None);
    let counters: Vec<_> = engine.list_rooms().await.into_iter().map(|r| r.bookings).collect();
    drop(engine);

    let engine = open(&path);
    assert_eq!(engine.list_bookings(None), before);
    let after: Vec<_> = engine.list_rooms().await.into_iter().map(|r| r.bookings).collect();
    assert_eq!(after, counters);
    assert_eq!(after, vec![4, 3]);
    assert_eq!(engine.demand().current_aggregate_demand(), 4);
}
