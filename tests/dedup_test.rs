use chrono::{DateTime, Duration, TimeZone, Utc};

use ipwatch::db::{Database, DedupKey, Ledger};

async fn database() -> Database {
    let db = Database::in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    db
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn first_sighting_is_allowed_and_fresh() {
    let db = database().await;
    let key = DedupKey::ip("203.0.113.7");

    let verdict = db.check_and_record(Ledger::Logs, &key, Duration::hours(1), t0()).await.unwrap();
    assert!(verdict.allow);
    assert!(verdict.fresh);
    assert_eq!(db.last_checked(Ledger::Logs, &key).await.unwrap(), Some(t0()));
}

#[tokio::test]
async fn repeat_inside_window_is_denied_without_refresh() {
    let db = database().await;
    let key = DedupKey::ip("203.0.113.7");
    let window = Duration::hours(1);

    db.check_and_record(Ledger::Logs, &key, window, t0()).await.unwrap();
    let later = t0() + Duration::minutes(10);
    let verdict = db.check_and_record(Ledger::Logs, &key, window, later).await.unwrap();

    assert!(!verdict.allow);
    assert!(!verdict.fresh);
    assert_eq!(verdict.last_checked, Some(t0()));
    // Denied checks keep the original timestamp
    assert_eq!(db.last_checked(Ledger::Logs, &key).await.unwrap(), Some(t0()));
}

#[tokio::test]
async fn check_exactly_at_window_boundary_is_allowed() {
    let db = database().await;
    let key = DedupKey::ip("203.0.113.7");
    let window = Duration::hours(1);

    db.check_and_record(Ledger::Logs, &key, window, t0()).await.unwrap();

    let just_before = t0() + window - Duration::milliseconds(1);
    assert!(!db.check_and_record(Ledger::Logs, &key, window, just_before).await.unwrap().allow);

    let boundary = t0() + window;
    let verdict = db.check_and_record(Ledger::Logs, &key, window, boundary).await.unwrap();
    assert!(verdict.allow);
    assert!(!verdict.fresh);
}

#[tokio::test]
async fn check_after_window_refreshes_timestamp() {
    let db = database().await;
    let key = DedupKey::grouped("198.51.100.4", None);
    let window = Duration::hours(5);

    db.check_and_record(Ledger::Records, &key, window, t0()).await.unwrap();
    let later = t0() + window + Duration::seconds(30);
    assert!(db.check_and_record(Ledger::Records, &key, window, later).await.unwrap().allow);
    assert_eq!(db.last_checked(Ledger::Records, &key).await.unwrap(), Some(later));

    // The refreshed timestamp starts a new window
    let soon = later + Duration::minutes(1);
    assert!(!db.check_and_record(Ledger::Records, &key, window, soon).await.unwrap().allow);
}

#[tokio::test]
async fn groups_are_tracked_independently() {
    let db = database().await;
    let window = Duration::hours(5);
    let ip = "198.51.100.4";

    assert!(db.check_and_record(Ledger::Records, &DedupKey::grouped(ip, Some("a")), window, t0()).await.unwrap().allow);
    assert!(db.check_and_record(Ledger::Records, &DedupKey::grouped(ip, Some("b")), window, t0()).await.unwrap().allow);
    assert!(db.check_and_record(Ledger::Records, &DedupKey::grouped(ip, None), window, t0()).await.unwrap().allow);

    let again = t0() + Duration::minutes(1);
    assert!(!db.check_and_record(Ledger::Records, &DedupKey::grouped(ip, Some("a")), window, again).await.unwrap().allow);
}

#[tokio::test]
async fn ledgers_do_not_share_keys() {
    let db = database().await;
    let window = Duration::hours(1);
    let key = DedupKey::ip("192.0.2.1");

    assert!(db.check_and_record(Ledger::Logs, &key, window, t0()).await.unwrap().allow);
    assert!(db.check_and_record(Ledger::Records, &key, window, t0()).await.unwrap().allow);
}

#[tokio::test]
async fn counters_track_every_check() {
    let db = database().await;
    let window = Duration::hours(1);
    let key = DedupKey::ip("192.0.2.1");

    db.check_and_record(Ledger::Logs, &key, window, t0()).await.unwrap();
    db.check_and_record(Ledger::Logs, &key, window, t0() + Duration::minutes(1)).await.unwrap();
    db.check_and_record(Ledger::Logs, &key, window, t0() + Duration::hours(2)).await.unwrap();
    db.check_and_record(Ledger::Records, &DedupKey::ip("192.0.2.2"), window, t0()).await.unwrap();

    let stats = db.stats().await.unwrap();
    assert_eq!(stats.allow, 3);
    assert_eq!(stats.not_allow, 1);
    assert_eq!(stats.fresh, 2);
    assert_eq!(stats.duplicate, 2);
    assert_eq!(stats.last_delete, None);
}

#[tokio::test]
async fn concurrent_checks_allow_once() {
    let db = database().await;
    let now = t0();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            db.check_and_record(Ledger::Logs, &DedupKey::ip("192.0.2.50"), Duration::hours(1), now)
                .await
                .unwrap()
                .allow
        }));
    }

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 1);

    let stats = db.stats().await.unwrap();
    assert_eq!(stats.allow, 1);
    assert_eq!(stats.not_allow, 15);
    assert_eq!(stats.fresh, 1);
    assert_eq!(stats.duplicate, 15);
}
