use chrono::{DateTime, Duration, TimeZone, Utc};

use ipwatch::db::{Database, DeviceUpdate};

async fn database() -> Database {
    let db = Database::in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    db
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
}

fn heartbeat(id: &str) -> DeviceUpdate {
    DeviceUpdate {
        id: id.to_string(),
        ip: Some("203.0.113.20".to_string()),
        country_code: Some("VN".to_string()),
        ram_total: Some(4096),
        ram_used: Some(1024),
        cpu_percent: Some(12.5),
        counter1: Some(3),
        ..Default::default()
    }
}

#[tokio::test]
async fn insert_fills_defaults_and_stamps_time() {
    let db = database().await;
    let device = db.upsert_device(&heartbeat("phone-1"), t0()).await.unwrap();

    assert_eq!(device.id, "phone-1");
    assert_eq!(device.ip.as_deref(), Some("203.0.113.20"));
    assert_eq!(device.ram_total, 4096);
    assert_eq!(device.cpu_percent, 12.5);
    assert_eq!(device.counter1, 3);
    assert_eq!(device.counter2, 0);
    assert_eq!(device.runtime, 0);
    assert!(!device.restart);
    assert_eq!(device.description, None);
    assert_eq!(device.last_update, Some(t0().timestamp()));
}

#[tokio::test]
async fn upsert_is_idempotent_on_id() {
    let db = database().await;
    let update = heartbeat("phone-1");

    db.upsert_device(&update, t0()).await.unwrap();
    let later = t0() + Duration::seconds(90);
    let device = db.upsert_device(&update, later).await.unwrap();

    assert_eq!(db.count_devices().await.unwrap(), 1);
    assert_eq!(device.last_update, Some(later.timestamp()));
    assert_eq!(device.counter1, 3);
}

#[tokio::test]
async fn partial_update_keeps_unset_fields() {
    let db = database().await;
    db.upsert_device(&heartbeat("phone-1"), t0()).await.unwrap();

    let update = DeviceUpdate {
        id: "phone-1".to_string(),
        cpu_percent: Some(80.0),
        restart: Some(true),
        bytes_sent: Some(1_000_000),
        ..Default::default()
    };
    let device = db.upsert_device(&update, t0() + Duration::minutes(1)).await.unwrap();

    assert_eq!(device.cpu_percent, 80.0);
    assert!(device.restart);
    assert_eq!(device.bytes_sent, 1_000_000);
    assert_eq!(device.ip.as_deref(), Some("203.0.113.20"));
    assert_eq!(device.country_code.as_deref(), Some("VN"));
    assert_eq!(device.ram_total, 4096);
}

#[tokio::test]
async fn patch_requires_existing_device() {
    let db = database().await;
    assert_eq!(db.patch_device(&heartbeat("ghost"), t0()).await.unwrap(), None);
    assert_eq!(db.count_devices().await.unwrap(), 0);

    db.upsert_device(&heartbeat("phone-1"), t0()).await.unwrap();
    let update = DeviceUpdate {
        id: "phone-1".to_string(),
        description: Some("rack 2".to_string()),
        ..Default::default()
    };
    let patched = db.patch_device(&update, t0()).await.unwrap().unwrap();
    assert_eq!(patched.description.as_deref(), Some("rack 2"));
}

#[tokio::test]
async fn delete_reports_missing_ids() {
    let db = database().await;
    db.upsert_device(&heartbeat("phone-1"), t0()).await.unwrap();

    assert!(db.delete_device("phone-1").await.unwrap());
    assert!(!db.delete_device("phone-1").await.unwrap());
    assert_eq!(db.get_device("phone-1").await.unwrap(), None);
}

#[tokio::test]
async fn list_is_ordered_lexicographically() {
    let db = database().await;
    for id in ["b", "a2", "a10"] {
        db.upsert_device(&heartbeat(id), t0()).await.unwrap();
    }

    let ids: Vec<String> = db.list_devices().await.unwrap().into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec!["a10", "a2", "b"]);
}

#[tokio::test]
async fn outdated_devices_respect_threshold() {
    let db = database().await;
    let now = t0();

    db.upsert_device(&heartbeat("stale"), now - Duration::minutes(20)).await.unwrap();
    db.upsert_device(&heartbeat("alive"), now - Duration::minutes(5)).await.unwrap();
    db.upsert_device(&heartbeat("just-now"), now).await.unwrap();

    let outdated: Vec<String> = db
        .outdated_devices(Duration::minutes(15), now)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(outdated, vec!["stale"]);
}
