//! HTTP handlers

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Query, State,
    },
    http::HeaderMap,
    Json,
};
use cached::proc_macro::cached;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{net::{IpAddr, SocketAddr}, sync::Arc};

use super::{middleware::get_real_ip, AppState};
use crate::country::parse_country_list;
use crate::db::{Database, DedupKey, Device, DeviceUpdate, Ledger, Stats};
use crate::error::{AppError, AppResult};
use crate::jobs;
use crate::locale;

/// Unwrap an extractor result, turning rejections into validation errors
fn extracted<T, E: std::fmt::Display>(result: Result<T, E>) -> AppResult<T> {
    result.map_err(|e| AppError::validation(e.to_string()))
}

fn required<'a>(value: &'a Option<String>, name: &str) -> AppResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::validation(format!("Missing query parameter '{}'", name))),
    }
}

fn parse_ip(raw: &str) -> AppResult<IpAddr> {
    raw.parse()
        .map_err(|_| AppError::validation(format!("Invalid IP address '{}'", raw)))
}

fn window_hours(time: Option<i64>, default: u32) -> AppResult<i64> {
    match time {
        None => Ok(i64::from(default)),
        Some(hours) if hours > 0 => Ok(hours),
        Some(hours) => Err(AppError::validation(format!("Invalid time '{}': must be a positive number of hours", hours))),
    }
}

/// Dedup window from `time` hours, rejecting values chrono cannot represent
fn dedup_window(time: Option<i64>, default: u32) -> AppResult<Duration> {
    let hours = window_hours(time, default)?;
    Duration::try_hours(hours)
        .ok_or_else(|| AppError::validation(format!("Invalid time '{}': window is too large", hours)))
}

/// Trimmed value, or `None` when absent or blank
fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Relative age such as "3 hours ago"
pub fn time_ago(elapsed: Duration) -> String {
    let elapsed = elapsed.max(Duration::zero());
    if elapsed.num_days() > 0 {
        format!("{} days ago", elapsed.num_days())
    } else if elapsed.num_hours() > 0 {
        format!("{} hours ago", elapsed.num_hours())
    } else if elapsed.num_minutes() > 0 {
        format!("{} minutes ago", elapsed.num_minutes())
    } else {
        format!("{} seconds ago", elapsed.num_seconds())
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub ip: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allow: bool,
}

/// Ungrouped dedup check with the configured window
pub async fn check(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CheckQuery>, QueryRejection>,
) -> AppResult<Json<CheckResponse>> {
    let Query(query) = extracted(query)?;
    let ip = required(&query.ip, "ip")?;

    let window = Duration::hours(i64::from(state.config.dedup.check_window_hours));
    let verdict = state
        .db
        .check_and_record(Ledger::Logs, &DedupKey::ip(ip), window, Utc::now())
        .await?;

    Ok(Json(CheckResponse { allow: verdict.allow }))
}

#[derive(Debug, Deserialize)]
pub struct IpQuery {
    pub ip: Option<String>,
    pub time: Option<i64>,
    #[serde(rename = "groupId")]
    pub group_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IpResponse {
    pub allow: bool,
    pub last_checked: Option<String>,
}

/// Grouped dedup check with a caller-chosen window
pub async fn ip(
    State(state): State<Arc<AppState>>,
    query: Result<Query<IpQuery>, QueryRejection>,
) -> AppResult<Json<IpResponse>> {
    let Query(query) = extracted(query)?;
    let raw_ip = required(&query.ip, "ip")?;
    let ip = parse_ip(raw_ip)?.to_string();
    let window = dedup_window(query.time, state.config.dedup.ip_window_hours)?;

    let now = Utc::now();
    let key = DedupKey::grouped(&ip, non_blank(&query.group_id));
    let verdict = state
        .db
        .check_and_record(Ledger::Records, &key, window, now)
        .await?;

    Ok(Json(IpResponse {
        allow: verdict.allow,
        last_checked: verdict.last_checked.map(|at| time_ago(now - at)),
    }))
}

#[derive(Debug, Deserialize)]
pub struct IpInfoQuery {
    pub ip: Option<String>,
    pub time: Option<i64>,
    #[serde(rename = "groupId")]
    pub group_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IpInfoResponse {
    pub ip: String,
    pub country_code: Option<String>,
    pub timezone: Option<String>,
    pub utc_offset: i64,
    pub languages: String,
    pub in_eu: bool,
    pub allow: bool,
}

/// Geolocate the caller (or `ip`) and run the grouped dedup check
pub async fn ipinfo(
    State(state): State<Arc<AppState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    query: Result<Query<IpInfoQuery>, QueryRejection>,
) -> AppResult<Json<IpInfoResponse>> {
    let Query(query) = extracted(query)?;

    let peer = connect.map(|ConnectInfo(addr)| addr.ip().to_string());
    let raw_ip = match non_blank(&query.ip) {
        Some(ip) => ip.to_string(),
        None => get_real_ip(&headers, peer.as_deref())
            .ok_or_else(|| AppError::validation("Missing query parameter 'ip'"))?,
    };
    let addr = parse_ip(&raw_ip)?;
    let ip = addr.to_string();
    let window = dedup_window(query.time, state.config.dedup.ipinfo_window_hours)?;

    // A miss degrades to defaults; the dedup check still runs
    let location = state.geoip.lookup(addr).unwrap_or_default();
    let country_code = location.country_code.as_deref();
    let time_zone = location.time_zone.as_deref();

    let key = DedupKey::grouped(&ip, non_blank(&query.group_id));
    let verdict = state
        .db
        .check_and_record(Ledger::Records, &key, window, Utc::now())
        .await?;

    Ok(Json(IpInfoResponse {
        utc_offset: state.countries.utc_offset_minutes(country_code, time_zone),
        languages: state.countries.languages(country_code),
        in_eu: locale::in_eu(country_code),
        allow: verdict.allow,
        country_code: location.country_code.clone(),
        timezone: location.time_zone.clone(),
        ip,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub time: Option<i64>,
}

/// Purge ledger rows older than `time` hours
pub async fn delete_old(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let Query(query) = extracted(query)?;
    let hours = window_hours(query.time, state.config.janitor.max_age_hours)?;
    let hours = u32::try_from(hours).map_err(|_| AppError::validation(format!("Invalid time '{}'", hours)))?;

    let report = jobs::run_janitor(&state.db, hours, Utc::now()).await?;
    Ok(Json(json!({ "message": report.message, "deleted": report.deleted })))
}

/// Purge with the configured default age
pub async fn delete_ips(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let report = jobs::run_janitor(&state.db, state.config.janitor.max_age_hours, Utc::now()).await?;
    Ok(Json(json!({ "message": report.message, "deleted": report.deleted })))
}

pub async fn info(State(state): State<Arc<AppState>>) -> AppResult<Json<Stats>> {
    Ok(Json(state.db.stats().await?))
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryResponse {
    pub total_ips: i64,
    pub devices: i64,
    pub offline_devices: i64,
}

/// Cached dashboard counts - 30 second TTL
#[cached(time = 30, key = "()", convert = r#"{ () }"#)]
async fn get_cached_summary(db: Database, offline_after: Duration) -> SummaryResponse {
    let (total_ips, devices, outdated) = tokio::join!(
        db.count_ip_records(),
        db.count_devices(),
        db.outdated_devices(offline_after, Utc::now())
    );

    SummaryResponse {
        total_ips: total_ips.unwrap_or_else(|e| {
            tracing::warn!("Failed to count IP records: {}", e);
            0
        }),
        devices: devices.unwrap_or_else(|e| {
            tracing::warn!("Failed to count devices: {}", e);
            0
        }),
        offline_devices: outdated.map(|d| d.len() as i64).unwrap_or_else(|e| {
            tracing::warn!("Failed to list outdated devices: {}", e);
            0
        }),
    }
}

/// Dashboard counts (cached for 30 seconds)
pub async fn summary(State(state): State<Arc<AppState>>) -> Json<SummaryResponse> {
    Json(get_cached_summary(state.db.clone(), state.config.offline_after()).await)
}

#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    pub id: Option<String>,
}

/// All devices, or the one matching `id` (empty list if unknown)
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DeviceQuery>, QueryRejection>,
) -> AppResult<Json<Vec<Device>>> {
    let Query(query) = extracted(query)?;
    let devices = match non_blank(&query.id) {
        Some(id) => state.db.get_device(id).await?.into_iter().collect(),
        None => state.db.list_devices().await?,
    };
    Ok(Json(devices))
}

fn device_payload(payload: Result<Json<DeviceUpdate>, JsonRejection>) -> AppResult<DeviceUpdate> {
    let Json(mut update) = extracted(payload)?;
    update.id = update.id.trim().to_string();
    if update.id.is_empty() {
        return Err(AppError::validation("Device id cannot be empty"));
    }
    Ok(update)
}

/// Insert or update a device from its heartbeat
pub async fn upsert_device(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DeviceUpdate>, JsonRejection>,
) -> AppResult<Json<Vec<Device>>> {
    let update = device_payload(payload)?;
    let device = state.db.upsert_device(&update, Utc::now()).await?;
    Ok(Json(vec![device]))
}

/// Update an existing device; 404 if it was never registered
pub async fn patch_device(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DeviceUpdate>, JsonRejection>,
) -> AppResult<Json<Vec<Device>>> {
    let update = device_payload(payload)?;
    match state.db.patch_device(&update, Utc::now()).await? {
        Some(device) => Ok(Json(vec![device])),
        None => Err(AppError::NotFound(format!("Device {} not found", update.id))),
    }
}

pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DeviceQuery>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let Query(query) = extracted(query)?;
    let id = required(&query.id, "id")?;

    if !state.db.delete_device(id).await? {
        return Err(AppError::NotFound(format!("Device {} not found", id)));
    }
    Ok(Json(json!({ "message": format!("Device {} deleted successfully", id) })))
}

#[derive(Debug, Deserialize)]
pub struct CountryQuery {
    pub countrys: Option<String>,
    pub proxy: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CountryResponse {
    pub proxy: String,
    pub country: String,
}

/// Round-robin country pick for a proxy
pub async fn country(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CountryQuery>, QueryRejection>,
) -> AppResult<Json<CountryResponse>> {
    let Query(query) = extracted(query)?;
    let proxy = required(&query.proxy, "proxy")?;
    let countries = parse_country_list(query.countrys.as_deref().unwrap_or_default());

    let country = state
        .rotation
        .next(proxy, &countries)
        .ok_or_else(|| AppError::validation("Query parameter 'countrys' must list at least one country"))?;

    Ok(Json(CountryResponse { proxy: proxy.to_string(), country }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_ago_picks_largest_unit() {
        assert_eq!(time_ago(Duration::seconds(42)), "42 seconds ago");
        assert_eq!(time_ago(Duration::seconds(61)), "1 minutes ago");
        assert_eq!(time_ago(Duration::minutes(150)), "2 hours ago");
        assert_eq!(time_ago(Duration::hours(49)), "2 days ago");
        assert_eq!(time_ago(Duration::seconds(-5)), "0 seconds ago");
    }

    #[test]
    fn window_must_be_positive() {
        assert_eq!(window_hours(None, 5).unwrap(), 5);
        assert_eq!(window_hours(Some(3), 5).unwrap(), 3);
        assert!(window_hours(Some(0), 5).is_err());
        assert!(window_hours(Some(-2), 5).is_err());
    }

    #[test]
    fn oversized_window_is_rejected() {
        assert_eq!(dedup_window(Some(48), 5).unwrap(), Duration::hours(48));
        assert!(dedup_window(Some(i64::MAX), 5).is_err());
        assert!(dedup_window(Some(3_000_000_000_000), 5).is_err());
    }
}
