//! Web server module

pub mod middleware;
pub mod routes;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::Config;
use crate::country::CountryRotation;
use crate::db::Database;
use crate::geoip::SharedGeoIp;
use crate::locale::CountryData;
use middleware::RequestLoggingLayer;

pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub geoip: SharedGeoIp,
    pub countries: CountryData,
    pub rotation: CountryRotation,
}

impl AppState {
    pub fn new(config: Config, db: Database, geoip: SharedGeoIp, countries: CountryData) -> Self {
        Self {
            config,
            db,
            geoip,
            countries,
            rotation: CountryRotation::new(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(routes::health))
        // IP dedup family
        .route("/check", get(routes::check))
        .route("/ip", get(routes::ip))
        .route("/ipinfo", get(routes::ipinfo))
        .route("/delete", get(routes::delete_old))
        .route("/delete-ips", post(routes::delete_ips))
        .route("/info", get(routes::info))
        .route("/summary", get(routes::summary))
        // Device registry
        .route(
            "/device",
            get(routes::list_devices)
                .post(routes::upsert_device)
                .patch(routes::patch_device)
                .delete(routes::delete_device),
        )
        .route("/country", get(routes::country))
        .layer(CorsLayer::permissive())
        .layer(RequestLoggingLayer::new())
        .with_state(state)
}

pub async fn start_server(config: &Config, state: Arc<AppState>, shutdown: CancellationToken) -> Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Web server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>()
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    Ok(())
}
