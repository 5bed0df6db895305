//! Read-only HTTP API over the store. Nothing here writes.

pub mod health;
pub mod stations;
pub mod stats;

use std::time::Duration;

use axum::{Router, error_handling::HandleErrorLayer, http::StatusCode, routing::get};
use sea_orm::DatabaseConnection;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::common::AppState;
use crate::entity::stations as station_entity;
use crate::error::{AppError, AppResult};
use crate::storage::queries;

/// Upper bound on concurrently served API requests.
const MAX_CONCURRENT_REQUESTS: usize = 64;

/// Look up a stored station by its vendor id.
///
/// # Errors
///
/// Returns `AppError::NotFound` if no such station is stored.
pub async fn resolve_station(
    db: &DatabaseConnection,
    station_id: &str,
) -> AppResult<station_entity::Model> {
    queries::get_station(db, station_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Station '{station_id}' not found")))
}

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/stations", get(stations::list_stations))
        .route("/stations/{station_id}", get(stations::get_station))
        .route("/stations/{station_id}/sensors", get(stations::list_station_sensors))
        .route("/stations/{station_id}/latest", get(stations::latest_readings))
        .route(
            "/stations/{station_id}/sensors/{sensor_key}/readings",
            get(stations::sensor_readings),
        )
        .route("/stats", get(stats::get_stats))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|_: tower::BoxError| async {
                    StatusCode::REQUEST_TIMEOUT
                }))
                .timeout(Duration::from_secs(30))
                .concurrency_limit(MAX_CONCURRENT_REQUESTS),
        );

    Router::new()
        .nest("/api", api_routes)
        .route("/healthz", get(health::healthz))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
