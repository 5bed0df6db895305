use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::common::AppState;
use crate::error::AppResult;
use crate::routes::resolve_station;
use crate::storage::queries;

use super::types::{ReadingResponse, SensorResponse, StationResponse, StationsQuery};

/// List stations, optionally only enabled ones.
pub async fn list_stations(
    State(state): State<AppState>,
    Query(query): Query<StationsQuery>,
) -> AppResult<Json<Vec<StationResponse>>> {
    let stations = queries::list_stations(&state.db, query.enabled.unwrap_or(false)).await?;
    Ok(Json(stations.into_iter().map(StationResponse::from).collect()))
}

pub async fn get_station(
    State(state): State<AppState>,
    Path(station_id): Path<String>,
) -> AppResult<Json<StationResponse>> {
    let station = resolve_station(&state.db, &station_id).await?;
    Ok(Json(station.into()))
}

pub async fn list_station_sensors(
    State(state): State<AppState>,
    Path(station_id): Path<String>,
) -> AppResult<Json<Vec<SensorResponse>>> {
    let station = resolve_station(&state.db, &station_id).await?;
    let sensors = queries::sensors_for_station(&state.db, &station.id).await?;
    Ok(Json(sensors.into_iter().map(SensorResponse::from).collect()))
}

/// Newest reading of every sensor of a station.
pub async fn latest_readings(
    State(state): State<AppState>,
    Path(station_id): Path<String>,
) -> AppResult<Json<Vec<ReadingResponse>>> {
    let station = resolve_station(&state.db, &station_id).await?;
    let latest = queries::get_latest(&state.db, &station.id).await?;
    Ok(Json(latest.into_iter().map(ReadingResponse::from).collect()))
}
