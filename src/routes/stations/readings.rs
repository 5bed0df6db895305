use axum::{
    Json,
    extract::{Path, Query, State},
    http::header::{self, HeaderValue},
    response::{IntoResponse, Response},
};
use chrono::{TimeDelta, Utc};

use crate::common::AppState;
use crate::entity::measurements;
use crate::error::{AppError, AppResult};
use crate::routes::resolve_station;
use crate::storage::queries;

use super::types::{ReadingResponse, ReadingsQuery, ReadingsResponse};

/// Readings of one sensor in an inclusive time range, as JSON or CSV.
pub async fn sensor_readings(
    State(state): State<AppState>,
    Path((station_id, sensor_key)): Path<(String, String)>,
    Query(query): Query<ReadingsQuery>,
) -> AppResult<Response> {
    let station = resolve_station(&state.db, &station_id).await?;

    let end = query.end.unwrap_or_else(Utc::now);
    let start = query.start.unwrap_or(end - TimeDelta::hours(24));
    if start > end {
        return Err(AppError::BadRequest("start must not be after end".to_string()));
    }

    let sensors = queries::sensors_for_station(&state.db, &station.id).await?;
    if !sensors.iter().any(|s| s.sensor_key == sensor_key) {
        return Err(AppError::NotFound(format!(
            "Sensor '{sensor_key}' not found on station '{}'",
            station.id
        )));
    }

    let rows = queries::get_range(&state.db, &station.id, &sensor_key, start, end).await?;
    tracing::debug!(station_id = %station.id, sensor_key = %sensor_key, count = rows.len(), "Serving readings");

    match query.format.to_lowercase().as_str() {
        "json" => Ok(Json(ReadingsResponse {
            station_id: station.id,
            sensor_key,
            start,
            end,
            readings: rows.into_iter().map(ReadingResponse::from).collect(),
        })
        .into_response()),
        "csv" => build_csv_response(&rows),
        other => Err(AppError::BadRequest(format!(
            "Unsupported format '{other}' (expected json or csv)"
        ))),
    }
}

fn build_csv_response(rows: &[measurements::Model]) -> AppResult<Response> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["timestamp", "value"])
        .map_err(|e| AppError::Internal(e.to_string()))?;
    for row in rows {
        let value = row.value.map(|v| v.to_string()).unwrap_or_default();
        writer
            .write_record([row.timestamp.to_rfc3339(), value])
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }
    let body = writer
        .into_inner()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/csv"))],
        body,
    )
        .into_response())
}
