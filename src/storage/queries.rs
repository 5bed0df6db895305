use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Statement,
};
use serde::Serialize;

use crate::entity::{measurements, sensors, stations};
use crate::error::AppResult;

/// All stations, optionally only the enabled ones, ordered by id.
///
/// # Errors
///
/// Returns `AppError::Database` if the query fails.
pub async fn list_stations<C: ConnectionTrait>(
    db: &C,
    enabled_only: bool,
) -> AppResult<Vec<stations::Model>> {
    let mut query = stations::Entity::find().order_by_asc(stations::Column::Id);
    if enabled_only {
        query = query.filter(stations::Column::Enabled.eq(true));
    }
    Ok(query.all(db).await?)
}

/// # Errors
///
/// Returns `AppError::Database` if the query fails.
pub async fn get_station<C: ConnectionTrait>(
    db: &C,
    station_id: &str,
) -> AppResult<Option<stations::Model>> {
    Ok(stations::Entity::find_by_id(station_id.to_string()).one(db).await?)
}

/// # Errors
///
/// Returns `AppError::Database` if the query fails.
pub async fn sensors_for_station<C: ConnectionTrait>(
    db: &C,
    station_id: &str,
) -> AppResult<Vec<sensors::Model>> {
    Ok(sensors::Entity::find()
        .filter(sensors::Column::StationId.eq(station_id))
        .order_by_asc(sensors::Column::SensorKey)
        .all(db)
        .await?)
}

/// Newest measurement of each sensor of a station.
///
/// # Errors
///
/// Returns `AppError::Database` if the query fails.
pub async fn get_latest<C: ConnectionTrait>(
    db: &C,
    station_id: &str,
) -> AppResult<Vec<measurements::Model>> {
    let sql = "SELECT m.station_id, m.sensor_key, m.timestamp, m.value \
               FROM measurements m \
               JOIN (SELECT sensor_key, MAX(timestamp) AS newest \
                     FROM measurements WHERE station_id = ? GROUP BY sensor_key) latest \
                 ON m.sensor_key = latest.sensor_key AND m.timestamp = latest.newest \
               WHERE m.station_id = ? \
               ORDER BY m.sensor_key";

    Ok(measurements::Entity::find()
        .from_raw_sql(Statement::from_sql_and_values(
            db.get_database_backend(),
            sql,
            [station_id.into(), station_id.into()],
        ))
        .all(db)
        .await?)
}

/// Measurements of one sensor with `start <= timestamp <= end`, ascending.
///
/// # Errors
///
/// Returns `AppError::Database` if the query fails.
pub async fn get_range<C: ConnectionTrait>(
    db: &C,
    station_id: &str,
    sensor_key: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> AppResult<Vec<measurements::Model>> {
    Ok(measurements::Entity::find()
        .filter(measurements::Column::StationId.eq(station_id))
        .filter(measurements::Column::SensorKey.eq(sensor_key))
        .filter(measurements::Column::Timestamp.gte(start))
        .filter(measurements::Column::Timestamp.lte(end))
        .order_by_asc(measurements::Column::Timestamp)
        .all(db)
        .await?)
}

#[derive(Debug, Clone, Serialize)]
pub struct StationStats {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub sensor_count: u64,
    pub measurement_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub station_count: u64,
    pub enabled_station_count: u64,
    pub sensor_count: u64,
    pub measurement_count: u64,
    pub database_size_bytes: Option<u64>,
    pub stations: Vec<StationStats>,
}

/// Row counts overall and per station. `database_path` is only used for the
/// file size.
///
/// # Errors
///
/// Returns `AppError::Database` if a query fails.
pub async fn stats<C: ConnectionTrait>(
    db: &C,
    database_path: Option<&Path>,
) -> AppResult<StorageStats> {
    let station_rows = list_stations(db, false).await?;

    let sensor_counts = count_by_station::<sensors::Entity, _>(db, sensors::Column::StationId).await?;
    let measurement_counts =
        count_by_station::<measurements::Entity, _>(db, measurements::Column::StationId).await?;

    let per_station: Vec<StationStats> = station_rows
        .into_iter()
        .map(|s| StationStats {
            sensor_count: sensor_counts.get(&s.id).copied().unwrap_or(0),
            measurement_count: measurement_counts.get(&s.id).copied().unwrap_or(0),
            id: s.id,
            name: s.name,
            enabled: s.enabled,
            last_updated: s.last_updated,
        })
        .collect();

    Ok(StorageStats {
        station_count: per_station.len() as u64,
        enabled_station_count: per_station.iter().filter(|s| s.enabled).count() as u64,
        sensor_count: sensors::Entity::find().count(db).await?,
        measurement_count: measurements::Entity::find().count(db).await?,
        database_size_bytes: database_path.and_then(super::file_size),
        stations: per_station,
    })
}

async fn count_by_station<E, C>(db: &C, station_column: E::Column) -> AppResult<HashMap<String, u64>>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    let rows: Vec<(String, i64)> = E::find()
        .select_only()
        .column(station_column)
        .column_as(Expr::col(station_column).count(), "n")
        .group_by(station_column)
        .into_tuple()
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(id, n)| (id, u64::try_from(n).unwrap_or(0)))
        .collect())
}
