//! Station and sensor metadata: registration from configuration and sensor
//! discovery against the vendor's sensor list.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};

use crate::config::StationConfig;
use crate::entity::{sensors, stations};
use crate::error::{AppError, AppResult};
use crate::fieldclimate::StationApi;
use crate::fieldclimate::models::SensorInfo;

/// What a discovery pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Stored keys the vendor no longer lists. They are kept.
    pub missing: Vec<String>,
}

/// Map a vendor sensor type onto the category tags used in the store.
///
/// Missing or blank types become `unknown`; unrecognised ones are kept,
/// lower-cased.
#[must_use]
pub fn canonical_sensor_type(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return "unknown".to_string();
    };
    let lowered = raw.to_lowercase();

    let patterns: &[(&str, &[&str])] = &[
        ("leaf_wetness", &["leaf wetness", "leaf_wetness", "leafwetness"]),
        ("soil_moisture", &["soil moisture", "soil_moisture", "volumetric"]),
        ("soil_temperature", &["soil temperature", "soil_temperature"]),
        ("dew_point", &["dew point", "dew_point", "dewpoint"]),
        ("temperature", &["temperature", "temp"]),
        ("humidity", &["humidity", "rh"]),
        ("rain", &["rain", "precipitation", "precip"]),
        ("wind_direction", &["wind direction", "wind_direction", "wind dir"]),
        ("wind", &["wind", "gust"]),
        ("pressure", &["pressure", "barometer"]),
        ("radiation", &["radiation", "solar", "irradiance", "par"]),
        ("battery", &["battery", "batt"]),
        ("evapotranspiration", &["evapotranspiration", "et0"]),
    ];

    for (canonical, keywords) in patterns {
        if keywords.iter().any(|k| matches_keyword(&lowered, k)) {
            return (*canonical).to_string();
        }
    }

    lowered
}

/// Short keywords must match a whole word; longer ones may match anywhere.
fn matches_keyword(haystack: &str, keyword: &str) -> bool {
    if keyword.len() <= 3 {
        haystack
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == keyword)
    } else {
        haystack.contains(keyword)
    }
}

struct NormalizedSensor {
    key: String,
    name: String,
    sensor_type: String,
    unit: String,
    position: Option<String>,
    metadata: serde_json::Value,
}

impl From<SensorInfo> for NormalizedSensor {
    fn from(info: SensorInfo) -> Self {
        Self {
            name: info
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| info.key.clone()),
            sensor_type: canonical_sensor_type(info.sensor_type.as_deref()),
            unit: info.unit.map(|u| u.trim().to_string()).unwrap_or_default(),
            position: info.position,
            metadata: info.raw,
            key: info.key,
        }
    }
}

impl NormalizedSensor {
    fn differs_from(&self, stored: &sensors::Model) -> bool {
        self.name != stored.name
            || self.sensor_type != stored.sensor_type
            || self.unit != stored.unit
            || self.position != stored.position
    }
}

/// Fetch the vendor's sensor list for a registered station and reconcile it
/// with the stored sensors in one transaction.
///
/// # Errors
///
/// - `AppError::NotFound` if the station is not registered locally
/// - `AppError::StationNotFound` if the vendor does not know the station
/// - any transport or database error
pub async fn discover(
    db: &DatabaseConnection,
    api: &dyn StationApi,
    station_id: &str,
) -> AppResult<DiscoveryReport> {
    if stations::Entity::find_by_id(station_id.to_string())
        .one(db)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound(format!("Station {station_id} is not registered")));
    }

    let vendor = api.list_sensors(station_id).await?;

    let mut seen = HashSet::new();
    let incoming: Vec<NormalizedSensor> = vendor
        .into_iter()
        .map(NormalizedSensor::from)
        .filter(|s| {
            let first = seen.insert(s.key.clone());
            if !first {
                tracing::warn!(station_id, sensor_key = %s.key, "Duplicate sensor key in vendor list");
            }
            first
        })
        .collect();

    let txn = db.begin().await?;
    let now = Utc::now();

    let mut existing: HashMap<String, sensors::Model> = sensors::Entity::find()
        .filter(sensors::Column::StationId.eq(station_id))
        .all(&txn)
        .await?
        .into_iter()
        .map(|s| (s.sensor_key.clone(), s))
        .collect();

    let mut report = DiscoveryReport::default();

    for sensor in incoming {
        match existing.remove(&sensor.key) {
            None => {
                tracing::debug!(station_id, sensor_key = %sensor.key, sensor_type = %sensor.sensor_type, "New sensor");
                sensors::ActiveModel {
                    station_id: Set(station_id.to_string()),
                    sensor_key: Set(sensor.key),
                    name: Set(sensor.name),
                    sensor_type: Set(sensor.sensor_type),
                    unit: Set(sensor.unit),
                    position: Set(sensor.position),
                    metadata: Set(Some(sensor.metadata)),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
                report.inserted += 1;
            }
            Some(stored) if sensor.differs_from(&stored) => {
                tracing::debug!(station_id, sensor_key = %sensor.key, "Sensor metadata changed");
                let mut active: sensors::ActiveModel = stored.into();
                active.name = Set(sensor.name);
                active.sensor_type = Set(sensor.sensor_type);
                active.unit = Set(sensor.unit);
                active.position = Set(sensor.position);
                active.metadata = Set(Some(sensor.metadata));
                active.updated_at = Set(now);
                active.update(&txn).await?;
                report.updated += 1;
            }
            Some(_) => report.unchanged += 1,
        }
    }

    txn.commit().await?;

    report.missing = existing.into_keys().collect();
    report.missing.sort();

    if !report.missing.is_empty() {
        tracing::warn!(
            station_id,
            missing = ?report.missing,
            "Stored sensors absent from vendor list; keeping them"
        );
    }
    tracing::info!(
        station_id,
        inserted = report.inserted,
        updated = report.updated,
        unchanged = report.unchanged,
        "Sensor discovery complete"
    );

    Ok(report)
}

/// Make sure a configured station exists locally with the configured
/// `enabled` flag. New stations are looked up at the vendor and their sensors
/// discovered.
///
/// Returns `true` if the station was newly registered.
///
/// # Errors
///
/// `AppError::StationNotFound` if the vendor does not know a new station, or
/// any transport or database error.
pub async fn register_station(
    db: &DatabaseConnection,
    api: &dyn StationApi,
    config: &StationConfig,
) -> AppResult<bool> {
    if let Some(stored) = stations::Entity::find_by_id(config.id.clone()).one(db).await? {
        let rename = config.name.as_ref().filter(|n| **n != stored.name).cloned();
        if stored.enabled != config.enabled || rename.is_some() {
            tracing::info!(
                station_id = %config.id,
                enabled = config.enabled,
                "Syncing station settings from configuration"
            );
            let mut active: stations::ActiveModel = stored.into();
            active.enabled = Set(config.enabled);
            if let Some(name) = rename {
                active.name = Set(name);
            }
            active.update(db).await?;
        }
        return Ok(false);
    }

    let info = api.station_info(&config.id).await?;
    let position = info.position.clone().unwrap_or_default();
    let name = config
        .name
        .clone()
        .or_else(|| info.display_name())
        .unwrap_or_else(|| config.id.clone());

    stations::ActiveModel {
        id: Set(config.id.clone()),
        name: Set(name.clone()),
        latitude: Set(position.latitude),
        longitude: Set(position.longitude),
        elevation: Set(position.altitude),
        enabled: Set(config.enabled),
        last_updated: Set(None),
        metadata: Set(Some(info.raw)),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await?;

    tracing::info!(station_id = %config.id, name = %name, "Registered station");

    discover(db, api, &config.id).await?;
    Ok(true)
}

/// Register every configured station, collecting failures instead of stopping.
pub async fn register_configured(
    db: &DatabaseConnection,
    api: &dyn StationApi,
    configured: &[StationConfig],
) -> Vec<(String, AppError)> {
    let mut failures = Vec::new();
    for station in configured {
        if let Err(e) = register_station(db, api, station).await {
            tracing::error!(station_id = %station.id, error = %e, "Failed to register station");
            failures.push((station.id.clone(), e));
        }
    }
    failures
}
