use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{measurements, sensors, stations};

#[derive(Debug, Serialize)]
pub struct StationResponse {
    pub id: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub enabled: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<stations::Model> for StationResponse {
    fn from(s: stations::Model) -> Self {
        Self {
            id: s.id,
            name: s.name,
            latitude: s.latitude,
            longitude: s.longitude,
            elevation: s.elevation,
            enabled: s.enabled,
            last_updated: s.last_updated,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SensorResponse {
    pub sensor_key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub unit: String,
    pub position: Option<String>,
}

impl From<sensors::Model> for SensorResponse {
    fn from(s: sensors::Model) -> Self {
        Self {
            sensor_key: s.sensor_key,
            name: s.name,
            sensor_type: s.sensor_type,
            unit: s.unit,
            position: s.position,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReadingResponse {
    pub sensor_key: String,
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

impl From<measurements::Model> for ReadingResponse {
    fn from(m: measurements::Model) -> Self {
        Self {
            sensor_key: m.sensor_key,
            timestamp: m.timestamp,
            value: m.value,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StationsQuery {
    /// Only list stations enabled for collection.
    #[serde(default)]
    pub enabled: Option<bool>,
}

fn default_format() -> String {
    "json".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ReadingsQuery {
    /// Inclusive start (RFC 3339); defaults to 24 hours before `end`.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive end (RFC 3339); defaults to now.
    pub end: Option<DateTime<Utc>>,
    /// `json` (default) or `csv`.
    #[serde(default = "default_format")]
    pub format: String,
}

#[derive(Debug, Serialize)]
pub struct ReadingsResponse {
    pub station_id: String,
    pub sensor_key: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub readings: Vec<ReadingResponse>,
}
