use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Response from `GET /station/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct StationInfo {
    #[serde(default)]
    pub name: Option<StationName>,
    #[serde(default)]
    pub position: Option<Position>,
    /// The full vendor document, stored as station metadata.
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl StationInfo {
    /// Decode a station document, keeping the raw JSON alongside.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Permanent` if the document does not have the expected shape.
    pub fn from_json(raw: serde_json::Value) -> AppResult<Self> {
        let mut info: Self = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::Permanent(format!("Malformed station document: {e}")))?;
        info.raw = raw;
        Ok(info)
    }

    /// Custom name if the owner set one, otherwise the vendor name.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        self.name.as_ref().and_then(StationName::preferred)
    }
}

/// Stations are named either by a plain string or by `{original, custom}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StationName {
    Plain(String),
    Named {
        #[serde(default)]
        original: Option<String>,
        #[serde(default)]
        custom: Option<String>,
    },
}

impl StationName {
    fn preferred(&self) -> Option<String> {
        match self {
            Self::Plain(name) => non_blank(Some(name)),
            Self::Named { original, custom } => {
                non_blank(custom.as_ref()).or_else(|| non_blank(original.as_ref()))
            }
        }
    }
}

fn non_blank(s: Option<&String>) -> Option<String> {
    s.map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Position {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
}

/// One entry of `GET /station/{id}/sensors`.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInfo {
    pub key: String,
    pub name: Option<String>,
    pub sensor_type: Option<String>,
    pub unit: Option<String>,
    pub position: Option<String>,
    pub raw: serde_json::Value,
}

/// Vendor identifiers arrive as strings or bare numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Ident {
    Text(String),
    Number(serde_json::Number),
}

impl From<Ident> for String {
    fn from(ident: Ident) -> Self {
        match ident {
            Ident::Text(s) => s,
            Ident::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSensor {
    #[serde(default)]
    key: Option<Ident>,
    #[serde(default)]
    id: Option<Ident>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    sensor_type: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    position: Option<Ident>,
}

impl SensorInfo {
    /// Decode a sensor entry; the identifier is `key`, falling back to `id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Permanent` if the entry is not an object or has no identifier.
    pub fn from_json(raw: serde_json::Value) -> AppResult<Self> {
        let parsed: RawSensor = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::Permanent(format!("Malformed sensor entry: {e}")))?;

        let key: String = parsed
            .key
            .or(parsed.id)
            .map(String::from)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Permanent("Sensor entry without key or id".to_string()))?;

        Ok(Self {
            key,
            name: parsed.name,
            sensor_type: parsed.sensor_type,
            unit: parsed.unit,
            position: parsed.position.map(String::from),
            raw,
        })
    }
}

/// Response from `GET /data/{id}/raw/from/{from}/to/{to}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataPage {
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub data: Vec<SensorSeries>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorSeries {
    #[serde(alias = "key")]
    pub sensor_key: String,
    #[serde(default)]
    pub values: Vec<Sample>,
}

/// A value slot: a number, a numeric string, or a gap.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "RawSample")]
pub struct Sample(pub Option<f64>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSample {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl From<RawSample> for Sample {
    fn from(raw: RawSample) -> Self {
        match raw {
            RawSample::Number(n) => Self(Some(n).filter(|v| v.is_finite())),
            RawSample::Text(s) => Self(s.trim().parse::<f64>().ok().filter(|v| v.is_finite())),
            RawSample::Other(_) => Self(None),
        }
    }
}

/// One decoded measurement from a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub sensor_key: String,
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

impl DataPage {
    /// Parsed page timestamps, in the order the vendor sent them.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Permanent` if any date cannot be parsed.
    pub fn timestamps(&self) -> AppResult<Vec<DateTime<Utc>>> {
        self.dates
            .iter()
            .map(|raw| {
                parse_vendor_time(raw)
                    .ok_or_else(|| AppError::Permanent(format!("Unparseable date in data page: '{raw}'")))
            })
            .collect()
    }

    /// Flatten the page into one reading per (sensor, date).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Permanent` for unparseable dates or a series whose
    /// length differs from the date list.
    pub fn readings(&self) -> AppResult<Vec<Reading>> {
        let timestamps = self.timestamps()?;
        let mut readings = Vec::with_capacity(timestamps.len() * self.data.len());

        for series in &self.data {
            if series.values.len() != timestamps.len() {
                return Err(AppError::Permanent(format!(
                    "Sensor {} has {} values for {} dates",
                    series.sensor_key,
                    series.values.len(),
                    timestamps.len()
                )));
            }
            readings.extend(timestamps.iter().zip(&series.values).map(|(ts, sample)| Reading {
                sensor_key: series.sensor_key.clone(),
                timestamp: *ts,
                value: sample.0,
            }));
        }

        Ok(readings)
    }
}

/// Parse a vendor timestamp: RFC 3339, or `YYYY-MM-DD HH:MM:SS` in UTC.
#[must_use]
pub fn parse_vendor_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
