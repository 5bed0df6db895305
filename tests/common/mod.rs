//! Shared fixtures: a throwaway SQLite store and a scripted vendor API.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::json;
use tempfile::TempDir;

use fieldclimate_db::entity::stations;
use fieldclimate_db::error::{AppError, AppResult};
use fieldclimate_db::fieldclimate::StationApi;
use fieldclimate_db::fieldclimate::models::{DataPage, SensorInfo, StationInfo};
use fieldclimate_db::storage;

/// Keeps the temporary directory alive for as long as the connection is used.
pub struct TestDb {
    pub db: DatabaseConnection,
    pub dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let db = storage::connect(&url).await.unwrap();
    TestDb { db, dir }
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, hour, minute, 0).unwrap()
}

pub async fn insert_station(
    db: &DatabaseConnection,
    id: &str,
    last_updated: Option<DateTime<Utc>>,
) -> stations::Model {
    stations::ActiveModel {
        id: Set(id.to_string()),
        name: Set(format!("Station {id}")),
        latitude: Set(Some(46.5)),
        longitude: Set(Some(6.6)),
        elevation: Set(None),
        enabled: Set(true),
        last_updated: Set(last_updated),
        metadata: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .unwrap()
}

pub fn sensor(key: &str, sensor_type: &str, unit: &str) -> SensorInfo {
    SensorInfo::from_json(json!({
        "key": key,
        "name": format!("Sensor {key}"),
        "type": sensor_type,
        "unit": unit,
    }))
    .unwrap()
}

/// In-process stand-in for the vendor API.
///
/// Holds a sensor list and a series of timestamped readings; `fetch_data`
/// serves them in ascending pages like the real endpoint.
#[derive(Default)]
pub struct ScriptedApi {
    pub sensors: Mutex<Vec<SensorInfo>>,
    /// timestamp -> (sensor key -> value)
    pub readings: Mutex<BTreeMap<DateTime<Utc>, BTreeMap<String, Option<f64>>>>,
    /// Zero-based indices of `fetch_data` calls that fail transiently.
    pub failing_fetches: Mutex<HashSet<usize>>,
    pub unknown_stations: Mutex<HashSet<String>>,
    pub fetch_windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>, usize)>>,
    pub sensor_list_calls: AtomicUsize,
    /// Serve everything in the window, like a vendor that disregards `limit`.
    pub ignore_limit: AtomicBool,
    fetch_calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn with_sensors(sensors: Vec<SensorInfo>) -> Self {
        let api = Self::default();
        *api.sensors.lock().unwrap() = sensors;
        api
    }

    /// Add a reading for every sensor key every `step_minutes` in `[from, to]`.
    pub fn add_series(
        &self,
        keys: &[&str],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step_minutes: i64,
    ) {
        let mut readings = self.readings.lock().unwrap();
        let mut ts = from;
        let mut n = 0.0;
        while ts <= to {
            let row = readings.entry(ts).or_default();
            for key in keys {
                row.insert((*key).to_string(), Some(n));
            }
            n += 1.0;
            ts += TimeDelta::minutes(step_minutes);
        }
    }

    pub fn fail_fetch(&self, call_index: usize) {
        self.failing_fetches.lock().unwrap().insert(call_index);
    }

    pub fn clear_failures(&self) {
        self.failing_fetches.lock().unwrap().clear();
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn check_station(&self, station_id: &str) -> AppResult<()> {
        if self.unknown_stations.lock().unwrap().contains(station_id) {
            return Err(AppError::StationNotFound(station_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StationApi for ScriptedApi {
    async fn station_info(&self, station_id: &str) -> AppResult<StationInfo> {
        self.check_station(station_id)?;
        StationInfo::from_json(json!({
            "name": { "original": station_id, "custom": format!("Vendor {station_id}") },
            "position": { "latitude": 46.52, "longitude": 6.57, "altitude": 400.0 }
        }))
    }

    async fn list_sensors(&self, station_id: &str) -> AppResult<Vec<SensorInfo>> {
        self.check_station(station_id)?;
        self.sensor_list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.sensors.lock().unwrap().clone())
    }

    async fn fetch_data(
        &self,
        station_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<DataPage> {
        self.check_station(station_id)?;
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_windows.lock().unwrap().push((from, to, limit));

        if self.failing_fetches.lock().unwrap().contains(&call) {
            return Err(AppError::transient("HTTP 503 Service Unavailable"));
        }

        if from > to {
            return Ok(DataPage::default());
        }
        let readings = self.readings.lock().unwrap();
        let page: Vec<_> = readings
            .range(from..=to)
            .take(if self.ignore_limit.load(Ordering::SeqCst) { usize::MAX } else { limit })
            .map(|(ts, row)| (*ts, row.clone()))
            .collect();

        let keys: BTreeSet<String> = page.iter().flat_map(|(_, row)| row.keys().cloned()).collect();
        let data: Vec<_> = keys
            .iter()
            .map(|key| {
                let values: Vec<_> = page
                    .iter()
                    .map(|(_, row)| row.get(key).copied().flatten())
                    .collect();
                json!({ "sensor_key": key, "values": values })
            })
            .collect();
        let dates: Vec<String> = page
            .iter()
            .map(|(ts, _)| ts.format("%Y-%m-%d %H:%M:%S").to_string())
            .collect();

        Ok(serde_json::from_value(json!({ "dates": dates, "data": data })).unwrap())
    }
}
