use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::config::{
    Config, ConfigError, StationConfig, check_backfill_days, is_valid_station_id,
};
use crate::entity::{measurements, stations};
use crate::error::{AppError, AppResult};
use crate::fieldclimate::StationApi;
use crate::storage::{self, queries};
use crate::sync::registry;

/// Collection knobs that come from configuration.
#[derive(Debug, Clone, Copy)]
pub struct CollectSettings {
    pub backfill_days: i64,
    pub batch_size: usize,
}

impl From<&Config> for CollectSettings {
    fn from(config: &Config) -> Self {
        Self {
            backfill_days: config.backfill_days,
            batch_size: config.batch_size,
        }
    }
}

/// Per-invocation overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectOptions {
    /// Fetch from `now - days` regardless of `last_updated`.
    pub backfill_days: Option<i64>,
    /// Re-run sensor discovery before fetching.
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    /// Some batches committed before an error stopped the station.
    Partial,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StationReport {
    pub station_id: String,
    pub outcome: Outcome,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub measurements_stored: u64,
    pub batches_committed: usize,
    pub sensors_discovered: usize,
    /// Readings dropped because their sensor key is unknown even after discovery.
    pub readings_skipped: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

impl StationReport {
    fn new(station_id: &str) -> Self {
        Self {
            station_id: station_id.to_string(),
            outcome: Outcome::Succeeded,
            window_start: None,
            window_end: None,
            measurements_stored: 0,
            batches_committed: 0,
            sensors_discovered: 0,
            readings_skipped: 0,
            last_updated: None,
            errors: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    fn failed(station_id: &str, error: &AppError) -> Self {
        let mut report = Self::new(station_id);
        report.record(error);
        report.outcome = Outcome::Failed;
        report
    }

    fn record(&mut self, error: &AppError) {
        self.errors.push(format!("{}: {error}", error.kind()));
    }

    fn finish(mut self, started: Instant) -> Self {
        self.outcome = match (self.errors.is_empty(), self.batches_committed) {
            (true, _) => Outcome::Succeeded,
            (false, 0) => Outcome::Failed,
            (false, _) => Outcome::Partial,
        };
        self.elapsed = started.elapsed();
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub stations: Vec<StationReport>,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

impl RunSummary {
    #[must_use]
    pub fn count(&self, outcome: Outcome) -> usize {
        self.stations.iter().filter(|r| r.outcome == outcome).count()
    }

    #[must_use]
    pub fn measurements_stored(&self) -> u64 {
        self.stations.iter().map(|r| r.measurements_stored).sum()
    }

    /// Whether any station stored nothing because of an error.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.count(Outcome::Failed) > 0
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Start of the fetch window for a station at `now`.
///
/// # Errors
///
/// Returns `AppError::Config` if the backfill length is outside
/// `0..=MAX_BACKFILL_DAYS`.
pub fn window_start(
    station: &stations::Model,
    settings: CollectSettings,
    options: CollectOptions,
    now: DateTime<Utc>,
) -> AppResult<DateTime<Utc>> {
    let backfill = |name: &'static str, days: i64| -> AppResult<DateTime<Utc>> {
        let days = check_backfill_days(name, days)?;
        TimeDelta::try_days(days)
            .and_then(|span| now.checked_sub_signed(span))
            .ok_or_else(|| {
                AppError::Config(ConfigError::Invalid {
                    name,
                    reason: format!("{days} days before {now} is out of range"),
                })
            })
    };

    match (options.backfill_days, station.last_updated) {
        (Some(days), _) => backfill("--days", days),
        (None, Some(last)) => Ok(last + TimeDelta::seconds(1)),
        (None, None) => backfill("BACKFILL_DAYS", settings.backfill_days),
    }
}

/// Collect one station's measurements up to `now`, page by page.
///
/// Never returns an error: failures are recorded in the report, and every
/// page committed before the failure stays committed.
pub async fn collect_station(
    db: &DatabaseConnection,
    api: &dyn StationApi,
    station: &stations::Model,
    settings: CollectSettings,
    options: CollectOptions,
    now: DateTime<Utc>,
) -> StationReport {
    let started = Instant::now();
    let mut report = StationReport::new(&station.id);
    report.last_updated = station.last_updated;

    if let Err(e) = fetch_window(db, api, station, settings, options, now, &mut report).await {
        tracing::error!(
            station_id = %station.id,
            error = %e,
            batches_committed = report.batches_committed,
            "Station collection stopped"
        );
        report.record(&e);
    }

    let report = report.finish(started);
    tracing::info!(
        station_id = %station.id,
        outcome = %report.outcome,
        stored = report.measurements_stored,
        batches = report.batches_committed,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Station collection finished"
    );
    report
}

async fn fetch_window(
    db: &DatabaseConnection,
    api: &dyn StationApi,
    station: &stations::Model,
    settings: CollectSettings,
    options: CollectOptions,
    now: DateTime<Utc>,
    report: &mut StationReport,
) -> AppResult<()> {
    let station_id = station.id.as_str();
    let start = window_start(station, settings, options, now)?;
    report.window_start = Some(start);
    report.window_end = Some(now);

    if start > now {
        tracing::debug!(station_id, "Empty fetch window, nothing to do");
        return Ok(());
    }

    let mut known = known_sensor_keys(db, station_id).await?;
    if known.is_empty() || options.force_refresh {
        let discovery = registry::discover(db, api, station_id).await?;
        report.sensors_discovered += discovery.inserted;
        known = known_sensor_keys(db, station_id).await?;
    }

    tracing::info!(station_id, from = %start, to = %now, "Collecting measurements");

    let batch_size = settings.batch_size.max(1);
    let mut rediscovered = false;
    let mut warned: HashSet<String> = HashSet::new();
    let mut cursor = start;

    loop {
        let page = api.fetch_data(station_id, cursor, now, batch_size).await?;
        let timestamps = page.timestamps()?;
        let Some(&page_last) = timestamps.iter().max() else {
            break;
        };
        let readings = page.readings()?;

        let has_unknown = readings.iter().any(|r| !known.contains(&r.sensor_key));
        if has_unknown && !rediscovered {
            rediscovered = true;
            tracing::info!(station_id, "Page contains unregistered sensors, re-running discovery");
            match registry::discover(db, api, station_id).await {
                Ok(discovery) => {
                    report.sensors_discovered += discovery.inserted;
                    known = known_sensor_keys(db, station_id).await?;
                }
                Err(e) => {
                    tracing::warn!(station_id, error = %e, "Discovery for new sensor keys failed");
                    report.record(&e);
                }
            }
        }

        let mut rows = Vec::with_capacity(readings.len());
        for reading in readings {
            if known.contains(&reading.sensor_key) {
                rows.push(measurements::Model {
                    station_id: station_id.to_string(),
                    sensor_key: reading.sensor_key,
                    timestamp: reading.timestamp,
                    value: reading.value,
                });
            } else {
                report.readings_skipped += 1;
                if warned.insert(reading.sensor_key.clone()) {
                    tracing::warn!(
                        station_id,
                        sensor_key = %reading.sensor_key,
                        "Skipping readings for unregistered sensor"
                    );
                }
            }
        }

        // The vendor may return more than `limit` timestamps; commit at most
        // `batch_size` of them per transaction.
        let mut bounds = timestamps.clone();
        bounds.sort_unstable();
        bounds.dedup();
        for chunk in bounds.chunks(batch_size) {
            let (first, last) = (chunk[0], chunk[chunk.len() - 1]);
            let batch: Vec<measurements::Model> = rows
                .iter()
                .filter(|r| r.timestamp >= first && r.timestamp <= last)
                .cloned()
                .collect();

            let commit = storage::commit_batch(db, station_id, &batch).await?;
            report.batches_committed += 1;
            report.measurements_stored += commit.stored;
            report.last_updated = commit.last_updated;
        }

        if timestamps.len() < batch_size {
            break;
        }
        let next = page_last + TimeDelta::seconds(1);
        if next <= cursor {
            return Err(AppError::Permanent(format!(
                "Data page for {station_id} did not advance past {cursor}"
            )));
        }
        cursor = next;
        if cursor > now {
            break;
        }
    }

    Ok(())
}

async fn known_sensor_keys(db: &DatabaseConnection, station_id: &str) -> AppResult<HashSet<String>> {
    Ok(queries::sensors_for_station(db, station_id)
        .await?
        .into_iter()
        .map(|s| s.sensor_key)
        .collect())
}

/// Register configured stations, then collect every enabled station in turn.
///
/// A station's failure never stops the others.
///
/// # Errors
///
/// Returns `AppError::Database` only if the station list itself cannot be read.
pub async fn run_all(
    db: &DatabaseConnection,
    api: &dyn StationApi,
    config: &Config,
) -> AppResult<RunSummary> {
    let started = Instant::now();
    let settings = CollectSettings::from(config);
    let mut summary = RunSummary::default();

    // A station that failed registration but is already stored is still collected.
    for (station_id, error) in registry::register_configured(db, api, &config.stations).await {
        if queries::get_station(db, &station_id).await?.is_none() {
            summary.stations.push(StationReport::failed(&station_id, &error));
        }
    }

    let stations = queries::list_stations(db, true).await?;
    tracing::info!(count = stations.len(), "Starting collection run");

    for station in &stations {
        let report =
            collect_station(db, api, station, settings, CollectOptions::default(), Utc::now())
                .await;
        summary.stations.push(report);
    }

    if config.optimize_after_collection
        && let Err(e) = storage::optimize(db).await
    {
        tracing::warn!(error = %e, "Database optimization failed");
    }

    summary.elapsed = started.elapsed();
    tracing::info!(
        succeeded = summary.count(Outcome::Succeeded),
        partial = summary.count(Outcome::Partial),
        failed = summary.count(Outcome::Failed),
        stored = summary.measurements_stored(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Collection run finished"
    );

    Ok(summary)
}

/// Collect a single station, registering it first if it is not stored yet.
///
/// # Errors
///
/// Returns `AppError::BadRequest` for a malformed station id, or the
/// registration error if an unknown station cannot be registered.
/// Collection errors are reported in the returned [`StationReport`].
pub async fn run_station(
    db: &DatabaseConnection,
    api: &dyn StationApi,
    config: &Config,
    station_id: &str,
    options: CollectOptions,
) -> AppResult<StationReport> {
    if !is_valid_station_id(station_id) {
        return Err(AppError::BadRequest(format!(
            "Invalid station id '{station_id}': only letters, digits, '_' and '-' are allowed"
        )));
    }

    let station = match queries::get_station(db, station_id).await? {
        Some(station) => station,
        None => {
            let configured = config
                .stations
                .iter()
                .find(|s| s.id == station_id)
                .cloned()
                .unwrap_or_else(|| StationConfig {
                    id: station_id.to_string(),
                    name: None,
                    enabled: true,
                });
            registry::register_station(db, api, &configured).await?;
            queries::get_station(db, station_id)
                .await?
                .ok_or_else(|| AppError::Internal(format!("Station {station_id} vanished after registration")))?
        }
    };

    let report = collect_station(
        db,
        api,
        &station,
        CollectSettings::from(config),
        options,
        Utc::now(),
    )
    .await;

    if config.optimize_after_collection
        && let Err(e) = storage::optimize(db).await
    {
        tracing::warn!(error = %e, "Database optimization failed");
    }

    Ok(report)
}
