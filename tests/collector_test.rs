//! Incremental collection scenarios against a scripted vendor API.
//!
//! Run with: cargo test --test collector_test

mod common;

use chrono::TimeDelta;
use sea_orm::{EntityTrait, PaginatorTrait};

use common::{ScriptedApi, at, insert_station, sensor, test_db};
use fieldclimate_db::config::{Config, StationConfig};
use fieldclimate_db::entity::{measurements, sensors, stations};
use fieldclimate_db::storage::queries;
use fieldclimate_db::sync::worker::{
    CollectOptions, CollectSettings, Outcome, collect_station, run_all, run_station,
};

fn settings(batch_size: usize) -> CollectSettings {
    CollectSettings {
        backfill_days: 7,
        batch_size,
    }
}

async fn measurement_count(db: &sea_orm::DatabaseConnection) -> u64 {
    measurements::Entity::find().count(db).await.unwrap()
}

async fn reload(db: &sea_orm::DatabaseConnection, id: &str) -> stations::Model {
    queries::get_station(db, id).await.unwrap().unwrap()
}

#[tokio::test]
async fn new_station_backfills_then_second_run_stores_nothing() {
    let t = test_db().await;
    let now = at(12, 0);
    let api = ScriptedApi::with_sensors(vec![
        sensor("t", "Air temperature", "°C"),
        sensor("rh", "Relative humidity", "%"),
    ]);
    api.add_series(&["t", "rh"], now - TimeDelta::days(10), now, 15);

    let station = insert_station(&t.db, "S1", None).await;
    let report = collect_station(&t.db, &api, &station, settings(100), CollectOptions::default(), now).await;

    assert_eq!(report.outcome, Outcome::Succeeded, "{:?}", report.errors);
    assert_eq!(report.sensors_discovered, 2);
    let first_window = api.fetch_windows.lock().unwrap()[0];
    assert_eq!(first_window.0, now - TimeDelta::days(7));
    assert_eq!(first_window.1, now);

    // 7 days of 15-minute readings, both ends inclusive, two sensors
    let expected = (7 * 96 + 1) * 2;
    assert_eq!(report.measurements_stored, expected);
    assert_eq!(measurement_count(&t.db).await, expected);
    assert_eq!(report.batches_committed, 7);
    assert_eq!(reload(&t.db, "S1").await.last_updated, Some(now));

    let fetches_before = api.fetch_count();
    let station = reload(&t.db, "S1").await;
    let later = now + TimeDelta::minutes(5);
    let second = collect_station(&t.db, &api, &station, settings(100), CollectOptions::default(), later).await;

    assert_eq!(second.outcome, Outcome::Succeeded);
    assert_eq!(second.measurements_stored, 0);
    assert_eq!(api.fetch_count(), fetches_before + 1);
    assert_eq!(api.fetch_windows.lock().unwrap().last().unwrap().0, now + TimeDelta::seconds(1));
    assert_eq!(measurement_count(&t.db).await, expected);
    assert_eq!(reload(&t.db, "S1").await.last_updated, Some(now));
}

#[tokio::test]
async fn transient_failure_on_second_page_keeps_first_page_and_resumes() {
    let t = test_db().await;
    let now = at(12, 0);
    let start = now - TimeDelta::days(2);
    let api = ScriptedApi::with_sensors(vec![sensor("t", "Temperature", "°C")]);
    // 150 readings, one per minute
    api.add_series(&["t"], start, start + TimeDelta::minutes(149), 1);
    api.fail_fetch(1);

    let station = insert_station(&t.db, "S1", None).await;
    let options = CollectOptions {
        backfill_days: Some(2),
        force_refresh: false,
    };
    let report = collect_station(&t.db, &api, &station, settings(100), options, now).await;

    assert_eq!(report.outcome, Outcome::Partial);
    assert_eq!(report.measurements_stored, 100);
    assert_eq!(report.batches_committed, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("transient"));
    assert_eq!(measurement_count(&t.db).await, 100);

    let last = start + TimeDelta::minutes(99);
    assert_eq!(reload(&t.db, "S1").await.last_updated, Some(last));

    api.clear_failures();
    let station = reload(&t.db, "S1").await;
    let resumed = collect_station(&t.db, &api, &station, settings(100), CollectOptions::default(), now).await;

    assert_eq!(resumed.outcome, Outcome::Succeeded);
    assert_eq!(api.fetch_windows.lock().unwrap().last().unwrap().0, last + TimeDelta::seconds(1));
    assert_eq!(resumed.measurements_stored, 50);
    assert_eq!(measurement_count(&t.db).await, 150);
}

#[tokio::test]
async fn failure_before_any_batch_is_a_failed_station() {
    let t = test_db().await;
    let now = at(12, 0);
    let api = ScriptedApi::with_sensors(vec![sensor("t", "Temperature", "°C")]);
    api.add_series(&["t"], now - TimeDelta::hours(1), now, 10);
    api.fail_fetch(0);

    let station = insert_station(&t.db, "S1", None).await;
    let report = collect_station(&t.db, &api, &station, settings(100), CollectOptions::default(), now).await;

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.measurements_stored, 0);
    assert_eq!(reload(&t.db, "S1").await.last_updated, None);
}

#[tokio::test]
async fn unknown_keys_trigger_one_rediscovery_and_are_skipped_if_still_unknown() {
    let t = test_db().await;
    let now = at(12, 0);
    let api = ScriptedApi::with_sensors(vec![sensor("t", "Temperature", "°C")]);
    api.add_series(&["t", "ghost"], now - TimeDelta::minutes(30), now, 10);

    let station = insert_station(&t.db, "S1", None).await;
    let report = collect_station(&t.db, &api, &station, settings(100), CollectOptions::default(), now).await;

    assert_eq!(report.outcome, Outcome::Succeeded);
    // initial discovery (no sensors) plus one rediscovery for "ghost"
    assert_eq!(api.sensor_list_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(report.measurements_stored, 4);
    assert_eq!(report.readings_skipped, 4);
}

#[tokio::test]
async fn rediscovery_registers_sensors_that_appear_later() {
    let t = test_db().await;
    let now = at(12, 0);
    let api = ScriptedApi::with_sensors(vec![sensor("t", "Temperature", "°C")]);
    api.add_series(&["t"], now - TimeDelta::minutes(30), now, 10);

    let station = insert_station(&t.db, "S1", None).await;
    collect_station(&t.db, &api, &station, settings(100), CollectOptions::default(), now).await;

    // The vendor adds a sensor and starts reporting it.
    api.sensors.lock().unwrap().push(sensor("wind", "Wind speed", "m/s"));
    let later = now + TimeDelta::minutes(30);
    api.add_series(&["t", "wind"], now + TimeDelta::minutes(10), later, 10);

    let station = reload(&t.db, "S1").await;
    let report = collect_station(&t.db, &api, &station, settings(100), CollectOptions::default(), later).await;

    assert_eq!(report.sensors_discovered, 1);
    assert_eq!(report.readings_skipped, 0);
    assert_eq!(report.measurements_stored, 6);
    let wind = sensors::Entity::find_by_id(("S1".to_string(), "wind".to_string()))
        .one(&t.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wind.sensor_type, "wind");
}

#[tokio::test]
async fn force_refresh_runs_discovery_even_with_known_sensors() {
    let t = test_db().await;
    let now = at(12, 0);
    let api = ScriptedApi::with_sensors(vec![sensor("t", "Temperature", "°C")]);

    let station = insert_station(&t.db, "S1", None).await;
    collect_station(&t.db, &api, &station, settings(100), CollectOptions::default(), now).await;
    collect_station(&t.db, &api, &station, settings(100), CollectOptions::default(), now).await;
    assert_eq!(api.sensor_list_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let options = CollectOptions {
        backfill_days: None,
        force_refresh: true,
    };
    collect_station(&t.db, &api, &station, settings(100), options, now).await;
    assert_eq!(api.sensor_list_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn run_all_isolates_failing_stations() {
    let t = test_db().await;
    let api = ScriptedApi::with_sensors(vec![sensor("t", "Temperature", "°C")]);
    api.unknown_stations.lock().unwrap().insert("GONE".to_string());

    let config = Config {
        stations: vec![
            StationConfig {
                id: "GONE".to_string(),
                name: None,
                enabled: true,
            },
            StationConfig {
                id: "OK1".to_string(),
                name: Some("Orchard".to_string()),
                enabled: true,
            },
            StationConfig {
                id: "OFF".to_string(),
                name: None,
                enabled: false,
            },
        ],
        batch_size: 100,
        ..Config::default()
    };

    let summary = run_all(&t.db, &api, &config).await.unwrap();

    assert!(summary.has_failures());
    assert_eq!(summary.count(Outcome::Failed), 1);
    assert_eq!(summary.count(Outcome::Succeeded), 1);

    let gone = summary.stations.iter().find(|r| r.station_id == "GONE").unwrap();
    assert!(gone.errors[0].starts_with("station_not_found"));

    let ok = reload(&t.db, "OK1").await;
    assert_eq!(ok.name, "Orchard");
    assert_eq!(ok.latitude, Some(46.52));

    // Registered but disabled: stored, not collected.
    let off = reload(&t.db, "OFF").await;
    assert!(!off.enabled);
    assert!(summary.stations.iter().all(|r| r.station_id != "OFF"));
}

#[tokio::test]
async fn configuration_toggles_enabled_flag_of_known_station() {
    let t = test_db().await;
    let api = ScriptedApi::with_sensors(vec![sensor("t", "Temperature", "°C")]);
    insert_station(&t.db, "S1", None).await;

    let config = Config {
        stations: vec![StationConfig {
            id: "S1".to_string(),
            name: None,
            enabled: false,
        }],
        ..Config::default()
    };
    let summary = run_all(&t.db, &api, &config).await.unwrap();

    assert!(summary.stations.is_empty());
    assert!(!reload(&t.db, "S1").await.enabled);
}

#[tokio::test]
async fn run_station_registers_unknown_station_first() {
    let t = test_db().await;
    let api = ScriptedApi::with_sensors(vec![sensor("t", "Temperature", "°C")]);
    let now = chrono::Utc::now();
    api.add_series(&["t"], now - TimeDelta::hours(2), now - TimeDelta::hours(1), 30);

    let report = run_station(
        &t.db,
        &api,
        &Config::default(),
        "NEW1",
        CollectOptions {
            backfill_days: Some(1),
            force_refresh: false,
        },
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(report.measurements_stored, 3);
    assert_eq!(reload(&t.db, "NEW1").await.name, "Vendor NEW1");
}

#[tokio::test]
async fn oversized_pages_are_committed_in_batch_sized_chunks() {
    let t = test_db().await;
    let now = at(12, 0);
    let start = now - TimeDelta::days(1);
    let api = ScriptedApi::with_sensors(vec![sensor("t", "Temperature", "°C")]);
    api.ignore_limit.store(true, std::sync::atomic::Ordering::SeqCst);
    api.add_series(&["t"], start, start + TimeDelta::minutes(249), 1);

    let station = insert_station(&t.db, "S1", None).await;
    let options = CollectOptions {
        backfill_days: Some(1),
        force_refresh: false,
    };
    let report = collect_station(&t.db, &api, &station, settings(100), options, now).await;

    assert_eq!(report.outcome, Outcome::Succeeded, "{:?}", report.errors);
    assert_eq!(report.measurements_stored, 250);
    assert_eq!(report.batches_committed, 3);
    assert_eq!(report.last_updated, Some(start + TimeDelta::minutes(249)));
    assert_eq!(measurement_count(&t.db).await, 250);
}

#[tokio::test]
async fn out_of_range_backfill_fails_the_station_without_panicking() {
    let t = test_db().await;
    let api = ScriptedApi::with_sensors(vec![sensor("t", "Temperature", "°C")]);
    let station = insert_station(&t.db, "S1", None).await;

    let huge = CollectSettings {
        backfill_days: 200_000_000,
        batch_size: 100,
    };
    let report = collect_station(&t.db, &api, &station, huge, CollectOptions::default(), at(12, 0)).await;
    assert_eq!(report.outcome, Outcome::Failed);
    assert!(report.errors[0].starts_with("configuration"));

    let negative = CollectOptions {
        backfill_days: Some(-1),
        force_refresh: false,
    };
    let report = collect_station(&t.db, &api, &station, settings(100), negative, at(12, 0)).await;
    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(api.fetch_count(), 0);
}

#[tokio::test]
async fn run_station_rejects_ids_that_are_not_path_safe() {
    let t = test_db().await;
    let api = ScriptedApi::with_sensors(vec![sensor("t", "Temperature", "°C")]);

    for id in ["a/b", "S1?limit=1", ""] {
        let err = run_station(&t.db, &api, &Config::default(), id, CollectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "bad_request");
    }
    assert_eq!(api.sensor_list_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(api.fetch_count(), 0);
}
