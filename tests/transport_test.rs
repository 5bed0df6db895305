//! The HTTP client against a local mock of the vendor API.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::net::TcpListener;

use fieldclimate_db::error::AppError;
use fieldclimate_db::fieldclimate::auth::{Credentials, TimestampFormat};
use fieldclimate_db::fieldclimate::transport::{ResilientTransport, TransportSettings};
use fieldclimate_db::fieldclimate::{FieldClimateClient, StationApi};
use fieldclimate_db::services::circuit_breaker::{CircuitBreakerConfig, CircuitState};
use fieldclimate_db::services::rate_limit::RateLimits;
use fieldclimate_db::services::retry::RetryPolicy;

const PUBLIC_KEY: &str = "pub-123";
const PRIVATE_KEY: &str = "very-secret";

#[derive(Debug, Clone)]
struct Hit {
    method: String,
    path: String,
    query: Option<String>,
    authorization: Option<String>,
    date: Option<String>,
}

struct Scripted {
    status: StatusCode,
    retry_after: Option<&'static str>,
    body: String,
}

#[derive(Clone, Default)]
struct MockVendor {
    hits: Arc<Mutex<Vec<Hit>>>,
    script: Arc<Mutex<VecDeque<Scripted>>>,
}

impl MockVendor {
    fn respond(&self, status: StatusCode, body: &str) {
        self.script.lock().unwrap().push_back(Scripted {
            status,
            retry_after: None,
            body: body.to_string(),
        });
    }

    fn respond_retry_after(&self, seconds: &'static str) {
        self.script.lock().unwrap().push_back(Scripted {
            status: StatusCode::TOO_MANY_REQUESTS,
            retry_after: Some(seconds),
            body: String::new(),
        });
    }

    fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }
}

async fn record(State(mock): State<MockVendor>, request: Request) -> Response {
    let header_value = |name: header::HeaderName| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    mock.hits.lock().unwrap().push(Hit {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        query: request.uri().query().map(str::to_string),
        authorization: header_value(header::AUTHORIZATION),
        date: header_value(header::DATE),
    });

    let next = mock.script.lock().unwrap().pop_front();
    match next {
        Some(Scripted {
            status,
            retry_after: Some(seconds),
            body,
        }) => (status, [(header::RETRY_AFTER, seconds)], body).into_response(),
        Some(Scripted { status, body, .. }) => (status, body).into_response(),
        None => (StatusCode::OK, "null").into_response(),
    }
}

async fn spawn_vendor() -> (MockVendor, String) {
    let mock = MockVendor::default();
    let app = Router::new().fallback(record).with_state(mock.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (mock, format!("http://{addr}"))
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: false,
    }
}

fn client(base_url: String, retry: RetryPolicy, breaker: CircuitBreakerConfig) -> FieldClimateClient {
    let settings = TransportSettings {
        base_url,
        timeout: Duration::from_secs(5),
        retry,
        rate_limits: RateLimits::default(),
        circuit_breaker: breaker,
    };
    let credentials = Credentials::new(PUBLIC_KEY, PRIVATE_KEY, TimestampFormat::HttpDate);
    FieldClimateClient::new(ResilientTransport::new(settings, credentials).unwrap())
}

const STATION_JSON: &str =
    r#"{"name":{"original":"00208E6F","custom":"Orchard"},"position":{"latitude":46.5,"longitude":6.6}}"#;

#[tokio::test]
async fn transient_errors_are_retried_until_success() {
    let (mock, url) = spawn_vendor().await;
    mock.respond(StatusCode::SERVICE_UNAVAILABLE, "");
    mock.respond(StatusCode::BAD_GATEWAY, "");
    mock.respond(StatusCode::OK, STATION_JSON);

    let api = client(url, fast_retry(3), CircuitBreakerConfig::default());
    let info = api.station_info("00208E6F").await.unwrap();

    assert_eq!(info.display_name().as_deref(), Some("Orchard"));
    assert_eq!(mock.hits().len(), 3);
    assert_eq!(api.transport().breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn retries_are_bounded() {
    let (mock, url) = spawn_vendor().await;
    for _ in 0..5 {
        mock.respond(StatusCode::SERVICE_UNAVAILABLE, "");
    }

    let api = client(url, fast_retry(2), CircuitBreakerConfig::default());
    let err = api.list_sensors("S1").await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(mock.hits().len(), 3);
}

#[tokio::test]
async fn not_found_means_unknown_station_and_is_not_retried() {
    let (mock, url) = spawn_vendor().await;
    mock.respond(StatusCode::NOT_FOUND, "");

    let api = client(url, fast_retry(3), CircuitBreakerConfig::default());
    let err = api.station_info("NOPE").await.unwrap_err();

    assert!(matches!(err, AppError::StationNotFound(ref id) if id == "NOPE"));
    assert_eq!(mock.hits().len(), 1);
}

#[tokio::test]
async fn client_errors_and_bad_bodies_are_permanent() {
    let (mock, url) = spawn_vendor().await;
    mock.respond(StatusCode::BAD_REQUEST, r#"{"message":"bad range"}"#);
    mock.respond(StatusCode::OK, "<html>maintenance</html>");

    let api = client(url, fast_retry(3), CircuitBreakerConfig::default());

    let err = api.list_sensors("S1").await.unwrap_err();
    assert!(matches!(err, AppError::Permanent(ref m) if m.contains("400")));

    let err = api.list_sensors("S1").await.unwrap_err();
    assert_eq!(err.kind(), "permanent");

    assert_eq!(mock.hits().len(), 2);
    // Both were answers, so the target counts as healthy.
    assert_eq!(api.transport().breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn empty_bodies_mean_no_data() {
    let (mock, url) = spawn_vendor().await;
    mock.respond(StatusCode::OK, "");
    mock.respond(StatusCode::NO_CONTENT, "");

    let api = client(url, fast_retry(0), CircuitBreakerConfig::default());
    let from = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();

    assert!(api.list_sensors("S1").await.unwrap().is_empty());
    let page = api.fetch_data("S1", from, to, 100).await.unwrap();
    assert!(page.dates.is_empty());
}

#[tokio::test]
async fn open_circuit_short_circuits_then_retries_after_cooldown() {
    let (mock, url) = spawn_vendor().await;
    mock.respond(StatusCode::SERVICE_UNAVAILABLE, "");
    mock.respond(StatusCode::SERVICE_UNAVAILABLE, "");

    let breaker = CircuitBreakerConfig {
        failure_threshold: 2,
        window: Duration::from_secs(60),
        cooldown: Duration::from_millis(300),
    };
    let api = client(url, fast_retry(0), breaker);

    assert!(api.station_info("S1").await.unwrap_err().is_transient());
    assert!(api.station_info("S1").await.unwrap_err().is_transient());
    assert_eq!(api.transport().breaker().state(), CircuitState::Open);

    let err = api.station_info("S1").await.unwrap_err();
    assert_eq!(err.kind(), "circuit_open");
    assert_eq!(mock.hits().len(), 2, "an open circuit must not reach the network");

    tokio::time::sleep(Duration::from_millis(400)).await;
    mock.respond(StatusCode::OK, STATION_JSON);

    api.station_info("S1").await.unwrap();
    assert_eq!(mock.hits().len(), 3);
    assert_eq!(api.transport().breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn failed_trial_request_reopens_the_circuit() {
    let (mock, url) = spawn_vendor().await;
    for _ in 0..3 {
        mock.respond(StatusCode::INTERNAL_SERVER_ERROR, "");
    }

    let breaker = CircuitBreakerConfig {
        failure_threshold: 2,
        window: Duration::from_secs(60),
        cooldown: Duration::from_millis(200),
    };
    let api = client(url, fast_retry(0), breaker);

    let _ = api.station_info("S1").await;
    let _ = api.station_info("S1").await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(api.station_info("S1").await.unwrap_err().is_transient());
    assert_eq!(api.transport().breaker().state(), CircuitState::Open);
    assert_eq!(api.station_info("S1").await.unwrap_err().kind(), "circuit_open");
    assert_eq!(mock.hits().len(), 3);
}

#[tokio::test]
async fn requests_carry_a_verifiable_signature() {
    let (mock, url) = spawn_vendor().await;
    let api = client(url, fast_retry(0), CircuitBreakerConfig::default());

    let from = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();
    api.fetch_data("00208E6F", from, to, 250).await.unwrap();

    let hits = mock.hits();
    let hit = &hits[0];
    let path = format!("/data/00208E6F/raw/from/{}/to/{}", from.timestamp(), to.timestamp());
    assert_eq!(hit.method, "GET");
    assert_eq!(hit.path, path);
    assert_eq!(hit.query.as_deref(), Some("limit=250"));

    let date = hit.date.clone().unwrap();
    assert!(date.ends_with(" GMT"), "unexpected date header {date}");

    let mut mac = Hmac::<Sha256>::new_from_slice(PRIVATE_KEY.as_bytes()).unwrap();
    mac.update(format!("GET{path}{date}{PUBLIC_KEY}").as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    assert_eq!(
        hit.authorization.as_deref(),
        Some(format!("hmac {PUBLIC_KEY}:{expected}").as_str())
    );
}

#[tokio::test]
async fn retry_after_is_honoured() {
    let (mock, url) = spawn_vendor().await;
    mock.respond_retry_after("1");
    mock.respond(StatusCode::OK, "[]");

    let api = client(url, fast_retry(2), CircuitBreakerConfig::default());
    let started = Instant::now();
    let sensors = api.list_sensors("S1").await.unwrap();

    assert!(sensors.is_empty());
    assert_eq!(mock.hits().len(), 2);
    assert!(started.elapsed() >= Duration::from_millis(950));
}

#[tokio::test]
async fn unreachable_vendor_is_transient() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = client(format!("http://{addr}"), fast_retry(1), CircuitBreakerConfig::default());
    let err = api.station_info("S1").await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn sensor_list_decodes_numeric_ids() {
    let (mock, url) = spawn_vendor().await;
    mock.respond(
        StatusCode::OK,
        r#"[{"id":506,"name":"Air temperature","type":"HC Air temperature","unit":"°C"},{"key":"rh_1","name":"RH"}]"#,
    );

    let api = client(url, fast_retry(0), CircuitBreakerConfig::default());
    let sensors = api.list_sensors("S1").await.unwrap();

    let keys: Vec<_> = sensors.iter().map(|s| s.key.as_str()).collect();
    assert_eq!(keys, vec!["506", "rh_1"]);
    assert_eq!(mock.hits()[0].path, "/station/S1/sensors");
}
