//! Signed, rate-limited, retried HTTP calls with a circuit breaker in front.
//!
//! Every attempt passes, in order: breaker admission, rate limiter, signing
//! (with a fresh timestamp), dispatch with a per-call timeout, and status
//! classification. [`with_retry`] repeats the whole sequence for transient
//! outcomes.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, DATE, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::fieldclimate::auth::Credentials;
use crate::services::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig};
use crate::services::rate_limit::{EndpointClass, RateLimiter, RateLimits};
use crate::services::retry::{RetryPolicy, with_retry};

/// A request relative to the API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the base URL, starting with `/`; this is what gets signed.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub class: EndpointClass,
}

impl ApiRequest {
    /// A GET request; measurement routes (`/data/...`) use the data budget.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        let path = path.into();
        let class = if path.starts_with("/data/") {
            EndpointClass::Data
        } else {
            EndpointClass::Metadata
        };
        Self {
            method: Method::GET,
            path,
            query: Vec::new(),
            class,
        }
    }

    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

/// Everything needed to build a transport without a full [`Config`].
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limits: RateLimits,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl From<&Config> for TransportSettings {
    fn from(config: &Config) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            timeout: config.request_timeout(),
            retry: config.retry_policy(),
            rate_limits: config.rate_limits(),
            circuit_breaker: config.circuit_breaker(),
        }
    }
}

pub struct ResilientTransport {
    http_client: Client,
    base_url: String,
    credentials: Credentials,
    retry: RetryPolicy,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl ResilientTransport {
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client cannot be constructed.
    pub fn new(settings: TransportSettings, credentials: Credentials) -> AppResult<Self> {
        let http_client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("fieldclimate-db/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {e}")))?;

        let base_url = settings.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            http_client,
            breaker: CircuitBreaker::new(base_url.clone(), settings.circuit_breaker),
            base_url,
            credentials,
            retry: settings.retry,
            limiter: RateLimiter::new(settings.rate_limits),
        })
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Send `request` and decode the JSON body as `T`.
    ///
    /// An empty 2xx body decodes as JSON `null`, so `Option<T>` accepts it.
    ///
    /// # Errors
    ///
    /// - `AppError::CircuitOpen` without touching the network while the breaker is open
    /// - `AppError::Transient` once retries are exhausted
    /// - `AppError::NotFound` for 404, `AppError::Permanent` for other 4xx or a
    ///   body that does not decode
    pub async fn send<T: DeserializeOwned>(&self, request: &ApiRequest) -> AppResult<T> {
        with_retry(&self.retry, &request.path, || self.attempt(request)).await
    }

    async fn attempt<T: DeserializeOwned>(&self, request: &ApiRequest) -> AppResult<T> {
        if self.breaker.admit()? == Admission::Trial {
            tracing::info!(base_url = %self.base_url, path = %request.path, "Sending half-open trial request");
        }
        let waited = self.limiter.acquire(request.class).await;
        if !waited.is_zero() {
            tracing::debug!(class = %request.class, waited_ms = waited.as_millis() as u64, "Throttled by rate limiter");
        }

        let signed = self
            .credentials
            .sign(request.method.as_str(), &request.path, Utc::now());
        let url = format!("{}{}", self.base_url, request.path);

        tracing::debug!(
            method = %request.method,
            path = %request.path,
            class = %request.class,
            "Dispatching API request"
        );

        let outcome = match self
            .http_client
            .request(request.method.clone(), &url)
            .query(&request.query)
            .header(AUTHORIZATION, signed.authorization)
            .header(DATE, signed.date)
            .header(ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => decode(&request.path, response).await,
            Err(e) => Err(classify_send_error(&e)),
        };

        // A permanent answer still proves the target is reachable.
        match &outcome {
            Err(e) if e.is_transient() => self.breaker.record_failure(),
            _ => self.breaker.record_success(),
        }
        outcome
    }
}

fn classify_send_error(e: &reqwest::Error) -> AppError {
    if e.is_builder() {
        return AppError::Permanent(format!("Invalid request: {e}"));
    }
    if e.is_timeout() {
        return AppError::transient(format!("Request timed out: {e}"));
    }
    if e.is_connect() {
        return AppError::transient(format!("Connection failed: {e}"));
    }
    AppError::transient(format!("Request failed: {e}"))
}

async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> AppResult<T> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AppError::Transient {
            message: format!("Rate limited (429) on {path}"),
            retry_after: retry_after(&response),
        });
    }
    if status.is_server_error() {
        return Err(AppError::Transient {
            message: format!("HTTP {status} on {path}"),
            retry_after: retry_after(&response),
        });
    }
    if status == StatusCode::NOT_FOUND {
        return Err(AppError::NotFound(path.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::Permanent(format!(
            "HTTP {status} on {path}: {}",
            body.chars().take(200).collect::<String>()
        )));
    }

    let text = response
        .text()
        .await
        .map_err(|e| AppError::transient(format!("Failed to read response body: {e}")))?;
    let text = if text.trim().is_empty() { "null" } else { text.as_str() };

    serde_json::from_str(text).map_err(|e| {
        tracing::error!(
            error = %e,
            path,
            body_preview = %text.chars().take(500).collect::<String>(),
            "Failed to parse API response"
        );
        AppError::Permanent(format!("Malformed response body from {path}: {e}"))
    })
}

/// `Retry-After` in delta-seconds; HTTP-date values are ignored.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
