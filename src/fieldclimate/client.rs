use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::fieldclimate::auth::Credentials;
use crate::fieldclimate::models::{DataPage, SensorInfo, StationInfo};
use crate::fieldclimate::transport::{ApiRequest, ResilientTransport, TransportSettings};

/// The vendor operations the collector depends on.
///
/// Implemented by [`FieldClimateClient`] over HTTP; tests substitute scripted
/// implementations.
#[async_trait]
pub trait StationApi: Send + Sync {
    /// # Errors
    ///
    /// `AppError::StationNotFound` if the vendor does not know the station.
    async fn station_info(&self, station_id: &str) -> AppResult<StationInfo>;

    /// # Errors
    ///
    /// `AppError::StationNotFound` if the vendor does not know the station.
    async fn list_sensors(&self, station_id: &str) -> AppResult<Vec<SensorInfo>>;

    /// At most `limit` timestamps in `[from, to]`, ascending.
    ///
    /// # Errors
    ///
    /// `AppError::StationNotFound` if the vendor does not know the station.
    async fn fetch_data(
        &self,
        station_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<DataPage>;
}

pub struct FieldClimateClient {
    transport: ResilientTransport,
}

impl FieldClimateClient {
    #[must_use]
    pub fn new(transport: ResilientTransport) -> Self {
        Self { transport }
    }

    /// Build a client from configuration, reading the API key files.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a key path is unset or a key file is
    /// missing or empty.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let (public_key_path, private_key_path) = config.key_paths()?;
        let credentials =
            Credentials::from_files(public_key_path, private_key_path, config.timestamp_format)?;
        let transport = ResilientTransport::new(TransportSettings::from(config), credentials)?;
        Ok(Self::new(transport))
    }

    #[must_use]
    pub fn transport(&self) -> &ResilientTransport {
        &self.transport
    }
}

/// A 404 anywhere under a station's routes means the station is unknown.
fn station_scoped(station_id: &str, err: AppError) -> AppError {
    match err {
        AppError::NotFound(_) => AppError::StationNotFound(station_id.to_string()),
        other => other,
    }
}

#[async_trait]
impl StationApi for FieldClimateClient {
    async fn station_info(&self, station_id: &str) -> AppResult<StationInfo> {
        let request = ApiRequest::get(format!("/station/{station_id}"));
        let raw: serde_json::Value = self
            .transport
            .send(&request)
            .await
            .map_err(|e| station_scoped(station_id, e))?;
        StationInfo::from_json(raw)
    }

    async fn list_sensors(&self, station_id: &str) -> AppResult<Vec<SensorInfo>> {
        let request = ApiRequest::get(format!("/station/{station_id}/sensors"));
        let raw: Option<Vec<serde_json::Value>> = self
            .transport
            .send(&request)
            .await
            .map_err(|e| station_scoped(station_id, e))?;

        let sensors = raw
            .unwrap_or_default()
            .into_iter()
            .map(SensorInfo::from_json)
            .collect::<AppResult<Vec<_>>>()?;

        tracing::debug!(station_id, count = sensors.len(), "Fetched sensor list");
        Ok(sensors)
    }

    async fn fetch_data(
        &self,
        station_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<DataPage> {
        let request = ApiRequest::get(format!(
            "/data/{station_id}/raw/from/{}/to/{}",
            from.timestamp(),
            to.timestamp()
        ))
        .query("limit", limit);

        let page: Option<DataPage> = self
            .transport
            .send(&request)
            .await
            .map_err(|e| station_scoped(station_id, e))?;

        Ok(page.unwrap_or_default())
    }
}
