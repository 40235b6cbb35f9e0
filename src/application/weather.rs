//! Current weather for dashboard widgets, cached per rounded coordinate.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::Duration;
use tracing::debug;

use crate::application::error::FetchError;
use crate::cache::TtlCache;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub latitude: f64,
    pub longitude: f64,
    pub temperature_c: f64,
    pub wind_speed_kmh: f64,
    pub weather_code: i32,
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self, latitude: f64, longitude: f64) -> Result<WeatherReport, FetchError>;
}

/// Coordinates rounded to two decimals, stored as hundredths of a degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordinateKey {
    lat_centi: i32,
    lon_centi: i32,
}

impl CoordinateKey {
    /// `None` for non-finite or out-of-range coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then(|| Self {
            lat_centi: (latitude * 100.0).round() as i32,
            lon_centi: (longitude * 100.0).round() as i32,
        })
    }

    pub fn latitude(&self) -> f64 {
        f64::from(self.lat_centi) / 100.0
    }

    pub fn longitude(&self) -> f64 {
        f64::from(self.lon_centi) / 100.0
    }
}

#[derive(Clone)]
pub struct WeatherService {
    provider: Arc<dyn WeatherProvider>,
    cache: Arc<TtlCache<CoordinateKey, WeatherReport>>,
    ttl: Duration,
}

impl WeatherService {
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        cache: Arc<TtlCache<CoordinateKey, WeatherReport>>,
        ttl: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            ttl,
        }
    }

    /// Weather near the given point; `None` if the coordinates are invalid or the provider fails.
    pub async fn current(&self, latitude: f64, longitude: f64) -> Option<WeatherReport> {
        let key = CoordinateKey::new(latitude, longitude)?;
        if let Some(report) = self.cache.get(&key) {
            return Some(report);
        }

        match self
            .provider
            .current(key.latitude(), key.longitude())
            .await
        {
            Ok(report) => {
                self.cache.set(key, report.clone(), self.ttl);
                Some(report)
            }
            Err(err) => {
                debug!(
                    latitude = key.latitude(),
                    longitude = key.longitude(),
                    error = %err,
                    "Weather lookup failed"
                );
                None
            }
        }
    }
}
