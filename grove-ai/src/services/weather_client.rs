//! Weather and geocoding client (Open-Meteo)
//!
//! Used by auto-mode crop suggestions to turn a location into climate averages
//! over the forecast window.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const GEOCODING_BASE_URL: &str = "https://geocoding-api.open-meteo.com/v1";
const FORECAST_BASE_URL: &str = "https://api.open-meteo.com/v1";
/// Longest forecast window the provider serves
pub const MAX_FORECAST_DAYS: u32 = 16;

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("No forecast data returned")]
    NoData,
}

impl From<reqwest::Error> for WeatherError {
    fn from(err: reqwest::Error) -> Self {
        WeatherError::NetworkError(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherAverages {
    pub avg_max_temp: f64,
    pub avg_min_temp: f64,
    pub avg_humidity: f64,
    pub avg_rainfall: f64,
    pub avg_wind_speed: f64,
    pub dominant_wind_direction: String,
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn resolve_coordinates(
        &self,
        city: &str,
        state: Option<&str>,
        country: &str,
    ) -> Result<Option<Coordinates>, WeatherError>;

    async fn averages_over_days(
        &self,
        coordinates: Coordinates,
        days: u32,
    ) -> Result<WeatherAverages, WeatherError>;
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodingResult {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    admin1: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    daily: DailySeries,
}

#[derive(Debug, Default, Deserialize)]
struct DailySeries {
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m_max: Vec<Option<f64>>,
    #[serde(default)]
    wind_direction_10m_dominant: Vec<Option<f64>>,
}

/// Open-Meteo client
pub struct OpenMeteoClient {
    client: Client,
    geocoding_url: String,
    forecast_url: String,
}

impl OpenMeteoClient {
    pub fn new(timeout: Duration) -> Result<Self, WeatherError> {
        Self::with_base_urls(timeout, GEOCODING_BASE_URL, FORECAST_BASE_URL)
    }

    pub fn with_base_urls(
        timeout: Duration,
        geocoding_url: &str,
        forecast_url: &str,
    ) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            geocoding_url: geocoding_url.trim_end_matches('/').to_string(),
            forecast_url: forecast_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, WeatherError> {
        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WeatherError::ApiError(status.as_u16(), text));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| WeatherError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoClient {
    async fn resolve_coordinates(
        &self,
        city: &str,
        state: Option<&str>,
        country: &str,
    ) -> Result<Option<Coordinates>, WeatherError> {
        let url = format!("{}/search", self.geocoding_url);
        let response: GeocodingResponse = self
            .get_json(
                &url,
                &[
                    ("name", city.trim().to_string()),
                    ("count", "10".to_string()),
                    ("language", "en".to_string()),
                    ("format", "json".to_string()),
                ],
            )
            .await?;

        tracing::debug!(city, country, results = response.results.len(), "Geocoding lookup");
        Ok(pick_location(&response.results, state, country))
    }

    async fn averages_over_days(
        &self,
        coordinates: Coordinates,
        days: u32,
    ) -> Result<WeatherAverages, WeatherError> {
        let days = days.clamp(1, MAX_FORECAST_DAYS);
        let url = format!("{}/forecast", self.forecast_url);
        let response: ForecastResponse = self
            .get_json(
                &url,
                &[
                    ("latitude", coordinates.lat.to_string()),
                    ("longitude", coordinates.lon.to_string()),
                    (
                        "daily",
                        "temperature_2m_max,temperature_2m_min,relative_humidity_2m_mean,precipitation_sum,wind_speed_10m_max,wind_direction_10m_dominant"
                            .to_string(),
                    ),
                    ("forecast_days", days.to_string()),
                    ("timezone", "auto".to_string()),
                ],
            )
            .await?;

        summarize(&response.daily)
    }
}

fn matches_name(candidate: Option<&str>, wanted: &str) -> bool {
    candidate.is_some_and(|c| c.trim().eq_ignore_ascii_case(wanted.trim()))
}

/// First result matching country (name or ISO code) and, when given, state
fn pick_location(
    results: &[GeocodingResult],
    state: Option<&str>,
    country: &str,
) -> Option<Coordinates> {
    results
        .iter()
        .filter(|r| {
            matches_name(r.country.as_deref(), country)
                || matches_name(r.country_code.as_deref(), country)
        })
        .find(|r| match state {
            Some(state) if !state.trim().is_empty() => matches_name(r.admin1.as_deref(), state),
            _ => true,
        })
        .map(|r| Coordinates {
            lat: r.latitude,
            lon: r.longitude,
        })
}

fn mean(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

/// Circular mean of wind directions in degrees, `None` when undefined
fn mean_direction(degrees: &[Option<f64>]) -> Option<f64> {
    let (sin, cos) = degrees
        .iter()
        .flatten()
        .fold((0.0f64, 0.0f64), |(s, c), d| {
            let r = d.to_radians();
            (s + r.sin(), c + r.cos())
        });

    if sin.abs() < 1e-9 && cos.abs() < 1e-9 {
        return None;
    }
    Some(sin.atan2(cos).to_degrees().rem_euclid(360.0))
}

/// Eight-point compass label for a bearing in degrees
pub fn compass_label(degrees: f64) -> &'static str {
    const LABELS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let index = ((degrees.rem_euclid(360.0) + 22.5) / 45.0) as usize % 8;
    LABELS[index]
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn summarize(daily: &DailySeries) -> Result<WeatherAverages, WeatherError> {
    let avg_max_temp = mean(&daily.temperature_2m_max).ok_or(WeatherError::NoData)?;
    let avg_min_temp = mean(&daily.temperature_2m_min).ok_or(WeatherError::NoData)?;

    Ok(WeatherAverages {
        avg_max_temp: round1(avg_max_temp),
        avg_min_temp: round1(avg_min_temp),
        avg_humidity: round1(mean(&daily.relative_humidity_2m_mean).unwrap_or(0.0)),
        avg_rainfall: round1(mean(&daily.precipitation_sum).unwrap_or(0.0)),
        avg_wind_speed: round1(mean(&daily.wind_speed_10m_max).unwrap_or(0.0)),
        dominant_wind_direction: mean_direction(&daily.wind_direction_10m_dominant)
            .map(compass_label)
            .unwrap_or("variable")
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(country: &str, code: &str, admin1: &str, lat: f64) -> GeocodingResult {
        GeocodingResult {
            latitude: lat,
            longitude: 0.0,
            country: Some(country.to_string()),
            country_code: Some(code.to_string()),
            admin1: Some(admin1.to_string()),
        }
    }

    #[test]
    fn test_pick_location_filters_country_and_state() {
        let results = vec![
            result("United States", "US", "Ohio", 1.0),
            result("India", "IN", "Maharashtra", 2.0),
            result("India", "IN", "Punjab", 3.0),
        ];

        assert_eq!(pick_location(&results, None, "india").unwrap().lat, 2.0);
        assert_eq!(pick_location(&results, Some("Punjab"), "IN").unwrap().lat, 3.0);
        assert_eq!(pick_location(&results, Some(""), "United States").unwrap().lat, 1.0);
        assert!(pick_location(&results, None, "France").is_none());
        assert!(pick_location(&results, Some("Texas"), "US").is_none());
    }

    #[test]
    fn test_compass_label() {
        assert_eq!(compass_label(0.0), "N");
        assert_eq!(compass_label(359.0), "N");
        assert_eq!(compass_label(44.0), "NE");
        assert_eq!(compass_label(180.0), "S");
        assert_eq!(compass_label(270.0), "W");
        assert_eq!(compass_label(-90.0), "W");
    }

    #[test]
    fn test_mean_direction_wraps_around_north() {
        let mean = mean_direction(&[Some(350.0), Some(10.0)]).unwrap();
        assert!(mean < 1e-6 || (360.0 - mean) < 1e-6);
        assert!(mean_direction(&[None, None]).is_none());
    }

    #[test]
    fn test_summarize_skips_missing_days() {
        let daily = DailySeries {
            temperature_2m_max: vec![Some(30.0), Some(32.0), None],
            temperature_2m_min: vec![Some(20.0), Some(21.0), Some(22.0)],
            relative_humidity_2m_mean: vec![Some(60.0), Some(70.0)],
            precipitation_sum: vec![Some(0.0), Some(5.0)],
            wind_speed_10m_max: vec![],
            wind_direction_10m_dominant: vec![Some(90.0), Some(100.0)],
        };

        let averages = summarize(&daily).unwrap();
        assert_eq!(averages.avg_max_temp, 31.0);
        assert_eq!(averages.avg_min_temp, 21.0);
        assert_eq!(averages.avg_humidity, 65.0);
        assert_eq!(averages.avg_rainfall, 2.5);
        assert_eq!(averages.avg_wind_speed, 0.0);
        assert_eq!(averages.dominant_wind_direction, "E");
    }

    #[test]
    fn test_summarize_without_temperatures_fails() {
        assert!(matches!(summarize(&DailySeries::default()), Err(WeatherError::NoData)));
    }
}
