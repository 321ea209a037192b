//! Current-conditions lookup used to decorate a new day's header.
//!
//! Any failure means "no weather": the header is written without it.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Number;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::WeatherSettings;

const USER_AGENT: &str = "daily-journal-sync/1.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(12);

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct WeatherReport {
    #[serde(default)]
    pub temperature: Option<Number>,
    #[serde(default)]
    pub windspeed: Option<Number>,
    #[serde(default)]
    pub weathercode: Option<i64>,
    #[serde(default)]
    pub time: Option<String>,
}

impl WeatherReport {
    /// Header line, or `None` when there is no temperature to show.
    pub fn header_line(&self) -> Option<String> {
        let temperature = self.temperature.as_ref()?;
        let wind = self
            .windspeed
            .as_ref()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "?".to_string());
        let time = self.time.as_deref().unwrap_or("now");
        Some(format!(
            "*Weather:* {}°C, wind {} km/h, at {}",
            temperature, wind, time
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current_weather: Option<WeatherReport>,
}

/// Pull the `current_weather` record out of a forecast response body.
pub fn parse_forecast(body: &str) -> Result<Option<WeatherReport>, serde_json::Error> {
    let response: ForecastResponse = serde_json::from_str(body)?;
    Ok(response.current_weather)
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn current(&self) -> Option<WeatherReport>;
}

/// Weather disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWeather;

#[async_trait]
impl WeatherSource for NoWeather {
    async fn current(&self) -> Option<WeatherReport> {
        None
    }
}

/// open-meteo.com forecast endpoint.
pub struct OpenMeteo {
    client: Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
}

impl OpenMeteo {
    pub fn new(settings: &WeatherSettings) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            latitude: settings.latitude,
            longitude: settings.longitude,
        })
    }

    fn forecast_url(&self) -> String {
        format!("{}/v1/forecast", self.base_url)
    }

    async fn fetch(&self) -> anyhow::Result<Option<WeatherReport>> {
        let response = self
            .client
            .get(self.forecast_url())
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("latitude", self.latitude.to_string()),
                ("longitude", self.longitude.to_string()),
                ("current_weather", "true".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(%status, "weather HTTP status");
            return Ok(None);
        }

        let body = response.text().await?;
        Ok(parse_forecast(&body)?)
    }
}

#[async_trait]
impl WeatherSource for OpenMeteo {
    async fn current(&self) -> Option<WeatherReport> {
        match self.fetch().await {
            Ok(report) => {
                debug!(?report, "weather lookup finished");
                report
            }
            Err(err) => {
                warn!("weather fetch failed: {:#}", err);
                None
            }
        }
    }
}
