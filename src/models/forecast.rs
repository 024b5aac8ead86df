//! Forecast record for one period at one position

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::location::{Geoposition, PositionKey};

/// Identity of a forecast: rounded position plus period start
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForecastKey {
    pub position: PositionKey,
    pub start_date: DateTime<Utc>,
}

impl ForecastKey {
    #[must_use]
    pub fn new(position: &Geoposition, start_date: DateTime<Utc>) -> Self {
        Self {
            position: position.key(),
            start_date,
        }
    }

    /// Generate the store key for this forecast
    #[must_use]
    pub fn store_key(&self) -> String {
        format!(
            "forecast:{}:{}:{}",
            self.position.latitude,
            self.position.longitude,
            self.start_date.timestamp()
        )
    }
}

/// Forecast for a single validity period
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Forecast {
    /// Latitude in decimal degrees, rounded to grid precision
    pub latitude: f64,
    /// Longitude in decimal degrees, rounded to grid precision
    pub longitude: f64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// When the feed this record came from was parsed
    pub fetch_date: DateTime<Utc>,
    /// Worded weather summary, e.g. "Chance Rain"
    pub summary: Option<String>,
    /// Probability of precipitation in percent
    pub probability_of_precipitation: Option<u8>,
    pub minimum_temperature: Option<f64>,
    pub maximum_temperature: Option<f64>,
    /// Units of the temperature fields as reported by the feed, e.g. "Fahrenheit"
    pub temperature_units: Option<String>,
}

impl Forecast {
    /// Create an empty forecast for a period
    #[must_use]
    pub fn new(
        position: &Geoposition,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Self {
        let rounded = position.rounded();
        Self {
            latitude: rounded.latitude,
            longitude: rounded.longitude,
            start_date,
            end_date,
            fetch_date: Utc::now(),
            summary: None,
            probability_of_precipitation: None,
            minimum_temperature: None,
            maximum_temperature: None,
            temperature_units: None,
        }
    }

    #[must_use]
    pub fn geoposition(&self) -> Geoposition {
        Geoposition::new(self.latitude, self.longitude)
    }

    #[must_use]
    pub fn key(&self) -> ForecastKey {
        ForecastKey::new(&self.geoposition(), self.start_date)
    }

    /// Format the temperature range with units
    #[must_use]
    pub fn format_temperature(&self) -> String {
        let units = match self.temperature_units.as_deref() {
            Some("Fahrenheit") => "°F",
            Some("Celsius") => "°C",
            Some(other) => other,
            None => "",
        };
        match (self.minimum_temperature, self.maximum_temperature) {
            (Some(min), Some(max)) => format!("{min:.0}{units} / {max:.0}{units}"),
            (None, Some(max)) => format!("high {max:.0}{units}"),
            (Some(min), None) => format!("low {min:.0}{units}"),
            (None, None) => "n/a".to_string(),
        }
    }

    /// Format the precipitation probability
    #[must_use]
    pub fn format_precipitation(&self) -> String {
        self.probability_of_precipitation
            .map_or_else(|| "n/a".to_string(), |pop| format!("{pop}%"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Forecast {
        let start = Utc.with_ymd_and_hms(2014, 1, 8, 11, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2014, 1, 9, 11, 0, 0).unwrap();
        Forecast::new(&Geoposition::new(38.994, -77.012), start, end)
    }

    #[test]
    fn test_new_forecast_rounds_position() {
        let forecast = sample();
        assert_eq!(forecast.latitude, 38.99);
        assert_eq!(forecast.longitude, -77.01);
        assert!(forecast.summary.is_none());
    }

    #[test]
    fn test_store_key() {
        let forecast = sample();
        assert_eq!(forecast.key().store_key(), "forecast:3899:-7701:1389178800");
    }

    #[test]
    fn test_format_temperature() {
        let mut forecast = sample();
        assert_eq!(forecast.format_temperature(), "n/a");
        forecast.minimum_temperature = Some(21.0);
        forecast.maximum_temperature = Some(33.0);
        forecast.temperature_units = Some("Fahrenheit".to_string());
        assert_eq!(forecast.format_temperature(), "21°F / 33°F");
    }
}
