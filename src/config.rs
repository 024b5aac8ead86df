//! Configuration management for `ForecastKit`
//!
//! Handles loading configuration from files, environment variables,
//! and provides validation for all configuration settings.

use crate::ForecastError;
use crate::models::Geoposition;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure for `ForecastKit`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForecastKitConfig {
    /// Forecast feed configuration
    #[serde(default)]
    pub feed: FeedConfig,
    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Default application settings
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// NDFD feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Endpoint of the day-summarized NDFD browser interface
    #[serde(default = "default_feed_base_url")]
    pub base_url: String,
    /// Summarization requested from the feed ("24 hourly" or "12 hourly")
    #[serde(default = "default_feed_format")]
    pub format: String,
    /// Number of days to request
    #[serde(default = "default_feed_num_days")]
    pub num_days: u32,
    /// Request timeout in seconds
    #[serde(default = "default_feed_timeout")]
    pub timeout_seconds: u32,
    /// Maximum number of retries for transient failures
    #[serde(default = "default_feed_max_retries")]
    pub max_retries: u32,
    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Store configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store directory location
    #[serde(default = "default_store_path")]
    pub path: String,
    /// How long stored forecasts are kept, in hours
    #[serde(default = "default_forecast_ttl")]
    pub forecast_ttl_hours: u32,
    /// JSON file of zipcode locations imported when the manager is built
    #[serde(default)]
    pub zipcode_file: Option<String>,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty, compact or json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Default application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Latitude used when asking for the current location
    #[serde(default)]
    pub latitude: Option<f64>,
    /// Longitude used when asking for the current location
    #[serde(default)]
    pub longitude: Option<f64>,
}

// Default value functions
fn default_feed_base_url() -> String {
    "https://graphical.weather.gov/xml/sample_products/browser_interface/ndfdBrowserClientByDay.php"
        .to_string()
}

fn default_feed_format() -> String {
    "24 hourly".to_string()
}

fn default_feed_num_days() -> u32 {
    7
}

fn default_feed_timeout() -> u32 {
    30
}

fn default_feed_max_retries() -> u32 {
    3
}

fn default_user_agent() -> String {
    format!("forecastkit/{}", env!("CARGO_PKG_VERSION"))
}

fn default_store_path() -> String {
    dirs::data_dir()
        .map(|dir| dir.join("forecastkit").join("store"))
        .unwrap_or_else(|| PathBuf::from("forecastkit-store"))
        .to_string_lossy()
        .into_owned()
}

fn default_forecast_ttl() -> u32 {
    72
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_feed_base_url(),
            format: default_feed_format(),
            num_days: default_feed_num_days(),
            timeout_seconds: default_feed_timeout(),
            max_retries: default_feed_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            forecast_ttl_hours: default_forecast_ttl(),
            zipcode_file: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl DefaultsConfig {
    /// Configured position, when both coordinates are set
    #[must_use]
    pub fn position(&self) -> Option<Geoposition> {
        Some(Geoposition::new(self.latitude?, self.longitude?))
    }
}

impl ForecastKitConfig {
    /// Load configuration from specified path
    pub fn load_from_path(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_file = config_path.unwrap_or_else(|| {
            Self::get_config_path().unwrap_or_else(|| PathBuf::from("config.toml"))
        });

        if config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.clone())
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // FORECASTKIT_FEED__BASE_URL style overrides
        builder = builder.add_source(
            Environment::with_prefix("FORECASTKIT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| "Failed to build configuration")?;

        let mut config: ForecastKitConfig = settings
            .try_deserialize()
            .with_context(|| "Failed to deserialize configuration")?;

        config.apply_defaults();
        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("forecastkit").join("config.toml"))
    }

    /// Apply default values to missing configuration fields
    pub fn apply_defaults(&mut self) {
        if self.feed.base_url.is_empty() {
            self.feed.base_url = default_feed_base_url();
        }
        if self.feed.format.is_empty() {
            self.feed.format = default_feed_format();
        }
        if self.feed.num_days == 0 {
            self.feed.num_days = default_feed_num_days();
        }
        if self.feed.timeout_seconds == 0 {
            self.feed.timeout_seconds = default_feed_timeout();
        }
        if self.feed.user_agent.is_empty() {
            self.feed.user_agent = default_user_agent();
        }
        if self.store.path.is_empty() {
            self.store.path = default_store_path();
        }
        if self.store.forecast_ttl_hours == 0 {
            self.store.forecast_ttl_hours = default_forecast_ttl();
        }
        if self.logging.level.is_empty() {
            self.logging.level = default_log_level();
        }
        if self.logging.format.is_empty() {
            self.logging.format = default_log_format();
        }
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.validate_numeric_ranges()?;
        self.validate_string_values()?;
        self.validate_default_position()?;
        Ok(())
    }

    fn validate_numeric_ranges(&self) -> Result<()> {
        if !(1..=7).contains(&self.feed.num_days) {
            return Err(ForecastError::config("Feed num_days must be between 1 and 7").into());
        }

        if self.feed.timeout_seconds > 300 {
            return Err(
                ForecastError::config("Feed timeout cannot exceed 300 seconds").into(),
            );
        }

        if self.feed.max_retries > 10 {
            return Err(ForecastError::config("Feed max retries cannot exceed 10").into());
        }

        if self.store.forecast_ttl_hours > 720 {
            return Err(ForecastError::config(
                "Forecast TTL cannot exceed 720 hours (30 days)",
            )
            .into());
        }

        Ok(())
    }

    fn validate_string_values(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(ForecastError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            ))
            .into());
        }

        let valid_log_formats = ["pretty", "compact", "json"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(ForecastError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_log_formats.join(", ")
            ))
            .into());
        }

        let valid_feed_formats = ["24 hourly", "12 hourly"];
        if !valid_feed_formats.contains(&self.feed.format.as_str()) {
            return Err(ForecastError::config(format!(
                "Invalid feed format '{}'. Must be one of: {}",
                self.feed.format,
                valid_feed_formats.join(", ")
            ))
            .into());
        }

        if !self.feed.base_url.starts_with("http://") && !self.feed.base_url.starts_with("https://")
        {
            return Err(
                ForecastError::config("Feed base URL must be a valid HTTP or HTTPS URL").into(),
            );
        }

        Ok(())
    }

    fn validate_default_position(&self) -> Result<()> {
        match (self.defaults.latitude, self.defaults.longitude) {
            (None, None) => Ok(()),
            (Some(latitude), Some(longitude)) => {
                Geoposition::new(latitude, longitude)
                    .validate()
                    .with_context(|| "Invalid default position")?;
                Ok(())
            }
            _ => Err(ForecastError::config(
                "Default latitude and longitude must be set together",
            )
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ForecastKitConfig::default();
        assert!(config.feed.base_url.ends_with("ndfdBrowserClientByDay.php"));
        assert_eq!(config.feed.format, "24 hourly");
        assert_eq!(config.feed.num_days, 7);
        assert_eq!(config.feed.timeout_seconds, 30);
        assert_eq!(config.store.forecast_ttl_hours, 72);
        assert_eq!(config.logging.level, "info");
        assert!(config.defaults.position().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = ForecastKitConfig::default();
        config.logging.level = "invalid".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid log level"));
    }

    #[rstest]
    #[case::timeout(|c: &mut ForecastKitConfig| c.feed.timeout_seconds = 500, "timeout cannot exceed")]
    #[case::retries(|c: &mut ForecastKitConfig| c.feed.max_retries = 11, "max retries")]
    #[case::days(|c: &mut ForecastKitConfig| c.feed.num_days = 8, "num_days")]
    #[case::ttl(|c: &mut ForecastKitConfig| c.store.forecast_ttl_hours = 1000, "TTL")]
    fn test_config_validation_numeric_ranges(
        #[case] mutate: fn(&mut ForecastKitConfig),
        #[case] expected: &str,
    ) {
        let mut config = ForecastKitConfig::default();
        mutate(&mut config);
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains(expected));
    }

    #[test]
    fn test_half_default_position_is_rejected() {
        let mut config = ForecastKitConfig::default();
        config.defaults.latitude = Some(38.99);
        assert!(config.validate().is_err());

        config.defaults.longitude = Some(-77.01);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.defaults.position(),
            Some(Geoposition::new(38.99, -77.01))
        );
    }

    #[test]
    fn test_apply_defaults_fills_empty_values() {
        let mut config = ForecastKitConfig::default();
        config.feed.base_url.clear();
        config.feed.num_days = 0;
        config.logging.format.clear();
        config.apply_defaults();
        assert!(config.feed.base_url.starts_with("https://"));
        assert_eq!(config.feed.num_days, 7);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[feed]
base_url = "http://localhost:9999/ndfd"
num_days = 2

[store]
path = "/tmp/forecastkit-test"

[defaults]
latitude = 38.99
longitude = -77.01
"#
        )
        .unwrap();

        let config = ForecastKitConfig::load_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.feed.base_url, "http://localhost:9999/ndfd");
        assert_eq!(config.feed.num_days, 2);
        assert_eq!(config.feed.format, "24 hourly");
        assert_eq!(config.store.path, "/tmp/forecastkit-test");
        assert!(config.defaults.position().is_some());
    }

    #[test]
    fn test_config_path_generation() {
        let path = ForecastKitConfig::get_config_path();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.to_string_lossy().contains("forecastkit"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }
}
