//! Tracing subscriber setup

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// Build the filter: `RUST_LOG` wins, otherwise the configured level for this crate
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(format!("warn,forecastkit={level}"))
        .map_err(|e| anyhow!("Invalid log level '{level}': {e}"))
}

/// Install the global subscriber
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(&config.level)?;
    let builder = fmt().with_env_filter(filter).with_target(false);

    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.pretty().try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_known_levels() {
        for level in ["error", "warn", "info", "debug", "trace"] {
            assert!(env_filter(level).is_ok());
        }
    }
}
