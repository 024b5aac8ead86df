//! Current position sources

use async_trait::async_trait;

use crate::config::DefaultsConfig;
use crate::error::ForecastError;
use crate::models::Geoposition;

/// Supplies the device's current position
#[async_trait]
pub trait PositionProvider: Send + Sync {
    async fn current_position(&self) -> Result<Geoposition, ForecastError>;
}

/// Position fixed at construction, typically from the `defaults` config section
#[derive(Debug, Clone, Default)]
pub struct FixedPosition {
    position: Option<Geoposition>,
}

impl FixedPosition {
    #[must_use]
    pub fn new(position: Geoposition) -> Self {
        Self {
            position: Some(position),
        }
    }

    /// Provider that reports no position at all
    #[must_use]
    pub fn unavailable() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_config(defaults: &DefaultsConfig) -> Self {
        Self {
            position: defaults.position(),
        }
    }
}

#[async_trait]
impl PositionProvider for FixedPosition {
    async fn current_position(&self) -> Result<Geoposition, ForecastError> {
        let position = self.position.ok_or_else(|| {
            ForecastError::invalid_input("no current position available; set defaults.latitude and defaults.longitude")
        })?;
        position.validate()?;
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_position() {
        let provider = FixedPosition::new(Geoposition::new(38.99, -77.01));
        assert_eq!(
            provider.current_position().await.unwrap(),
            Geoposition::new(38.99, -77.01)
        );
    }

    #[tokio::test]
    async fn test_unavailable_position() {
        let err = FixedPosition::unavailable()
            .current_position()
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::InvalidInput { .. }));
    }
}
