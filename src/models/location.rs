//! Location model for geographic coordinates and zipcode metadata

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ForecastError;

/// Decimal places kept for position identity; NDFD grid points are reported at this precision
pub const COORDINATE_PRECISION: u32 = 2;

/// A point on the globe
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Geoposition {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
}

/// Hashable identity of a position, in hundredths of a degree
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PositionKey {
    pub latitude: i32,
    pub longitude: i32,
}

impl Geoposition {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Reject positions the feed cannot answer for
    pub fn validate(&self) -> Result<(), ForecastError> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(ForecastError::invalid_input(format!(
                "coordinates must be finite numbers, got ({}, {})",
                self.latitude, self.longitude
            )));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ForecastError::invalid_input(format!(
                "latitude {} is outside [-90, 90]",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ForecastError::invalid_input(format!(
                "longitude {} is outside [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }

    /// Round coordinates for identity and store key generation
    #[must_use]
    pub fn rounded(&self) -> Self {
        let multiplier = 10_f64.powi(COORDINATE_PRECISION as i32);
        Self {
            latitude: (self.latitude * multiplier).round() / multiplier,
            longitude: (self.longitude * multiplier).round() / multiplier,
        }
    }

    /// Identity used to coalesce requests and key stored forecasts
    #[must_use]
    pub fn key(&self) -> PositionKey {
        let multiplier = 10_f64.powi(COORDINATE_PRECISION as i32);
        PositionKey {
            latitude: (self.latitude * multiplier).round() as i32,
            longitude: (self.longitude * multiplier).round() as i32,
        }
    }

    /// Format position as coordinates string
    #[must_use]
    pub fn format_coordinates(&self) -> String {
        format!("{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

impl fmt::Display for Geoposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.latitude, self.longitude)
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.latitude, self.longitude)
    }
}

/// A US postal code with its centroid
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Location {
    pub zipcode: u32,
    pub city: String,
    pub state: String,
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
}

impl Location {
    #[must_use]
    pub fn new(zipcode: u32, city: &str, state: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            zipcode,
            city: city.to_string(),
            state: state.to_string(),
            latitude,
            longitude,
        }
    }

    #[must_use]
    pub fn geoposition(&self) -> Geoposition {
        Geoposition::new(self.latitude, self.longitude)
    }

    /// Zipcode as the five digit string it is written as
    #[must_use]
    pub fn formatted_zipcode(&self) -> String {
        format!("{:05}", self.zipcode)
    }
}

/// Parse a five digit US zipcode
pub fn parse_zipcode(input: &str) -> Result<u32, ForecastError> {
    let trimmed = input.trim();
    if trimmed.len() != 5 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ForecastError::invalid_input(format!(
            "zipcode must be five digits, got '{input}'"
        )));
    }
    trimmed
        .parse::<u32>()
        .map_err(|e| ForecastError::invalid_input(format!("invalid zipcode '{input}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_rounded_coordinates() {
        let position = Geoposition::new(38.994_372, -77.012_456);
        let rounded = position.rounded();
        assert_eq!(rounded.latitude, 38.99);
        assert_eq!(rounded.longitude, -77.01);
    }

    #[test]
    fn test_key_matches_for_nearby_points() {
        let a = Geoposition::new(38.991, -77.009);
        let b = Geoposition::new(38.989, -77.011);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), PositionKey { latitude: 3899, longitude: -7701 });
    }

    #[rstest]
    #[case(91.0, 0.0)]
    #[case(-90.5, 10.0)]
    #[case(10.0, 180.5)]
    #[case(f64::NAN, 0.0)]
    #[case(0.0, f64::INFINITY)]
    fn test_invalid_positions(#[case] latitude: f64, #[case] longitude: f64) {
        let result = Geoposition::new(latitude, longitude).validate();
        assert!(matches!(result, Err(ForecastError::InvalidInput { .. })));
    }

    #[test]
    fn test_valid_position() {
        assert!(Geoposition::new(38.99, -77.01).validate().is_ok());
    }

    #[rstest]
    #[case("20001", 20001)]
    #[case("00501", 501)]
    #[case(" 94103 ", 94103)]
    fn test_parse_zipcode(#[case] input: &str, #[case] expected: u32) {
        assert_eq!(parse_zipcode(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("2000")]
    #[case("200011")]
    #[case("2000a")]
    #[case("-2000")]
    fn test_parse_zipcode_rejects(#[case] input: &str) {
        assert!(parse_zipcode(input).is_err());
    }

    #[test]
    fn test_formatted_zipcode_keeps_leading_zeros() {
        let location = Location::new(501, "Holtsville", "NY", 40.81, -73.04);
        assert_eq!(location.formatted_zipcode(), "00501");
    }
}
