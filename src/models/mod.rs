//! Data models for `ForecastKit`
//!
//! - Location: geographic positions and zipcode records
//! - Forecast: per-period forecast records and their identity

pub mod forecast;
pub mod location;

// Re-export all public types for convenient access
pub use forecast::{Forecast, ForecastKey};
pub use location::{Geoposition, Location, PositionKey, parse_zipcode};
