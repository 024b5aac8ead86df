//! `ForecastKit` - NOAA NDFD forecasts by zipcode or coordinates
//!
//! This library fetches Digital Weather Markup Language (DWML) feeds from the
//! National Digital Forecast Database, rebuilds per-period forecast records
//! from them and keeps those records in a local store.

pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod models;
pub mod parser;
pub mod position;
pub mod requester;
pub mod schema;
pub mod store;

// Re-export core types for public API
pub use config::ForecastKitConfig;
pub use error::ForecastError;
pub use manager::{DataManager, ForecastWarning, RequestHandle, RequestState};
pub use models::{Forecast, ForecastKey, Geoposition, Location, PositionKey};
pub use parser::{ForecastLookup, NoLookup, ParsedResponse, ResponseParser};
pub use position::{FixedPosition, PositionProvider};
pub use requester::{ForecastRequester, ForecastTransport, NdfdClient, build_http_client};
pub use schema::{Element, ElementId, SchemaError, SchemaTree};
pub use store::{ForecastStore, MemoryStore, PersistentStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
