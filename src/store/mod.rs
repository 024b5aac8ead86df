//! Zipcode and forecast storage
//!
//! - `MemoryStore`: in-process maps, used by tests and short-lived tools
//! - `PersistentStore`: fjall keyspaces with postcard-encoded entries

pub mod memory;
pub mod persistent;

use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::ForecastError;
use crate::models::{Forecast, Location};
use crate::parser::ForecastLookup;

pub use memory::MemoryStore;
pub use persistent::PersistentStore;

/// Repository for zipcode locations and forecast records
///
/// Calls are synchronous; async callers run them on a blocking task.
pub trait ForecastStore: ForecastLookup + Send + Sync {
    /// Location record for a zipcode, if one is known
    fn location_for_zipcode(&self, zipcode: u32) -> Result<Option<Location>, ForecastError>;

    /// Insert or replace forecasts, keyed by rounded position and start date.
    /// Either every record is written or none is.
    fn save_forecasts(&self, forecasts: &[Forecast]) -> Result<(), ForecastError>;

    /// Insert or replace a zipcode location
    fn put_location(&self, location: &Location) -> Result<(), ForecastError>;

    /// Load a JSON array of locations from `path`, returning how many were stored
    fn import_locations(&self, path: &Path) -> Result<usize, ForecastError> {
        let contents = fs::read_to_string(path)?;
        let locations: Vec<Location> = serde_json::from_str(&contents).map_err(|e| {
            ForecastError::invalid_input(format!(
                "{} is not a JSON array of locations: {e}",
                path.display()
            ))
        })?;

        for location in &locations {
            self.put_location(location)?;
        }
        info!("Imported {} locations from {}", locations.len(), path.display());
        Ok(locations.len())
    }
}
