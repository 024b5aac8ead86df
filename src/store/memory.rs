use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::ForecastStore;
use crate::error::ForecastError;
use crate::models::{Forecast, ForecastKey, Geoposition, Location};
use crate::parser::ForecastLookup;

#[derive(Default)]
pub struct MemoryStore {
    locations: RwLock<HashMap<u32, Location>>,
    forecasts: RwLock<HashMap<ForecastKey, Forecast>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, ForecastError> {
    lock.read()
        .map_err(|_| ForecastError::persistence("memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, ForecastError> {
    lock.write()
        .map_err(|_| ForecastError::persistence("memory store lock poisoned"))
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with zipcode locations
    #[must_use]
    pub fn with_locations(locations: impl IntoIterator<Item = Location>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.locations.write() {
            map.extend(locations.into_iter().map(|l| (l.zipcode, l)));
        }
        store
    }

    /// Number of stored forecasts
    pub fn forecast_count(&self) -> Result<usize, ForecastError> {
        Ok(read(&self.forecasts)?.len())
    }
}

impl ForecastLookup for MemoryStore {
    fn forecast_for(
        &self,
        position: &Geoposition,
        date: DateTime<Utc>,
    ) -> Result<Option<Forecast>, ForecastError> {
        let key = ForecastKey::new(position, date);
        Ok(read(&self.forecasts)?.get(&key).cloned())
    }
}

impl ForecastStore for MemoryStore {
    fn location_for_zipcode(&self, zipcode: u32) -> Result<Option<Location>, ForecastError> {
        Ok(read(&self.locations)?.get(&zipcode).cloned())
    }

    fn save_forecasts(&self, forecasts: &[Forecast]) -> Result<(), ForecastError> {
        let mut map = write(&self.forecasts)?;
        for forecast in forecasts {
            map.insert(forecast.key(), forecast.clone());
        }
        Ok(())
    }

    fn put_location(&self, location: &Location) -> Result<(), ForecastError> {
        write(&self.locations)?.insert(location.zipcode, location.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_save_replaces_same_period() {
        let store = MemoryStore::new();
        let position = Geoposition::new(38.991, -77.009);
        let start = Utc.with_ymd_and_hms(2014, 1, 8, 11, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2014, 1, 9, 11, 0, 0).unwrap();

        let mut forecast = Forecast::new(&position, start, end);
        store.save_forecasts(&[forecast.clone()]).unwrap();
        forecast.maximum_temperature = Some(40.0);
        store.save_forecasts(&[forecast]).unwrap();

        assert_eq!(store.forecast_count().unwrap(), 1);
        let stored = store
            .forecast_for(&Geoposition::new(38.99, -77.01), start)
            .unwrap()
            .unwrap();
        assert_eq!(stored.maximum_temperature, Some(40.0));
    }

    #[test]
    fn test_unknown_zipcode() {
        let store = MemoryStore::with_locations([Location::new(
            20001,
            "Washington",
            "DC",
            38.91,
            -77.02,
        )]);
        assert!(store.location_for_zipcode(0).unwrap().is_none());
        assert!(store.location_for_zipcode(20001).unwrap().is_some());
    }
}
