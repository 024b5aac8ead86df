use std::fmt::Display;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use fjall::Keyspace;
use serde::{Deserialize, Serialize};

use super::ForecastStore;
use crate::error::ForecastError;
use crate::models::{Forecast, ForecastKey, Geoposition, Location};
use crate::parser::ForecastLookup;

#[derive(Serialize, Deserialize)]
struct StoredEntry<T> {
    value: T,
    expires_at: u64, // Unix timestamp (seconds)
}

/// On-disk store backed by two fjall keyspaces
pub struct PersistentStore {
    db: fjall::Database,
    locations: Keyspace,
    forecasts: Keyspace,
    forecast_ttl: Duration,
}

fn persistence_error(e: impl Display) -> ForecastError {
    ForecastError::persistence(e.to_string())
}

fn location_key(zipcode: u32) -> Vec<u8> {
    format!("location:{zipcode:05}").into_bytes()
}

fn unix_now() -> Result<u64, ForecastError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(persistence_error)?
        .as_secs())
}

fn get_from_store(store: &Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>, ForecastError> {
    Ok(store
        .get(key)
        .map_err(persistence_error)?
        .map(|v| v.to_vec()))
}

impl PersistentStore {
    /// Open or create the store at `path`; forecasts expire `forecast_ttl` after they are saved
    pub fn open(path: impl AsRef<Path>, forecast_ttl: Duration) -> Result<Self, ForecastError> {
        let db = fjall::Database::builder(&path)
            .open()
            .map_err(persistence_error)?;
        let locations = db
            .keyspace("locations", fjall::KeyspaceCreateOptions::default)
            .map_err(persistence_error)?;
        let forecasts = db
            .keyspace("forecasts", fjall::KeyspaceCreateOptions::default)
            .map_err(persistence_error)?;
        tracing::debug!("Opened store at {}", path.as_ref().display());
        Ok(Self {
            db,
            locations,
            forecasts,
            forecast_ttl,
        })
    }

    /// Write encoded forecast entries in one batch; nothing is written unless every entry encoded
    fn commit_forecasts(
        &self,
        entries: impl IntoIterator<Item = Result<(Vec<u8>, Vec<u8>), ForecastError>>,
    ) -> Result<(), ForecastError> {
        let entries = entries.into_iter().collect::<Result<Vec<_>, _>>()?;

        let mut batch = self.db.batch();
        for (key, bytes) in entries {
            batch.insert(&self.forecasts, key, bytes);
        }
        batch.commit().map_err(persistence_error)
    }

    fn remove_forecast(&self, key: &[u8]) -> Result<(), ForecastError> {
        self.forecasts
            .remove(key.to_vec())
            .map_err(persistence_error)?;
        Ok(())
    }
}

impl ForecastLookup for PersistentStore {
    #[tracing::instrument(name = "query_forecast", level = "debug", skip(self))]
    fn forecast_for(
        &self,
        position: &Geoposition,
        date: DateTime<Utc>,
    ) -> Result<Option<Forecast>, ForecastError> {
        let key = ForecastKey::new(position, date).store_key().into_bytes();

        let Some(bytes) = get_from_store(&self.forecasts, &key)? else {
            tracing::debug!("Forecast not found");
            return Ok(None);
        };

        let entry: StoredEntry<Forecast> = postcard::from_bytes(&bytes).map_err(persistence_error)?;
        if unix_now()? < entry.expires_at {
            Ok(Some(entry.value))
        } else {
            tracing::debug!("Forecast found but expired");
            self.remove_forecast(&key)?;
            Ok(None)
        }
    }
}

impl ForecastStore for PersistentStore {
    #[tracing::instrument(name = "query_location", level = "debug", skip(self))]
    fn location_for_zipcode(&self, zipcode: u32) -> Result<Option<Location>, ForecastError> {
        get_from_store(&self.locations, &location_key(zipcode))?
            .map(|bytes| postcard::from_bytes(&bytes).map_err(persistence_error))
            .transpose()
    }

    #[tracing::instrument(name = "put_forecasts", level = "debug", skip_all, fields(count = forecasts.len()))]
    fn save_forecasts(&self, forecasts: &[Forecast]) -> Result<(), ForecastError> {
        let expires_at = unix_now()?.saturating_add(self.forecast_ttl.as_secs());

        self.commit_forecasts(forecasts.iter().map(|forecast| {
            let entry = StoredEntry {
                value: forecast,
                expires_at,
            };
            let bytes = postcard::to_stdvec(&entry).map_err(persistence_error)?;
            Ok((forecast.key().store_key().into_bytes(), bytes))
        }))
    }

    fn put_location(&self, location: &Location) -> Result<(), ForecastError> {
        let bytes = postcard::to_stdvec(location).map_err(persistence_error)?;
        self.locations
            .insert(location_key(location.zipcode), bytes)
            .map_err(persistence_error)?;
        Ok(())
    }
}
