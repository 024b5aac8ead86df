//! Forecast request orchestration
//!
//! `DataManager` resolves a zipcode or the current position to coordinates,
//! fetches the feed, parses it against the store and commits the result. One
//! request runs per rounded position at a time; a second request for the same
//! position joins the running one and receives the same result.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::ForecastKitConfig;
use crate::error::ForecastError;
use crate::models::{Forecast, Geoposition, Location, PositionKey, parse_zipcode};
use crate::parser::{ForecastLookup, ParsedResponse, ResponseParser};
use crate::position::{FixedPosition, PositionProvider};
use crate::requester::{ForecastTransport, NdfdClient};
use crate::store::{ForecastStore, PersistentStore};

const WARNING_CAPACITY: usize = 64;

type ForecastResult = Result<Vec<Forecast>, ForecastError>;
type SharedRequest = Shared<BoxFuture<'static, ForecastResult>>;

/// Progress of a logical forecast request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Resolving,
    Requesting,
    Parsing,
    Done,
    Failed,
}

/// Problems that did not stop a request from returning forecasts
#[derive(Debug, Clone)]
pub enum ForecastWarning {
    /// Part of the feed was skipped
    FeedInconsistency {
        position: Geoposition,
        error: ForecastError,
    },
    /// Forecasts were returned but could not be saved
    PersistenceFailure {
        position: Geoposition,
        error: ForecastError,
    },
}

impl ForecastWarning {
    #[must_use]
    pub fn error(&self) -> &ForecastError {
        match self {
            ForecastWarning::FeedInconsistency { error, .. }
            | ForecastWarning::PersistenceFailure { error, .. } => error,
        }
    }
}

/// A started request; its completion runs exactly once
pub struct RequestHandle {
    position: Option<Geoposition>,
    joined: bool,
    state: watch::Receiver<RequestState>,
    task: JoinHandle<()>,
}

impl RequestHandle {
    /// Requested position, unknown until a current-location request resolves it
    #[must_use]
    pub fn position(&self) -> Option<Geoposition> {
        self.position
    }

    /// Whether this request joined one already running for the same position
    #[must_use]
    pub fn joined_in_flight(&self) -> bool {
        self.joined
    }

    #[must_use]
    pub fn state(&self) -> RequestState {
        *self.state.borrow()
    }

    /// Wait until the completion has run
    pub async fn wait(self) -> Result<(), ForecastError> {
        self.task
            .await
            .map_err(|e| ForecastError::general(format!("completion task failed: {e}")))
    }
}

struct InFlight {
    id: u64,
    request: SharedRequest,
    state: watch::Receiver<RequestState>,
}

struct StoreLookup<'a>(&'a dyn ForecastStore);

impl ForecastLookup for StoreLookup<'_> {
    fn forecast_for(
        &self,
        position: &Geoposition,
        date: DateTime<Utc>,
    ) -> Result<Option<Forecast>, ForecastError> {
        self.0.forecast_for(position, date)
    }
}

struct Inner {
    store: Arc<dyn ForecastStore>,
    transport: Arc<dyn ForecastTransport>,
    positions: Arc<dyn PositionProvider>,
    in_flight: Mutex<HashMap<PositionKey, InFlight>>,
    /// Newest request id committed per feed position
    committed: Mutex<HashMap<PositionKey, u64>>,
    /// Feed point that last answered each requested position
    feed_points: Mutex<HashMap<PositionKey, Geoposition>>,
    /// Held across lookup-and-merge and save
    writer: Arc<tokio::sync::Mutex<()>>,
    next_id: AtomicU64,
    warnings: broadcast::Sender<ForecastWarning>,
}

fn poisoned(what: &str) -> ForecastError {
    ForecastError::general(format!("{what} lock poisoned"))
}

fn current_runtime() -> Result<Handle, ForecastError> {
    Handle::try_current()
        .map_err(|_| ForecastError::general("forecast requests need a running tokio runtime"))
}

impl Inner {
    /// Join the running request for `position` or start a new one
    fn join_or_start(
        self: &Arc<Self>,
        position: Geoposition,
    ) -> Result<(SharedRequest, watch::Receiver<RequestState>, bool), ForecastError> {
        let key = position.key();
        let mut in_flight = self.in_flight.lock().map_err(|_| poisoned("in-flight table"))?;

        if let Some(existing) = in_flight.get(&key) {
            debug!("Joining request {} for {}", existing.id, key);
            return Ok((existing.request.clone(), existing.state.clone(), true));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (state_tx, state_rx) = watch::channel(RequestState::Requesting);
        let inner = Arc::clone(self);
        let request = async move { inner.run(id, position, state_tx).await }
            .boxed()
            .shared();

        debug!("Starting request {} for {}", id, key);
        in_flight.insert(
            key,
            InFlight {
                id,
                request: request.clone(),
                state: state_rx.clone(),
            },
        );
        Ok((request, state_rx, false))
    }

    async fn run(
        self: Arc<Self>,
        id: u64,
        position: Geoposition,
        state: watch::Sender<RequestState>,
    ) -> ForecastResult {
        let result = self.fetch_and_commit(id, position, &state).await;

        match &result {
            Ok(forecasts) => {
                info!(
                    "Request {} for {} finished with {} forecasts",
                    id,
                    position,
                    forecasts.len()
                );
                state.send_replace(RequestState::Done);
            }
            Err(e) => {
                warn!("Request {} for {} failed: {}", id, position, e);
                state.send_replace(RequestState::Failed);
            }
        }

        self.finish(id, position.key());
        result
    }

    async fn fetch_and_commit(
        self: &Arc<Self>,
        id: u64,
        position: Geoposition,
        state: &watch::Sender<RequestState>,
    ) -> ForecastResult {
        let body = self.transport.fetch(&position).await?;

        state.send_replace(RequestState::Parsing);
        let writer = Arc::clone(&self.writer).lock_owned().await;
        let inner = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let _writer = writer;
            inner.parse_and_commit(id, position, &body)
        })
        .await
        .map_err(|e| ForecastError::general(format!("parse task failed: {e}")))?
    }

    fn parse_and_commit(&self, id: u64, requested: Geoposition, body: &[u8]) -> ForecastResult {
        let ParsedResponse {
            position,
            forecasts,
            inconsistencies,
        } = ResponseParser::parse_response(body, &StoreLookup(self.store.as_ref()))?;

        if requested.key() != position.key() {
            debug!("Request for {} answered by feed point {}", requested, position);
        }
        self.feed_points
            .lock()
            .map_err(|_| poisoned("feed point table"))?
            .insert(requested.key(), position);

        for error in inconsistencies {
            self.publish(ForecastWarning::FeedInconsistency { position, error });
        }

        let key = position.key();
        let mut committed = self.committed.lock().map_err(|_| poisoned("commit table"))?;
        if committed.get(&key).is_some_and(|&latest| latest > id) {
            info!(
                "Request {} for {} finished after a newer one was saved, not persisting",
                id, key
            );
            return Ok(forecasts);
        }

        match self.store.save_forecasts(&forecasts) {
            Ok(()) => {
                committed.insert(key, id);
                debug!("Saved {} forecasts for {}", forecasts.len(), key);
            }
            Err(error) => {
                warn!("Could not save forecasts for {}: {}", key, error);
                self.publish(ForecastWarning::PersistenceFailure { position, error });
            }
        }
        Ok(forecasts)
    }

    fn finish(&self, id: u64, key: PositionKey) {
        match self.in_flight.lock() {
            Ok(mut in_flight) => {
                if in_flight.get(&key).is_some_and(|entry| entry.id == id) {
                    in_flight.remove(&key);
                }
            }
            Err(_) => warn!("In-flight table lock poisoned, request {} not cleared", id),
        }
    }

    fn publish(&self, warning: ForecastWarning) {
        // No subscribers is fine
        let _ = self.warnings.send(warning);
    }
}

/// Entry point for forecast requests and stored data
#[derive(Clone)]
pub struct DataManager {
    inner: Arc<Inner>,
}

impl DataManager {
    pub fn new(
        store: Arc<dyn ForecastStore>,
        transport: Arc<dyn ForecastTransport>,
        positions: Arc<dyn PositionProvider>,
    ) -> Self {
        let (warnings, _) = broadcast::channel(WARNING_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                positions,
                in_flight: Mutex::new(HashMap::new()),
                committed: Mutex::new(HashMap::new()),
                feed_points: Mutex::new(HashMap::new()),
                writer: Arc::new(tokio::sync::Mutex::new(())),
                next_id: AtomicU64::new(0),
                warnings,
            }),
        }
    }

    /// Persistent store, NDFD transport and fixed position, all from config
    pub fn from_config(config: &ForecastKitConfig) -> Result<Self, ForecastError> {
        let ttl = Duration::from_secs(u64::from(config.store.forecast_ttl_hours) * 3600);
        let store = PersistentStore::open(&config.store.path, ttl)?;
        if let Some(file) = &config.store.zipcode_file {
            store.import_locations(Path::new(file))?;
        }
        let transport = NdfdClient::from_config(&config.feed)?;

        Ok(Self::new(
            Arc::new(store),
            Arc::new(transport),
            Arc::new(FixedPosition::from_config(&config.defaults)),
        ))
    }

    /// Request forecasts for coordinates the caller already holds
    #[instrument(skip(self, completion), level = "info")]
    pub fn request_forecasts_for_geoposition<F>(
        &self,
        position: Geoposition,
        completion: F,
    ) -> Result<RequestHandle, ForecastError>
    where
        F: FnOnce(ForecastResult) + Send + 'static,
    {
        let runtime = current_runtime()?;
        position.validate()?;

        let (request, state, joined) = self.inner.join_or_start(position)?;
        let task = runtime.spawn(async move {
            completion(request.await);
        });

        Ok(RequestHandle {
            position: Some(position),
            joined,
            state,
            task,
        })
    }

    /// Request forecasts for a five digit zipcode
    ///
    /// Malformed and unknown zipcodes fail here, before any network call; the
    /// completion is then dropped without running.
    #[instrument(skip(self, completion), level = "info")]
    pub fn request_forecasts_for_zipcode<F>(
        &self,
        zipcode: &str,
        completion: F,
    ) -> Result<RequestHandle, ForecastError>
    where
        F: FnOnce(ForecastResult) + Send + 'static,
    {
        let zipcode = parse_zipcode(zipcode)?;
        let location = self
            .inner
            .store
            .location_for_zipcode(zipcode)?
            .ok_or_else(|| ForecastError::invalid_input(format!("unknown zipcode {zipcode:05}")))?;

        debug!(
            "Zipcode {} resolved to {}, {} {}",
            location.formatted_zipcode(),
            location.city,
            location.state,
            location.geoposition()
        );
        self.request_forecasts_for_geoposition(location.geoposition(), completion)
    }

    /// Request forecasts for the position reported by the position provider
    #[instrument(skip(self, completion), level = "info")]
    pub fn request_forecasts_for_current_location<F>(
        &self,
        completion: F,
    ) -> Result<RequestHandle, ForecastError>
    where
        F: FnOnce(ForecastResult) + Send + 'static,
    {
        let runtime = current_runtime()?;
        let (state_tx, state_rx) = watch::channel(RequestState::Resolving);
        let inner = Arc::clone(&self.inner);

        let task = runtime.spawn(async move {
            let result = match inner.positions.current_position().await {
                Ok(position) => match inner.join_or_start(position) {
                    Ok((request, mut state, _)) => {
                        state_tx.send_replace(*state.borrow_and_update());
                        let forward = async {
                            while state.changed().await.is_ok() {
                                state_tx.send_replace(*state.borrow_and_update());
                            }
                        };
                        let (result, ()) = futures::future::join(request, forward).await;
                        result
                    }
                    Err(e) => Err(e),
                },
                Err(e) => {
                    warn!("Could not determine current position: {}", e);
                    Err(e)
                }
            };

            state_tx.send_replace(if result.is_ok() {
                RequestState::Done
            } else {
                RequestState::Failed
            });
            completion(result);
        });

        Ok(RequestHandle {
            position: None,
            joined: false,
            state: state_rx,
            task,
        })
    }

    /// Fetch forecasts for coordinates and wait for the result
    pub async fn forecasts_for_geoposition(&self, position: Geoposition) -> ForecastResult {
        let (tx, rx) = oneshot::channel();
        self.request_forecasts_for_geoposition(position, move |result| {
            let _ = tx.send(result);
        })?;
        Self::receive(rx).await
    }

    /// Fetch forecasts for a zipcode and wait for the result
    pub async fn forecasts_for_zipcode(&self, zipcode: &str) -> ForecastResult {
        let (tx, rx) = oneshot::channel();
        self.request_forecasts_for_zipcode(zipcode, move |result| {
            let _ = tx.send(result);
        })?;
        Self::receive(rx).await
    }

    /// Fetch forecasts for the current position and wait for the result
    pub async fn forecasts_for_current_location(&self) -> ForecastResult {
        let (tx, rx) = oneshot::channel();
        self.request_forecasts_for_current_location(move |result| {
            let _ = tx.send(result);
        })?;
        Self::receive(rx).await
    }

    async fn receive(rx: oneshot::Receiver<ForecastResult>) -> ForecastResult {
        rx.await
            .map_err(|_| ForecastError::general("request ended without a result"))?
    }

    /// State of the request running for `position`, `Idle` when none is
    #[must_use]
    pub fn request_state(&self, position: &Geoposition) -> RequestState {
        self.inner
            .in_flight
            .lock()
            .ok()
            .and_then(|in_flight| {
                in_flight
                    .get(&position.key())
                    .map(|entry| *entry.state.borrow())
            })
            .unwrap_or(RequestState::Idle)
    }

    /// Receive warnings published from now on
    #[must_use]
    pub fn subscribe_warnings(&self) -> broadcast::Receiver<ForecastWarning> {
        self.inner.warnings.subscribe()
    }

    /// Stored forecast at `position` for the period starting at `date`
    ///
    /// Forecasts are stored under the point the feed reports. A position this
    /// manager has already fetched reads from that point.
    pub fn forecast_for_geoposition(
        &self,
        position: &Geoposition,
        date: DateTime<Utc>,
    ) -> Result<Option<Forecast>, ForecastError> {
        let feed_point = self
            .inner
            .feed_points
            .lock()
            .ok()
            .and_then(|feed_points| feed_points.get(&position.key()).copied())
            .unwrap_or(*position);
        self.inner.store.forecast_for(&feed_point, date)
    }

    /// Stored location for a zipcode
    pub fn location_for_zipcode(&self, zipcode: &str) -> Result<Option<Location>, ForecastError> {
        self.inner.store.location_for_zipcode(parse_zipcode(zipcode)?)
    }

    /// Load zipcode locations from a JSON file into the store
    pub fn import_locations(&self, path: &Path) -> Result<usize, ForecastError> {
        self.inner.store.import_locations(path)
    }
}
