//! NDFD feed requests
//!
//! `ForecastRequester` performs exactly one GET per call and hands back the raw
//! body. Retrying is a property of the HTTP client it is given, which the
//! orchestration layer builds with `build_http_client`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tracing::{debug, info, instrument};

use crate::config::FeedConfig;
use crate::error::ForecastError;
use crate::models::Geoposition;

/// Source of raw feed responses for a position
#[async_trait]
pub trait ForecastTransport: Send + Sync {
    async fn fetch(&self, position: &Geoposition) -> Result<Vec<u8>, ForecastError>;
}

/// Build the shared HTTP client with timeout, user agent and transient-failure retries
pub fn build_http_client(config: &FeedConfig) -> Result<ClientWithMiddleware, ForecastError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(u64::from(config.timeout_seconds)))
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| ForecastError::config(format!("Failed to create HTTP client: {e}")))?;

    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
    Ok(ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}

/// Resets the in-flight flag when a request ends, however it ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-shot requester for one logical forecast request
pub struct ForecastRequester {
    client: ClientWithMiddleware,
    feed: FeedConfig,
    in_flight: AtomicBool,
}

impl ForecastRequester {
    pub fn new(client: ClientWithMiddleware, feed: FeedConfig) -> Self {
        Self {
            client,
            feed,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Feed URL for `position`, starting at `start_date`
    #[must_use]
    pub fn request_url(&self, position: &Geoposition, start_date: NaiveDate) -> String {
        format!(
            "{}?lat={:.4}&lon={:.4}&format={}&numDays={}&startDate={}",
            self.feed.base_url,
            position.latitude,
            position.longitude,
            urlencoding::encode(&self.feed.format),
            self.feed.num_days,
            start_date.format("%Y-%m-%d"),
        )
    }

    /// Whether a request is currently running on this requester
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Fetch the raw feed body for a coordinate
    #[instrument(skip(self), level = "info")]
    pub async fn request_forecasts(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<u8>, ForecastError> {
        let position = Geoposition::new(latitude, longitude);
        position.validate()?;

        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(ForecastError::invalid_input("request already in flight"));
        }
        let _guard = InFlightGuard(&self.in_flight);

        let url = self.request_url(&position, Utc::now().date_naive());
        info!("Requesting forecast feed for {}", position);
        debug!("GET {}", url);

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ForecastError::transport(format!("feed request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForecastError::transport(format!("feed returned HTTP {status}")));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ForecastError::transport(format!("failed to read feed body: {e}")))?
        {
            body.extend_from_slice(&chunk);
        }

        debug!("Received {} bytes", body.len());
        Ok(body)
    }
}

/// NDFD transport: shares one HTTP client across requests
#[derive(Clone)]
pub struct NdfdClient {
    client: ClientWithMiddleware,
    feed: FeedConfig,
}

impl NdfdClient {
    pub fn new(client: ClientWithMiddleware, feed: FeedConfig) -> Self {
        Self { client, feed }
    }

    /// Build the client and its retry policy from config
    pub fn from_config(feed: &FeedConfig) -> Result<Self, ForecastError> {
        Ok(Self::new(build_http_client(feed)?, feed.clone()))
    }

    /// Fresh requester sharing this client's connection pool
    #[must_use]
    pub fn requester(&self) -> ForecastRequester {
        ForecastRequester::new(self.client.clone(), self.feed.clone())
    }
}

#[async_trait]
impl ForecastTransport for NdfdClient {
    async fn fetch(&self, position: &Geoposition) -> Result<Vec<u8>, ForecastError> {
        self.requester()
            .request_forecasts(position.latitude, position.longitude)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn feed_config(base_url: &str, max_retries: u32) -> FeedConfig {
        FeedConfig {
            base_url: base_url.to_string(),
            num_days: 2,
            max_retries,
            ..FeedConfig::default()
        }
    }

    #[test]
    fn test_request_url_encodes_format() {
        let config = feed_config("https://example.test/ndfd.php", 0);
        let requester = ForecastRequester::new(build_http_client(&config).unwrap(), config);
        let url = requester.request_url(
            &Geoposition::new(38.99, -77.01),
            NaiveDate::from_ymd_opt(2014, 1, 8).unwrap(),
        );
        assert_eq!(
            url,
            "https://example.test/ndfd.php?lat=38.9900&lon=-77.0100&format=24%20hourly&numDays=2&startDate=2014-01-08"
        );
    }

    #[tokio::test]
    async fn test_returns_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ndfd"))
            .and(query_param("lat", "38.9900"))
            .and(query_param("format", "24 hourly"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<dwml/>"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client =
            NdfdClient::from_config(&feed_config(&format!("{}/ndfd", mock_server.uri()), 0))
                .unwrap();
        let body = client
            .fetch(&Geoposition::new(38.99, -77.01))
            .await
            .unwrap();
        assert_eq!(body, b"<dwml/>");
    }

    #[tokio::test]
    async fn test_http_error_is_transport_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = NdfdClient::from_config(&feed_config(&mock_server.uri(), 0)).unwrap();
        let err = client
            .fetch(&Geoposition::new(38.99, -77.01))
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::TransportFailure { .. }));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<dwml/>"))
            .mount(&mock_server)
            .await;

        let client = NdfdClient::from_config(&feed_config(&mock_server.uri(), 2)).unwrap();
        let body = client
            .fetch(&Geoposition::new(38.99, -77.01))
            .await
            .unwrap();
        assert_eq!(body, b"<dwml/>");
    }

    #[tokio::test]
    async fn test_invalid_coordinates_skip_network() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let client = NdfdClient::from_config(&feed_config(&mock_server.uri(), 0)).unwrap();
        let err = client
            .requester()
            .request_forecasts(123.0, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_second_request_while_in_flight_is_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<dwml/>")
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = NdfdClient::from_config(&feed_config(&mock_server.uri(), 0)).unwrap();
        let requester = Arc::new(client.requester());

        let first = {
            let requester = Arc::clone(&requester);
            tokio::spawn(async move { requester.request_forecasts(38.99, -77.01).await })
        };
        while !requester.is_in_flight() {
            tokio::task::yield_now().await;
        }

        let err = requester.request_forecasts(38.99, -77.01).await.unwrap_err();
        assert!(matches!(err, ForecastError::InvalidInput { .. }));
        assert!(first.await.unwrap().is_ok());
        assert!(!requester.is_in_flight());
    }
}
