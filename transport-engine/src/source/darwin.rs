//! Darwin LDBWS adapter (Direct source).
//!
//! Talks to the Rail Data Marketplace JSON flavour of the Live Departure
//! Boards web service. One board request per `fetch`, authenticated with
//! the `x-apikey` header.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::ConfigurationError;
use crate::domain::{BoardMode, StationQuery};

use super::error::SourceError;
use super::http::{USER_AGENT, read_reply, request_error};
use super::{RawSourceResponse, Schema, SourceAdapter, SourceKind};

/// Default base URL for the LDBWS API.
pub(crate) const DEFAULT_BASE_URL: &str =
    "https://api1.raildata.org.uk/1010-live-departure-board-dep1_2/LDBWS/api/20220120";

/// Default maximum concurrent requests.
const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Configuration for the Darwin adapter.
#[derive(Debug, Clone)]
pub struct DarwinConfig {
    /// API key sent as `x-apikey`
    pub api_key: String,
    /// Base URL up to and including the API version segment
    pub base_url: String,
    /// Maximum concurrent requests
    pub max_concurrent: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl DarwinConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout_secs: 10,
        }
    }

    /// Set a custom base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Darwin LDBWS client.
///
/// A semaphore bounds concurrent requests so that many monitored stations
/// polling at once do not trip the upstream rate limiter.
#[derive(Debug, Clone)]
pub struct DarwinSource {
    http: reqwest::Client,
    base_url: String,
    semaphore: Arc<Semaphore>,
}

impl DarwinSource {
    pub fn new(config: DarwinConfig) -> Result<Self, ConfigurationError> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(config.api_key.trim())
            .map_err(|_| ConfigurationError::InvalidCredential(SourceKind::Direct))?;
        headers.insert("x-apikey", api_key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }

    /// URL and query parameters for a board request.
    fn board_request(&self, query: &StationQuery) -> (String, Vec<(&'static str, String)>) {
        let (operation, filter_type) = match query.mode() {
            BoardMode::Departures => ("GetDepBoardWithDetails", "to"),
            BoardMode::Arrivals => ("GetArrBoardWithDetails", "from"),
        };
        let url = format!("{}/{}/{}", self.base_url, operation, query.station());

        let mut params = vec![
            ("numRows", query.rows().to_string()),
            ("timeOffset", "0".to_string()),
            ("timeWindow", query.time_window().to_string()),
        ];
        if let Some(filter) = query.destination() {
            params.push(("filterCrs", filter.to_string()));
            params.push(("filterType", filter_type.to_string()));
        }

        (url, params)
    }

    async fn fetch_board(&self, query: &StationQuery) -> Result<RawSourceResponse, SourceError> {
        let kind = SourceKind::Direct;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SourceError::transient(kind, "request limiter closed"))?;

        let (url, params) = self.board_request(query);
        debug!(station = %query.station(), mode = %query.mode(), "requesting Darwin board");

        let response = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| request_error(kind, &e))?;

        let reply = read_reply(kind, response).await?;
        Ok(reply.into_raw(kind, Schema::Darwin, query))
    }
}

impl SourceAdapter for DarwinSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Direct
    }

    fn fetch<'a>(
        &'a self,
        query: &'a StationQuery,
    ) -> BoxFuture<'a, Result<RawSourceResponse, SourceError>> {
        self.fetch_board(query).boxed()
    }
}
