//! Huxley2 adapter (Fallback source).
//!
//! Huxley2 is a community JSON proxy in front of Darwin. It needs no key,
//! though a self-hosted instance can be given an access token.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::ConfigurationError;
use crate::domain::{BoardMode, StationQuery};

use super::error::SourceError;
use super::http::{USER_AGENT, read_reply, request_error};
use super::{RawSourceResponse, Schema, SourceAdapter, SourceKind};

pub(crate) const DEFAULT_BASE_URL: &str = "https://huxley2.azurewebsites.net";

const DEFAULT_MAX_CONCURRENT: usize = 2;

#[derive(Debug, Clone)]
pub struct HuxleyConfig {
    pub base_url: String,
    /// Passed as `accessToken` when set.
    pub access_token: Option<String>,
    pub max_concurrent: usize,
    pub timeout_secs: u64,
}

impl Default for HuxleyConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout_secs: 10,
        }
    }
}

impl HuxleyConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Huxley2 client.
#[derive(Debug, Clone)]
pub struct HuxleySource {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    semaphore: Arc<Semaphore>,
}

impl HuxleySource {
    pub fn new(config: HuxleyConfig) -> Result<Self, ConfigurationError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.filter(|t| !t.trim().is_empty()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }

    /// URL and query parameters for a board request.
    ///
    /// Huxley puts the filter and row count in the path:
    /// `/departures/GRP/to/CHX/10`.
    fn board_request(&self, query: &StationQuery) -> (String, Vec<(&'static str, String)>) {
        let (board, filter_type) = match query.mode() {
            BoardMode::Departures => ("departures", "to"),
            BoardMode::Arrivals => ("arrivals", "from"),
        };

        let url = match query.destination() {
            Some(filter) => format!(
                "{}/{}/{}/{}/{}/{}",
                self.base_url,
                board,
                query.station(),
                filter_type,
                filter,
                query.rows()
            ),
            None => format!(
                "{}/{}/{}/{}",
                self.base_url,
                board,
                query.station(),
                query.rows()
            ),
        };

        let mut params = vec![
            ("timeOffset", "0".to_string()),
            ("timeWindow", query.time_window().to_string()),
            ("expand", "true".to_string()),
        ];
        if let Some(token) = &self.access_token {
            params.push(("accessToken", token.clone()));
        }

        (url, params)
    }

    async fn fetch_board(&self, query: &StationQuery) -> Result<RawSourceResponse, SourceError> {
        let kind = SourceKind::Fallback;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SourceError::transient(kind, "request limiter closed"))?;

        let (url, params) = self.board_request(query);
        debug!(station = %query.station(), mode = %query.mode(), "requesting Huxley board");

        let response = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| request_error(kind, &e))?;

        let reply = read_reply(kind, response).await?;
        Ok(reply.into_raw(kind, Schema::Huxley, query))
    }
}

impl SourceAdapter for HuxleySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Fallback
    }

    fn fetch<'a>(
        &'a self,
        query: &'a StationQuery,
    ) -> BoxFuture<'a, Result<RawSourceResponse, SourceError>> {
        self.fetch_board(query).boxed()
    }
}
