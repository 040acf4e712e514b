//! TfL Unified API client for line status and bus arrivals.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::Url;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::ConfigurationError;
use crate::domain::{BusRecord, LineStatusRecord};
use crate::normalize::{parse_bus_arrivals, parse_line_statuses};

use super::error::SourceError;
use super::http::{USER_AGENT, read_reply, request_error};
use super::{SourceKind, TflFeed};

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.tfl.gov.uk";

const DEFAULT_MAX_CONCURRENT: usize = 2;

#[derive(Debug, Clone)]
pub struct TflConfig {
    pub base_url: String,
    /// Optional; raises TfL's anonymous rate limit.
    pub app_key: Option<String>,
    pub max_concurrent: usize,
    pub timeout_secs: u64,
}

impl Default for TflConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_key: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout_secs: 10,
        }
    }
}

impl TflConfig {
    pub fn with_app_key(mut self, key: impl Into<String>) -> Self {
        self.app_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TflClient {
    http: reqwest::Client,
    base_url: Url,
    app_key: Option<String>,
    semaphore: Arc<Semaphore>,
}

impl TflClient {
    pub fn new(config: TflConfig) -> Result<Self, ConfigurationError> {
        let invalid = |message: String| ConfigurationError::InvalidBaseUrl {
            url: config.base_url.clone(),
            message,
        };
        let base_url = Url::parse(&config.base_url).map_err(|e| invalid(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid("not a hierarchical URL".to_string()));
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url,
            app_key: config.app_key.filter(|k| !k.trim().is_empty()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }

    /// Base URL extended by `segments`, each percent-encoded on its own.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked hierarchical in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn line_status_url(&self, line_ids: &[String]) -> Url {
        self.endpoint(&["Line", &line_ids.join(","), "Status"])
    }

    fn stop_arrivals_url(&self, stop_id: &str) -> Url {
        self.endpoint(&["StopPoint", stop_id, "Arrivals"])
    }

    async fn get(&self, url: Url) -> Result<String, SourceError> {
        let kind = SourceKind::Tfl;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SourceError::transient(kind, "request limiter closed"))?;

        let mut request = self.http.get(url);
        if let Some(key) = &self.app_key {
            request = request.query(&[("app_key", key)]);
        }

        let response = request.send().await.map_err(|e| request_error(kind, &e))?;
        Ok(read_reply(kind, response).await?.body)
    }

    async fn fetch_line_status(
        &self,
        line_ids: &[String],
    ) -> Result<Vec<LineStatusRecord>, SourceError> {
        if line_ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!(lines = %line_ids.join(","), "requesting TfL line status");
        let body = self.get(self.line_status_url(line_ids)).await?;
        parse_line_statuses(&body)
    }

    async fn fetch_stop_arrivals(&self, stop_id: &str) -> Result<Vec<BusRecord>, SourceError> {
        debug!(stop_id, "requesting TfL stop arrivals");
        let body = self.get(self.stop_arrivals_url(stop_id)).await?;
        parse_bus_arrivals(stop_id, &body)
    }
}

impl TflFeed for TflClient {
    fn line_status<'a>(
        &'a self,
        line_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<LineStatusRecord>, SourceError>> {
        self.fetch_line_status(line_ids).boxed()
    }

    fn stop_arrivals<'a>(
        &'a self,
        stop_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<BusRecord>, SourceError>> {
        self.fetch_stop_arrivals(stop_id).boxed()
    }
}
