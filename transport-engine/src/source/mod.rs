//! Upstream source adapters.
//!
//! One adapter per upstream API. Rail adapters issue exactly one request per
//! call and hand back the body untouched in a [`RawSourceResponse`]; parsing
//! into canonical records is the normalizer's job. Adapters never retry:
//! every retry and backoff decision lives in the poll scheduler so that the
//! total request budget stays in one place.
//!
//! - [`DarwinSource`]: the authenticated Darwin LDB feed (Direct source)
//! - [`HuxleySource`]: the Huxley2 community proxy (Fallback source)
//! - [`TflClient`]: TfL Unified API for line status and bus arrivals
//! - [`MockSource`]: fixture files on disk, for development offline

mod darwin;
mod error;
mod http;
mod huxley;
mod mock;
mod tfl;
pub mod types;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;

use crate::domain::{BoardMode, BusRecord, Crs, LineStatusRecord, StationQuery};

pub use darwin::{DarwinConfig, DarwinSource};
pub use error::{AuthFailure, DEFAULT_RETRY_AFTER, ErrorClass, SourceError};
pub use huxley::{HuxleyConfig, HuxleySource};
pub use mock::MockSource;
pub use tfl::{TflClient, TflConfig};

/// Role a source plays for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Authenticated first-party rail feed.
    Direct,
    /// Unauthenticated community proxy.
    Fallback,
    /// TfL Unified API (lines and buses).
    Tfl,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Direct => "direct",
            SourceKind::Fallback => "fallback",
            SourceKind::Tfl => "tfl",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire schema of a rail board body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// Rail Data Marketplace LDBWS JSON.
    Darwin,
    /// Huxley2 JSON.
    Huxley,
}

/// An upstream body plus the metadata needed to interpret it.
///
/// Lives only between an adapter call and normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSourceResponse {
    pub source: SourceKind,
    pub schema: Schema,
    pub station: Crs,
    pub mode: BoardMode,
    pub status: u16,
    pub received_at: DateTime<Utc>,
    /// Upstream asked us to slow down even though this request succeeded.
    pub retry_after: Option<Duration>,
    pub body: String,
}

/// A rail board source.
///
/// Implementations perform one request per `fetch` call and classify any
/// failure into a [`SourceError`].
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn fetch<'a>(
        &'a self,
        query: &'a StationQuery,
    ) -> BoxFuture<'a, Result<RawSourceResponse, SourceError>>;
}

/// TfL feed for line status and bus arrivals, already normalized.
pub trait TflFeed: Send + Sync {
    fn line_status<'a>(
        &'a self,
        line_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<LineStatusRecord>, SourceError>>;

    fn stop_arrivals<'a>(
        &'a self,
        stop_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<BusRecord>, SourceError>>;
}
