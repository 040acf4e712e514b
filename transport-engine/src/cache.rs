//! Caches between upstream fetches and readers.
//!
//! The aggregation cache holds the latest successful board per monitored
//! key. Entries are `Arc` snapshots replaced wholesale, so a reader always
//! sees one complete fetch even while the next one is being written.
//!
//! TfL line status and bus arrivals are read on demand and sit behind
//! short TTL caches instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use moka::future::Cache as MokaCache;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::{BoardKey, BoardMode, BusRecord, Crs, LineStatusRecord, TrainRecord};
use crate::normalize::NormalizedBoard;
use crate::source::{SourceError, SourceKind, TflFeed};

/// The result of one successful board fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedResult {
    pub station: Crs,
    pub mode: BoardMode,
    pub location_name: String,
    /// Upstream generation time, UK local.
    pub generated_at: NaiveDateTime,
    pub fetched_at: DateTime<Utc>,
    pub source: SourceKind,
    /// Unfiltered, in upstream order.
    pub records: Vec<TrainRecord>,
    pub line_statuses: Vec<LineStatusRecord>,
    pub nrcc_messages: Vec<String>,
    pub platforms_available: bool,
    pub services_available: bool,
}

impl AggregatedResult {
    pub fn from_board(
        board: NormalizedBoard,
        mode: BoardMode,
        source: SourceKind,
        fetched_at: DateTime<Utc>,
        line_statuses: Vec<LineStatusRecord>,
    ) -> Self {
        Self {
            station: board.crs,
            mode,
            location_name: board.location_name,
            generated_at: board.generated_at,
            fetched_at,
            source,
            records: board.records,
            line_statuses,
            nrcc_messages: board.nrcc_messages,
            platforms_available: board.platforms_available,
            services_available: board.services_available,
        }
    }

    pub fn key(&self) -> BoardKey {
        BoardKey::new(self.station, self.mode)
    }
}

/// When a cached result counts as stale, and optionally when it is too
/// old to serve at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    pub stale_after: Duration,
    pub unavailable_after: Option<Duration>,
}

impl StalenessPolicy {
    /// Stale after three poll intervals, never unavailable.
    pub fn for_interval(interval: Duration) -> Self {
        Self {
            stale_after: interval * 3,
            unavailable_after: None,
        }
    }
}

/// A cached result plus its age at read time.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub result: Arc<AggregatedResult>,
    pub age: Duration,
    pub stale: bool,
    /// Past the unavailable threshold; readers should not serve it.
    pub expired: bool,
}

#[derive(Debug)]
struct CacheEntry {
    result: Arc<AggregatedResult>,
    stored_at: Instant,
}

/// Latest result per monitored board.
#[derive(Debug)]
pub struct AggregationCache {
    entries: RwLock<HashMap<BoardKey, CacheEntry>>,
    policy: StalenessPolicy,
}

impl AggregationCache {
    pub fn new(policy: StalenessPolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> StalenessPolicy {
        self.policy
    }

    /// Replace the entry for this result's key.
    pub async fn put(&self, result: AggregatedResult) {
        let entry = CacheEntry {
            result: Arc::new(result),
            stored_at: Instant::now(),
        };
        let key = entry.result.key();
        self.entries.write().await.insert(key, entry);
    }

    pub async fn get(&self, key: &BoardKey) -> Option<CachedResult> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        let age = entry.stored_at.elapsed();

        Some(CachedResult {
            result: Arc::clone(&entry.result),
            age,
            stale: age > self.policy.stale_after,
            expired: self.policy.unavailable_after.is_some_and(|limit| age > limit),
        })
    }
}

/// Configuration for the TfL caches.
#[derive(Debug, Clone)]
pub struct TflCacheConfig {
    pub line_status_ttl: Duration,
    pub arrivals_ttl: Duration,
    pub max_capacity: u64,
}

impl Default for TflCacheConfig {
    fn default() -> Self {
        Self {
            line_status_ttl: Duration::from_secs(5 * 60),
            arrivals_ttl: Duration::from_secs(60),
            max_capacity: 256,
        }
    }
}

/// TfL feed with caching.
///
/// Wraps a [`TflFeed`] and caches successful responses. Failures are not
/// cached.
pub struct CachedTflClient {
    feed: Arc<dyn TflFeed>,
    /// Keyed by sorted, comma-joined line ids.
    line_status: MokaCache<String, Arc<Vec<LineStatusRecord>>>,
    arrivals: MokaCache<String, Arc<Vec<BusRecord>>>,
}

impl CachedTflClient {
    pub fn new(feed: Arc<dyn TflFeed>, config: &TflCacheConfig) -> Self {
        Self {
            feed,
            line_status: MokaCache::builder()
                .time_to_live(config.line_status_ttl)
                .max_capacity(config.max_capacity)
                .build(),
            arrivals: MokaCache::builder()
                .time_to_live(config.arrivals_ttl)
                .max_capacity(config.max_capacity)
                .build(),
        }
    }

    pub async fn line_status(
        &self,
        line_ids: &[String],
    ) -> Result<Arc<Vec<LineStatusRecord>>, SourceError> {
        let mut ids: Vec<String> = line_ids
            .iter()
            .map(|id| id.trim().to_ascii_lowercase())
            .filter(|id| !id.is_empty())
            .collect();
        ids.sort();
        ids.dedup();
        let key = ids.join(",");

        if let Some(cached) = self.line_status.get(&key).await {
            return Ok(cached);
        }

        let records = Arc::new(self.feed.line_status(&ids).await?);
        self.line_status.insert(key, Arc::clone(&records)).await;
        Ok(records)
    }

    pub async fn stop_arrivals(&self, stop_id: &str) -> Result<Arc<Vec<BusRecord>>, SourceError> {
        let key = stop_id.trim().to_string();

        if let Some(cached) = self.arrivals.get(&key).await {
            return Ok(cached);
        }

        self.refresh_arrivals(&key).await
    }

    /// Fetch a stop's arrivals regardless of the cache and store them.
    pub async fn refresh_arrivals(&self, stop_id: &str) -> Result<Arc<Vec<BusRecord>>, SourceError> {
        let key = stop_id.trim().to_string();
        let records = Arc::new(self.feed.stop_arrivals(&key).await?);
        self.arrivals.insert(key, Arc::clone(&records)).await;
        Ok(records)
    }
}
