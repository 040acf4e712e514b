//! Per-board poll loop.
//!
//! Each monitored board gets its own [`StationPoller`] running as an
//! independent task, so a slow or failing station never delays another.
//! Within one board, cycles are strictly sequential: the next fetch is
//! only scheduled once the previous one has been applied or abandoned.
//!
//! State machine per cycle: `Idle -> Fetching -> {Succeeded, Failed}`.
//! - Success: cache the board and wait the normal interval.
//! - Transient or malformed failure: retry early with exponential backoff
//!   (base 30s, capped at the interval), at most three times, preferring
//!   the other source. After that, fall back to the normal interval and let
//!   readers see stale data.
//! - Auth failure: no early retry. The error stays visible in the poll
//!   status until the engine is reconfigured.
//! - A retry-after hint pauses only the source that sent it. The poller
//!   waits it out only when no other source is usable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{AggregatedResult, AggregationCache, CachedTflClient};
use crate::domain::{BoardKey, LineStatusRecord, StationQuery};
use crate::normalize::{NormalizedBoard, normalize};
use crate::resolver::{Selection, SourceResolver};
use crate::source::{ErrorClass, RawSourceResponse, SourceAdapter, SourceError, SourceKind};

/// Timing rules for one poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub retry_base: Duration,
    pub max_retries: u32,
    pub fetch_timeout: Duration,
    /// No two requests from one poller are closer than this.
    pub min_spacing: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            retry_base: Duration::from_secs(30),
            max_retries: 3,
            fetch_timeout: Duration::from_secs(10),
            min_spacing: Duration::from_secs(10),
        }
    }
}

impl PollPolicy {
    /// Delay before the `attempt`th early retry (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.retry_base
            .saturating_mul(1 << doublings)
            .min(self.interval)
    }
}

/// The rail adapters available to pollers.
#[derive(Clone)]
pub struct RailAdapters {
    pub direct: Option<Arc<dyn SourceAdapter>>,
    pub fallback: Arc<dyn SourceAdapter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    Idle,
    Fetching,
    Succeeded,
    Failed,
}

/// Published after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollStatus {
    pub state: PollState,
    /// Source of the latest attempt.
    pub source: Option<SourceKind>,
    pub last_error: Option<String>,
    /// Sticky: only a restart with new configuration clears it.
    pub auth_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
}

impl Default for PollStatus {
    fn default() -> Self {
        Self {
            state: PollState::Idle,
            source: None,
            last_error: None,
            auth_error: None,
            consecutive_failures: 0,
            last_success: None,
        }
    }
}

/// Line status lookup attached to each successful board.
struct LineFeed {
    client: Arc<CachedTflClient>,
    line_ids: Vec<String>,
}

/// Poll loop for one board.
pub struct StationPoller {
    query: StationQuery,
    adapters: RailAdapters,
    resolver: Arc<SourceResolver>,
    cache: Arc<AggregationCache>,
    lines: Option<LineFeed>,
    policy: PollPolicy,
    status: watch::Sender<PollStatus>,
    retries: u32,
    avoid: Option<SourceKind>,
}

impl StationPoller {
    pub fn new(
        query: StationQuery,
        adapters: RailAdapters,
        resolver: Arc<SourceResolver>,
        cache: Arc<AggregationCache>,
        policy: PollPolicy,
    ) -> Self {
        let (status, _) = watch::channel(PollStatus::default());
        Self {
            query,
            adapters,
            resolver,
            cache,
            lines: None,
            policy,
            status,
            retries: 0,
            avoid: None,
        }
    }

    /// Attach TfL line statuses for `line_ids` to every board.
    pub fn with_lines(mut self, client: Arc<CachedTflClient>, line_ids: Vec<String>) -> Self {
        if !line_ids.is_empty() {
            self.lines = Some(LineFeed { client, line_ids });
        }
        self
    }

    pub fn key(&self) -> BoardKey {
        self.query.key()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollStatus> {
        self.status.subscribe()
    }

    /// Run cycles until `shutdown` turns true or its sender is dropped.
    ///
    /// A fetch in flight at shutdown is abandoned and its result never
    /// applied.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let key = self.key();
        info!(board = %key, "poller started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                delay = self.run_cycle() => delay,
            };
            debug!(board = %key, delay_secs = delay.as_secs(), "next poll scheduled");

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.status.send_modify(|s| s.state = PollState::Idle);
        info!(board = %key, "poller stopped");
    }

    /// Run one cycle and return the delay before the next.
    pub async fn run_cycle(&mut self) -> Duration {
        let now = Instant::now();
        let kind = match self.resolver.select(now, self.avoid) {
            Selection::Use(kind) => kind,
            Selection::Blocked { until } => {
                let wait = until.saturating_duration_since(now);
                debug!(board = %self.key(), wait_secs = wait.as_secs(), "all sources paused");
                return wait.max(self.policy.min_spacing);
            }
        };
        let adapter = self.adapter(kind);
        let kind = adapter.kind();

        self.status.send_modify(|s| {
            s.state = PollState::Fetching;
            s.source = Some(kind);
        });

        let fetched = match tokio::time::timeout(self.policy.fetch_timeout, adapter.fetch(&self.query)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::timed_out(kind, self.policy.fetch_timeout)),
        };
        let outcome = fetched.and_then(|raw| normalize(&raw).map(|board| (raw, board)));

        let delay = match outcome {
            Ok((raw, board)) => self.on_success(kind, raw, board).await,
            Err(err) => self.on_failure(kind, err),
        };
        delay.max(self.policy.min_spacing)
    }

    fn adapter(&self, kind: SourceKind) -> Arc<dyn SourceAdapter> {
        match (kind, &self.adapters.direct) {
            (SourceKind::Direct, Some(direct)) => Arc::clone(direct),
            _ => Arc::clone(&self.adapters.fallback),
        }
    }

    async fn on_success(
        &mut self,
        kind: SourceKind,
        raw: RawSourceResponse,
        board: NormalizedBoard,
    ) -> Duration {
        let key = self.key();
        for reason in &board.skipped {
            warn!(board = %key, source = %kind, reason, "skipped service");
        }

        let line_statuses = self.line_statuses().await;
        let count = board.records.len();
        let result =
            AggregatedResult::from_board(board, key.mode, kind, raw.received_at, line_statuses);
        self.cache.put(result).await;
        self.resolver.record_success(kind, raw.retry_after, Instant::now());

        info!(board = %key, source = %kind, services = count, "board refreshed");
        self.retries = 0;
        self.avoid = None;
        self.status.send_modify(|s| {
            s.state = PollState::Succeeded;
            s.last_error = None;
            s.consecutive_failures = 0;
            s.last_success = Some(Utc::now());
        });

        self.policy.interval
    }

    fn on_failure(&mut self, kind: SourceKind, err: SourceError) -> Duration {
        let key = self.key();
        self.resolver.record_failure(kind, &err, Instant::now());

        let is_auth = err.class() == ErrorClass::Auth;
        self.status.send_modify(|s| {
            s.state = PollState::Failed;
            s.last_error = Some(err.to_string());
            s.consecutive_failures += 1;
            if is_auth {
                s.auth_error = Some(err.to_string());
            }
        });

        let delay = match err.class() {
            ErrorClass::Auth => {
                warn!(board = %key, source = %kind, error = %err, "authentication failed");
                self.retries = 0;
                self.avoid = None;
                self.policy.interval
            }
            ErrorClass::Transient | ErrorClass::Malformed => {
                if err.class() == ErrorClass::Malformed {
                    warn!(board = %key, source = %kind, error = %err, "malformed response");
                }
                if self.retries < self.policy.max_retries {
                    self.retries += 1;
                    self.avoid = Some(kind);
                    let backoff = self.policy.backoff(self.retries);
                    debug!(
                        board = %key,
                        source = %kind,
                        attempt = self.retries,
                        error = %err,
                        "scheduling early retry"
                    );
                    backoff
                } else {
                    warn!(
                        board = %key,
                        source = %kind,
                        error = %err,
                        "retries exhausted, serving cached data"
                    );
                    self.retries = 0;
                    self.avoid = None;
                    self.policy.interval
                }
            }
        };

        // The resolver holds the hint against the source that sent it.
        let now = Instant::now();
        match self.resolver.select(now, self.avoid) {
            Selection::Use(_) => delay,
            Selection::Blocked { until } => delay.max(until.saturating_duration_since(now)),
        }
    }

    async fn line_statuses(&self) -> Vec<LineStatusRecord> {
        let Some(lines) = &self.lines else {
            return Vec::new();
        };
        match lines.client.line_status(&lines.line_ids).await {
            Ok(records) => records.as_ref().clone(),
            Err(err) => {
                warn!(board = %self.key(), error = %err, "line status unavailable");
                Vec::new()
            }
        }
    }
}

/// Refetch every TfL stop in `stops` each `every`, until `shutdown` turns
/// true. Readers are served from the cache this keeps warm.
pub async fn refresh_stops(
    client: Arc<CachedTflClient>,
    stops: Vec<String>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(stops = stops.len(), every_secs = every.as_secs(), "stop refresher started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let refresh = join_all(stops.iter().map(|stop| {
            let client = &client;
            async move {
                match client.refresh_arrivals(stop).await {
                    Ok(arrivals) => {
                        debug!(stop_id = %stop, arrivals = arrivals.len(), "stop refreshed")
                    }
                    Err(err) => warn!(stop_id = %stop, error = %err, "stop refresh failed"),
                }
            }
        }));
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = refresh => {}
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(every) => {}
        }
    }

    info!("stop refresher stopped");
}
