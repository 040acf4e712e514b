//! The engine facade.
//!
//! Wires adapters, resolver, cache and one poller per monitored board
//! together, and answers the read-side questions the presentation layer
//! asks: the current view of a board, source health, line status, bus
//! arrivals and the DLR stop view.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDateTime, Utc};
use chrono_tz::Europe::London;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cache::{AggregationCache, CachedTflClient};
use crate::config::{ConfigurationError, EngineConfig};
use crate::domain::{BoardKey, BoardMode, BusRecord, Crs, LineStatusRecord};
use crate::projection::{
    FilteredView, ProjectionError, STOP_VIEW_LIMIT, StopDepartures, project, project_stop,
};
use crate::resolver::{Health, HealthEvent, SourceResolver, SourceSnapshot};
use crate::scheduler::{PollStatus, RailAdapters, StationPoller, refresh_stops};
use crate::source::{
    DarwinSource, HuxleySource, MockSource, SourceAdapter, SourceError, SourceKind, TflClient,
    TflFeed,
};

/// Why a view could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    #[error("station {0} is not monitored")]
    UnknownStation(Crs),

    #[error("{station} {mode} are not monitored")]
    NotMonitored { station: Crs, mode: BoardMode },

    #[error("no data for {key}: {reason}")]
    Unavailable { key: BoardKey, reason: String },

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Health of one rail source, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceHealth {
    pub configured: bool,
    pub health: Health,
    pub degraded_for_secs: Option<u64>,
    pub paused_for_secs: Option<u64>,
    pub last_error: Option<String>,
}

impl From<SourceSnapshot> for SourceHealth {
    fn from(snapshot: SourceSnapshot) -> Self {
        Self {
            configured: snapshot.configured,
            health: snapshot.health,
            degraded_for_secs: snapshot.degraded_for.map(|d| d.as_secs()),
            paused_for_secs: snapshot.paused_for.map(|d| d.as_secs()),
            last_error: snapshot.last_error.map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardStatus {
    pub mode: BoardMode,
    #[serde(flatten)]
    pub status: PollStatus,
}

/// Source health as seen from one station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceHealthReport {
    pub station: Crs,
    pub direct: SourceHealth,
    pub fallback: SourceHealth,
    pub boards: Vec<BoardStatus>,
}

/// One configured destination view.
#[derive(Debug, Clone, Serialize)]
pub struct ConfiguredView {
    pub station: Crs,
    pub destination: Crs,
    pub view: Option<FilteredView>,
    pub error: Option<String>,
}

/// Arrivals at one configured bus stop.
#[derive(Debug, Clone, Serialize)]
pub struct StopArrivals {
    pub stop_id: String,
    pub arrivals: Vec<BusRecord>,
    pub error: Option<String>,
}

/// The aggregation engine.
pub struct Engine {
    config: EngineConfig,
    resolver: Arc<SourceResolver>,
    cache: Arc<AggregationCache>,
    tfl: Arc<CachedTflClient>,
    statuses: HashMap<BoardKey, watch::Receiver<PollStatus>>,
    pending: Vec<StationPoller>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Build the engine with the real upstream adapters.
    ///
    /// Direct is only configured when a Darwin key is present. A mock
    /// directory replaces the Huxley fallback.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigurationError> {
        let direct = match &config.darwin {
            Some(darwin) => {
                let source: Arc<dyn SourceAdapter> = Arc::new(DarwinSource::new(darwin.clone())?);
                Some(source)
            }
            None => {
                info!("DARWIN_API_KEY not set, using the fallback source only");
                None
            }
        };

        let fallback: Arc<dyn SourceAdapter> = match &config.mock_dir {
            Some(dir) => {
                let mock = MockSource::new(dir)?;
                info!(dir = %dir.display(), boards = mock.available().len(), "serving fixture boards");
                Arc::new(mock)
            }
            None => Arc::new(HuxleySource::new(config.huxley.clone())?),
        };

        let tfl = Arc::new(TflClient::new(config.tfl.clone())?);
        Ok(Self::with_adapters(
            config,
            RailAdapters { direct, fallback },
            tfl,
        ))
    }

    /// Build the engine around the given adapters. Pollers are created but
    /// not started.
    pub fn with_adapters(
        config: EngineConfig,
        adapters: RailAdapters,
        tfl: Arc<dyn TflFeed>,
    ) -> Self {
        let resolver = Arc::new(SourceResolver::new(
            adapters.direct.is_some(),
            config.cooldown,
        ));
        let cache = Arc::new(AggregationCache::new(config.staleness));
        let tfl = Arc::new(CachedTflClient::new(tfl, &config.tfl_cache));

        let mut statuses = HashMap::new();
        let pending = config
            .board_keys()
            .into_iter()
            .map(|key| {
                let poller = StationPoller::new(
                    config.query(key),
                    adapters.clone(),
                    Arc::clone(&resolver),
                    Arc::clone(&cache),
                    config.poll,
                )
                .with_lines(Arc::clone(&tfl), config.lines.clone());
                statuses.insert(key, poller.subscribe());
                poller
            })
            .collect();

        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            resolver,
            cache,
            tfl,
            statuses,
            pending,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Every monitored board, sorted.
    pub fn monitored(&self) -> Vec<BoardKey> {
        let mut keys: Vec<BoardKey> = self.statuses.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Spawn one task per monitored board, plus one refreshing the
    /// configured TfL stops. Calling it again does nothing.
    pub fn start(&mut self) {
        let pollers = std::mem::take(&mut self.pending);
        if pollers.is_empty() {
            return;
        }

        info!(boards = pollers.len(), "starting pollers");
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for poller in pollers {
            tasks.push(tokio::spawn(poller.run(self.shutdown.subscribe())));
        }

        let stops = self.config.refreshed_stops();
        if !stops.is_empty() {
            tasks.push(tokio::spawn(refresh_stops(
                Arc::clone(&self.tfl),
                stops,
                self.config.stop_refresh,
                self.shutdown.subscribe(),
            )));
        }
    }

    /// Stop every poller and wait for them to exit. In-flight fetches are
    /// abandoned.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "poller task failed");
            }
        }
        info!("engine stopped");
    }

    /// The current view of a board, filtered by destination (or origin, for
    /// arrivals).
    ///
    /// Stale data is served flagged stale. `Unavailable` means nothing was
    /// ever fetched, or the last fetch is past the unavailable threshold.
    pub async fn current_view(
        &self,
        station: Crs,
        destination: Option<&str>,
        mode: BoardMode,
    ) -> Result<FilteredView, ViewError> {
        let key = BoardKey::new(station, mode);
        if !self.statuses.contains_key(&key) {
            return Err(if self.config.stations.contains(&station) {
                ViewError::NotMonitored { station, mode }
            } else {
                ViewError::UnknownStation(station)
            });
        }

        let Some(cached) = self.cache.get(&key).await else {
            return Err(ViewError::Unavailable {
                key,
                reason: self.unavailable_reason(key, "no successful fetch yet"),
            });
        };
        if cached.expired {
            return Err(ViewError::Unavailable {
                key,
                reason: self.unavailable_reason(
                    key,
                    &format!("last successful fetch was {}s ago", cached.age.as_secs()),
                ),
            });
        }

        let params = self
            .config
            .view_params(destination.map(str::to_string), mode);
        let view = project(&cached.result, &params, london_now())?;
        Ok(view.with_freshness(cached.stale, cached.age.as_secs()))
    }

    /// Views for every configured station and destination, departures only.
    pub async fn configured_views(&self) -> Vec<ConfiguredView> {
        let mut views = Vec::new();
        for station in &self.config.stations {
            for destination in &self.config.destinations {
                let (view, error) = match self
                    .current_view(*station, Some(destination.as_str()), BoardMode::Departures)
                    .await
                {
                    Ok(view) => (Some(view), None),
                    Err(err) => (None, Some(err.to_string())),
                };
                views.push(ConfiguredView {
                    station: *station,
                    destination: *destination,
                    view,
                    error,
                });
            }
        }
        views
    }

    /// Rail source health plus the poll status of each of the station's
    /// boards.
    pub fn source_health(&self, station: Crs) -> Result<SourceHealthReport, ViewError> {
        if !self.config.stations.contains(&station) {
            return Err(ViewError::UnknownStation(station));
        }

        let now = Instant::now();
        let boards = self
            .monitored()
            .into_iter()
            .filter(|key| key.station == station)
            .filter_map(|key| {
                Some(BoardStatus {
                    mode: key.mode,
                    status: self.poll_status(key)?,
                })
            })
            .collect();

        Ok(SourceHealthReport {
            station,
            direct: self.resolver.snapshot(SourceKind::Direct, now).into(),
            fallback: self.resolver.snapshot(SourceKind::Fallback, now).into(),
            boards,
        })
    }

    pub fn poll_status(&self, key: BoardKey) -> Option<PollStatus> {
        self.statuses.get(&key).map(|rx| rx.borrow().clone())
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthEvent> {
        self.resolver.subscribe()
    }

    /// Current status of the given TfL lines.
    pub async fn line_status(
        &self,
        line_ids: &[String],
    ) -> Result<Arc<Vec<LineStatusRecord>>, SourceError> {
        self.tfl.line_status(line_ids).await
    }

    /// Next buses at a TfL stop, soonest first.
    pub async fn bus_arrivals(&self, stop_id: &str) -> Result<Arc<Vec<BusRecord>>, SourceError> {
        self.tfl.stop_arrivals(stop_id).await
    }

    /// Arrivals at every configured bus stop, in configured order. A stop
    /// that cannot be fetched carries its error instead.
    pub async fn bus_stops(&self) -> Vec<StopArrivals> {
        let mut stops = Vec::with_capacity(self.config.bus_stops.len());
        for stop_id in &self.config.bus_stops {
            let (arrivals, error) = match self.tfl.stop_arrivals(stop_id).await {
                Ok(arrivals) => (arrivals.as_ref().clone(), None),
                Err(err) => (Vec::new(), Some(err.to_string())),
            };
            stops.push(StopArrivals {
                stop_id: stop_id.clone(),
                arrivals,
                error,
            });
        }
        stops
    }

    /// Departures from the configured DLR stop towards its destination.
    /// `None` when the view is disabled.
    pub async fn dlr_departures(&self) -> Result<Option<StopDepartures>, SourceError> {
        let Some(dlr) = &self.config.dlr else {
            return Ok(None);
        };
        let arrivals = self.tfl.stop_arrivals(&dlr.stop_id).await?;
        Ok(Some(StopDepartures {
            stop_id: dlr.stop_id.clone(),
            name: dlr.name.clone(),
            destination_filter: dlr.destination.clone(),
            departures: project_stop(&arrivals, dlr.destination.as_deref(), STOP_VIEW_LIMIT),
        }))
    }

    fn unavailable_reason(&self, key: BoardKey, base: &str) -> String {
        match self.poll_status(key).and_then(|s| s.auth_error.or(s.last_error)) {
            Some(err) => format!("{base}; last error: {err}"),
            None => base.to_string(),
        }
    }
}

/// Wall-clock time in the UK, matching the upstream boards.
fn london_now() -> NaiveDateTime {
    Utc::now().with_timezone(&London).naive_local()
}
