//! Engine configuration, read once from the environment at startup.
//!
//! Every value has a default, so an empty environment yields a working
//! fallback-only engine monitoring Grove Park. Invalid values are reported
//! as a [`ConfigurationError`] and never retried.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{StalenessPolicy, TflCacheConfig};
use crate::domain::{BoardKey, BoardMode, Crs, InvalidCrs, StationQuery};
use crate::projection::ViewParams;
use crate::resolver::CooldownPolicy;
use crate::scheduler::PollPolicy;
use crate::source::{DarwinConfig, HuxleyConfig, SourceKind, TflConfig};

/// Default destination filters: the London terminals.
pub const LONDON_TERMINALS: [&str; 7] = ["CHX", "CST", "VIC", "LBG", "WAT", "WAE", "STP"];

/// Default bus stops: Grove Park stops E and D.
pub const DEFAULT_BUS_STOPS: [&str; 2] = ["490001124E", "490015256D"];

const DEFAULT_STATION: &str = "GRP";
const DEFAULT_LINES: &str = "southeastern";
const DEFAULT_DLR_STOP: &str = "940GZZDLLEW";
const DEFAULT_DLR_NAME: &str = "Lewisham";
const DEFAULT_DLR_DESTINATION: &str = "Bank";

/// Problems detected while setting the engine up.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{var}: {value:?} is not a station code: {source}")]
    InvalidStation {
        var: &'static str,
        value: String,
        #[source]
        source: InvalidCrs,
    },

    #[error("{var} must name at least one station")]
    NoStations { var: &'static str },

    #[error("{var}: expected a whole number, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be between {min} and {max}, got {value}")]
    OutOfRange {
        var: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },

    #[error("{var}: expected true or false, got {value:?}")]
    InvalidBool { var: &'static str, value: String },

    #[error("{0} source credential cannot be sent in a request header")]
    InvalidCredential(SourceKind),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),

    #[error("invalid base URL {url:?}: {message}")]
    InvalidBaseUrl { url: String, message: String },

    #[error("fixture directory {path}: {message}")]
    Fixtures { path: String, message: String },
}

/// A TfL stop whose arrivals are listed as departures, optionally only
/// those heading for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopViewConfig {
    pub stop_id: String,
    pub name: String,
    /// Case-insensitive substring of the destination name.
    pub destination: Option<String>,
}

impl Default for StopViewConfig {
    fn default() -> Self {
        Self {
            stop_id: DEFAULT_DLR_STOP.to_string(),
            name: DEFAULT_DLR_NAME.to_string(),
            destination: Some(DEFAULT_DLR_DESTINATION.to_string()),
        }
    }
}

/// Everything the engine and binary need to start.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Monitored stations, deduplicated, in configured order.
    pub stations: Vec<Crs>,
    /// Destination filters listed by [`crate::engine::Engine::configured_views`].
    pub destinations: Vec<Crs>,
    /// Also poll the arrivals board of every station.
    pub arrivals: bool,
    /// TfL line ids whose status is attached to every board.
    pub lines: Vec<String>,
    /// TfL bus stops kept warm in the background.
    pub bus_stops: Vec<String>,
    /// DLR departures view; `None` when disabled.
    pub dlr: Option<StopViewConfig>,
    /// How often configured TfL stops are refetched.
    pub stop_refresh: Duration,
    /// Services per view.
    pub num_departures: usize,
    /// Minutes ahead, both upstream and in views.
    pub time_window: u16,
    /// Services requested per upstream fetch.
    pub fetch_rows: u8,
    pub poll: PollPolicy,
    pub staleness: StalenessPolicy,
    pub cooldown: CooldownPolicy,
    /// Present only when `DARWIN_API_KEY` is set.
    pub darwin: Option<DarwinConfig>,
    pub huxley: HuxleyConfig,
    pub tfl: TflConfig,
    pub tfl_cache: TflCacheConfig,
    /// Serve fixtures from this directory instead of calling Huxley.
    pub mock_dir: Option<PathBuf>,
    pub listen_addr: SocketAddr,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let poll = PollPolicy::default();
        Self {
            stations: Crs::parse(DEFAULT_STATION).into_iter().collect(),
            destinations: LONDON_TERMINALS
                .iter()
                .filter_map(|c| Crs::parse(c).ok())
                .collect(),
            arrivals: true,
            lines: vec![DEFAULT_LINES.to_string()],
            bus_stops: DEFAULT_BUS_STOPS.iter().map(|s| s.to_string()).collect(),
            dlr: Some(StopViewConfig::default()),
            stop_refresh: Duration::from_secs(60),
            num_departures: 10,
            time_window: 120,
            fetch_rows: 50,
            poll,
            staleness: StalenessPolicy::for_interval(poll.interval),
            cooldown: CooldownPolicy::default(),
            darwin: None,
            huxley: HuxleyConfig::default(),
            tfl: TflConfig::default(),
            tfl_cache: TflCacheConfig::default(),
            mock_dir: None,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let env = Vars { lookup };
        let mut config = Self::default();

        if let Some(stations) = env.stations("TRANSPORT_STATIONS")? {
            if stations.is_empty() {
                return Err(ConfigurationError::NoStations {
                    var: "TRANSPORT_STATIONS",
                });
            }
            config.stations = stations;
        }
        if let Some(destinations) = env.stations("TRANSPORT_DESTINATIONS")? {
            config.destinations = destinations;
        }
        if let Some(arrivals) = env.flag("TRANSPORT_ARRIVALS")? {
            config.arrivals = arrivals;
        }
        if let Some(lines) = env.get("TRANSPORT_LINES") {
            config.lines = split_list(&lines)
                .map(str::to_ascii_lowercase)
                .collect();
        }

        if let Some(stops) = env.get("TRANSPORT_BUS_STOPS") {
            config.bus_stops = Vec::new();
            for stop in split_list(&stops) {
                let stop = stop.to_ascii_uppercase();
                if !config.bus_stops.contains(&stop) {
                    config.bus_stops.push(stop);
                }
            }
        }
        if env.flag("TRANSPORT_DLR")? == Some(false) {
            config.dlr = None;
        }
        if let Some(dlr) = &mut config.dlr {
            if let Some(stop) = env.get("TRANSPORT_DLR_STOP") {
                dlr.stop_id = stop.to_ascii_uppercase();
            }
            if let Some(name) = env.get("TRANSPORT_DLR_STOP_NAME") {
                dlr.name = name;
            }
            if let Some(destination) = env.get("TRANSPORT_DLR_DESTINATION") {
                dlr.destination = match destination.as_str() {
                    "*" => None,
                    _ => Some(destination),
                };
            }
        }
        if let Some(secs) = env.number("TRANSPORT_STOP_REFRESH_SECS", 10, 3600)? {
            config.stop_refresh = Duration::from_secs(secs);
        }

        if let Some(n) = env.number("TRANSPORT_NUM_DEPARTURES", 1, 150)? {
            config.num_departures = n as usize;
        }
        if let Some(n) = env.number("TRANSPORT_TIME_WINDOW", 1, 120)? {
            config.time_window = n as u16;
        }
        if let Some(n) = env.number("TRANSPORT_FETCH_ROWS", 1, 150)? {
            config.fetch_rows = n as u8;
        }

        if let Some(secs) = env.number("TRANSPORT_POLL_INTERVAL_SECS", 30, 3600)? {
            config.poll.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env.number("TRANSPORT_FETCH_TIMEOUT_SECS", 1, 60)? {
            config.poll.fetch_timeout = Duration::from_secs(secs);
        }
        config.staleness = StalenessPolicy::for_interval(config.poll.interval);
        if let Some(secs) = env.number("TRANSPORT_STALE_AFTER_SECS", 1, 86_400)? {
            config.staleness.stale_after = Duration::from_secs(secs);
        }
        if let Some(secs) = env.number("TRANSPORT_UNAVAILABLE_AFTER_SECS", 1, 7 * 86_400)? {
            config.staleness.unavailable_after = Some(Duration::from_secs(secs));
        }

        let timeout_secs = config.poll.fetch_timeout.as_secs();
        config.darwin = env.get("DARWIN_API_KEY").map(|key| {
            let darwin = DarwinConfig::new(key).with_timeout(timeout_secs);
            match env.get("DARWIN_BASE_URL") {
                Some(url) => darwin.with_base_url(url),
                None => darwin,
            }
        });

        config.huxley = config.huxley.with_timeout(timeout_secs);
        if let Some(url) = env.get("HUXLEY_BASE_URL") {
            config.huxley = config.huxley.with_base_url(url);
        }
        if let Some(token) = env.get("HUXLEY_ACCESS_TOKEN") {
            config.huxley = config.huxley.with_access_token(token);
        }

        config.tfl = config.tfl.with_timeout(timeout_secs);
        if let Some(key) = env.get("TFL_APP_KEY") {
            config.tfl = config.tfl.with_app_key(key);
        }

        config.mock_dir = env.get("TRANSPORT_MOCK_DIR").map(PathBuf::from);

        if let Some(addr) = env.get("TRANSPORT_LISTEN_ADDR") {
            config.listen_addr = addr
                .parse()
                .map_err(|_| ConfigurationError::InvalidAddress(addr))?;
        }

        Ok(config)
    }

    /// Every board the engine polls: one per station and mode.
    pub fn board_keys(&self) -> Vec<BoardKey> {
        let modes: &[BoardMode] = if self.arrivals {
            &[BoardMode::Departures, BoardMode::Arrivals]
        } else {
            &[BoardMode::Departures]
        };
        self.stations
            .iter()
            .flat_map(|crs| modes.iter().map(|mode| BoardKey::new(*crs, *mode)))
            .collect()
    }

    /// TfL stops refreshed in the background: the bus stops, then the DLR
    /// stop if it is not already among them.
    pub fn refreshed_stops(&self) -> Vec<String> {
        let mut stops = self.bus_stops.clone();
        if let Some(dlr) = &self.dlr {
            if !stops.contains(&dlr.stop_id) {
                stops.push(dlr.stop_id.clone());
            }
        }
        stops
    }

    /// The upstream request for a board. Destination filtering happens in
    /// views, so the fetch is unfiltered.
    pub fn query(&self, key: BoardKey) -> StationQuery {
        StationQuery::new(key.station, None, key.mode, self.fetch_rows, self.time_window)
    }

    pub fn view_params(&self, destination: Option<String>, mode: BoardMode) -> ViewParams {
        ViewParams {
            destination,
            mode,
            count: self.num_departures,
            window_minutes: u32::from(self.time_window),
            max_calling_points: None,
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn number(&self, var: &'static str, min: u64, max: u64) -> Result<Option<u64>, ConfigurationError> {
        let Some(value) = self.get(var) else {
            return Ok(None);
        };
        let n: u64 = value
            .parse()
            .map_err(|_| ConfigurationError::InvalidNumber { var, value })?;
        if !(min..=max).contains(&n) {
            return Err(ConfigurationError::OutOfRange {
                var,
                min,
                max,
                value: n,
            });
        }
        Ok(Some(n))
    }

    fn flag(&self, var: &'static str) -> Result<Option<bool>, ConfigurationError> {
        let Some(value) = self.get(var) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigurationError::InvalidBool { var, value }),
        }
    }

    /// Comma-separated CRS codes, deduplicated in order.
    fn stations(&self, var: &'static str) -> Result<Option<Vec<Crs>>, ConfigurationError> {
        let Some(value) = self.get(var) else {
            return Ok(None);
        };
        let mut stations = Vec::new();
        for item in split_list(&value) {
            let crs =
                Crs::parse_normalized(item).map_err(|source| ConfigurationError::InvalidStation {
                    var,
                    value: item.to_string(),
                    source,
                })?;
            if !stations.contains(&crs) {
                stations.push(crs);
            }
        }
        Ok(Some(stations))
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}
