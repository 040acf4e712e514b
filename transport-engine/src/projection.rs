//! Derived views over a cached board.
//!
//! Every view is computed fresh from the current [`AggregatedResult`], so
//! any number of destination filters share one upstream fetch.

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use serde::Serialize;

use crate::cache::AggregatedResult;
use crate::domain::{
    BoardMode, BusRecord, Crs, LineStatusRecord, TrainRecord, overall_line_status,
};
use crate::source::SourceKind;

/// Calling points kept per record unless configured otherwise.
pub const DEFAULT_MAX_CALLING_POINTS: usize = 8;

/// Departures kept in a stop view.
pub const STOP_VIEW_LIMIT: usize = 10;

/// Parameters of one derived view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewParams {
    /// Destination for departures, origin for arrivals. Matched exactly
    /// against the CRS code or the station name.
    pub destination: Option<String>,
    pub mode: BoardMode,
    pub count: usize,
    pub window_minutes: u32,
    pub max_calling_points: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    #[error("cannot derive a {requested} view from a {actual} board")]
    ModeMismatch {
        requested: BoardMode,
        actual: BoardMode,
    },
}

/// A filtered, truncated view of one board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilteredView {
    pub station: Crs,
    pub mode: BoardMode,
    pub destination_filter: Option<String>,
    pub location_name: String,
    pub generated_at: NaiveDateTime,
    pub source: SourceKind,
    pub stale: bool,
    pub age_secs: u64,
    pub records: Vec<TrainRecord>,
    pub nrcc_messages: Vec<String>,
    pub line_statuses: Vec<LineStatusRecord>,
    pub overall_line_status: Option<String>,
    pub platforms_available: bool,
    pub services_available: bool,
}

impl FilteredView {
    /// Headline for the view: the next service's expected column, or
    /// "No services".
    pub fn state(&self) -> String {
        self.records
            .first()
            .map(TrainRecord::expected_display)
            .unwrap_or_else(|| "No services".to_string())
    }

    pub fn next(&self) -> Option<&TrainRecord> {
        self.records.first()
    }

    /// Annotate with cache freshness.
    pub fn with_freshness(mut self, stale: bool, age_secs: u64) -> Self {
        self.stale = stale;
        self.age_secs = age_secs;
        self
    }
}

/// Project a board into a view.
///
/// Records not matching the location filter or scheduled after
/// `now + window` are dropped. Services already departed are kept. The
/// rest are stably sorted by scheduled time and truncated to `count`.
pub fn project(
    result: &AggregatedResult,
    params: &ViewParams,
    now: NaiveDateTime,
) -> Result<FilteredView, ProjectionError> {
    if result.mode != params.mode {
        return Err(ProjectionError::ModeMismatch {
            requested: params.mode,
            actual: result.mode,
        });
    }

    let filter = params
        .destination
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let horizon = now + ChronoDuration::minutes(i64::from(params.window_minutes));

    let mut records: Vec<&TrainRecord> = result
        .records
        .iter()
        .filter(|r| filter.is_none_or(|f| matches_location(r, params.mode, f)))
        .filter(|r| r.scheduled.to_datetime() <= horizon)
        .collect();
    records.sort_by_key(|r| r.scheduled);
    records.truncate(params.count);

    let max_calls = params.max_calling_points.unwrap_or(DEFAULT_MAX_CALLING_POINTS);
    let records = records
        .into_iter()
        .map(|r| {
            let mut r = r.clone();
            r.calling_points.truncate(max_calls);
            r
        })
        .collect();

    Ok(FilteredView {
        station: result.station,
        mode: result.mode,
        destination_filter: filter.map(str::to_string),
        location_name: result.location_name.clone(),
        generated_at: result.generated_at,
        source: result.source,
        stale: false,
        age_secs: 0,
        records,
        nrcc_messages: result.nrcc_messages.clone(),
        overall_line_status: (!result.line_statuses.is_empty())
            .then(|| overall_line_status(&result.line_statuses)),
        line_statuses: result.line_statuses.clone(),
        platforms_available: result.platforms_available,
        services_available: result.services_available,
    })
}

/// Arrivals at a TfL stop, presented as departures from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopDepartures {
    pub stop_id: String,
    pub name: String,
    pub destination_filter: Option<String>,
    pub departures: Vec<BusRecord>,
}

/// Arrivals whose destination contains `destination`, ignoring case,
/// soonest first and at most `limit` of them.
pub fn project_stop(
    arrivals: &[BusRecord],
    destination: Option<&str>,
    limit: usize,
) -> Vec<BusRecord> {
    let needle = destination
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut departures: Vec<BusRecord> = arrivals
        .iter()
        .filter(|a| {
            needle
                .as_deref()
                .is_none_or(|n| a.destination.to_lowercase().contains(n))
        })
        .cloned()
        .collect();
    departures.sort_by_key(|a| a.time_to_station_secs);
    departures.truncate(limit);
    departures
}

fn matches_location(record: &TrainRecord, mode: BoardMode, filter: &str) -> bool {
    let (name, crs) = record.far_end(mode);
    name == filter || crs.is_some_and(|c| c.as_str() == filter)
}
