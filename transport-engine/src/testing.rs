//! Test doubles shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::cache::AggregatedResult;
use crate::domain::{
    BoardMode, BusRecord, Crs, LineSeverity, LineStatusRecord, RailTime, ServiceStatus,
    StationQuery, TrainRecord,
};
use crate::source::{
    RawSourceResponse, Schema, SourceAdapter, SourceError, SourceKind, TflFeed,
};

pub fn crs(s: &str) -> Crs {
    Crs::parse(s).unwrap()
}

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}

pub fn time(s: &str) -> RailTime {
    RailTime::parse_hhmm(s, date()).unwrap()
}

/// A plain on-time record from GRP to `destination`.
pub fn train(scheduled: &str, destination: &str) -> TrainRecord {
    TrainRecord {
        service_id: Some(format!("{destination}-{scheduled}")),
        scheduled: time(scheduled),
        expected: time(scheduled),
        status: ServiceStatus::OnTime,
        platform: Some("1".to_string()),
        destination: format!("Station {destination}"),
        destination_crs: Some(crs(destination)),
        origin: "Station ORP".to_string(),
        origin_crs: Some(crs("ORP")),
        operator: Some("Southeastern".to_string()),
        operator_code: Some("SE".to_string()),
        is_cancelled: false,
        cancel_reason: None,
        delay_reason: None,
        calling_points: Vec::new(),
    }
}

/// A GRP result with one record per destination, ten minutes apart from
/// 10:35, generated at 10:30.
pub fn sample_result(mode: BoardMode, destinations: &[&str]) -> AggregatedResult {
    let records = destinations
        .iter()
        .enumerate()
        .map(|(i, dest)| {
            let minutes = 35 + 10 * i;
            let hhmm = format!("{:02}:{:02}", 10 + minutes / 60, minutes % 60);
            train(&hhmm, dest)
        })
        .collect();

    AggregatedResult {
        station: crs("GRP"),
        mode,
        location_name: "Grove Park".to_string(),
        generated_at: date().and_hms_opt(10, 30, 0).unwrap(),
        fetched_at: Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 1).unwrap(),
        source: SourceKind::Direct,
        records,
        line_statuses: Vec::new(),
        nrcc_messages: Vec::new(),
        platforms_available: true,
        services_available: true,
    }
}

/// A minimal valid board body for GRP with one departure at 10:35.
pub const GRP_BOARD: &str = r#"{
    "generatedAt": "2024-03-15T10:30:00+00:00",
    "locationName": "Grove Park",
    "crs": "GRP",
    "trainServices": [
        {"serviceID": "s1", "std": "10:35", "sta": "10:34",
         "destination": [{"locationName": "London Charing Cross", "crs": "CHX"}],
         "origin": [{"locationName": "Sevenoaks", "crs": "SEV"}]}
    ]
}"#;

/// [`GRP_BOARD`] rewritten for another station.
pub fn station_board(station: Crs) -> String {
    if station.as_str() == "GRP" {
        return GRP_BOARD.to_string();
    }
    GRP_BOARD
        .replace(r#""crs": "GRP""#, &format!(r#""crs": "{station}""#))
        .replace("Grove Park", &format!("Station {station}"))
}

#[derive(Clone)]
enum Outcome {
    /// The requested station's [`station_board`].
    Board,
    Body(String),
    Fail(SourceError),
}

impl From<Result<String, SourceError>> for Outcome {
    fn from(result: Result<String, SourceError>) -> Self {
        match result {
            Ok(body) => Outcome::Body(body),
            Err(err) => Outcome::Fail(err),
        }
    }
}

/// Outcomes replayed in order; the last one repeats forever.
struct Script {
    queue: VecDeque<Outcome>,
    last: Option<Outcome>,
}

impl Script {
    fn new(outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        Self {
            queue: outcomes.into_iter().collect(),
            last: None,
        }
    }

    fn next(&mut self) -> Option<Outcome> {
        if let Some(outcome) = self.queue.pop_front() {
            self.last = Some(outcome);
        }
        self.last.clone()
    }
}

/// Rail adapter that replays scripted outcomes and counts calls.
///
/// Once a script runs out, every call repeats its last outcome. Stations
/// can be given their own script and delay; the rest share one.
pub struct ScriptedAdapter {
    kind: SourceKind,
    script: Mutex<Script>,
    stations: Mutex<HashMap<Crs, Script>>,
    delay: Option<Duration>,
    station_delays: HashMap<Crs, Duration>,
    calls: AtomicUsize,
    station_calls: Mutex<HashMap<Crs, usize>>,
}

impl ScriptedAdapter {
    pub fn new(kind: SourceKind, script: Vec<Result<String, SourceError>>) -> Self {
        Self::scripted(kind, Script::new(script.into_iter().map(Outcome::from)))
    }

    /// Always answers with a one-departure board for the requested station.
    pub fn ok(kind: SourceKind) -> Self {
        Self::scripted(kind, Script::new([Outcome::Board]))
    }

    pub fn failing(kind: SourceKind, err: SourceError) -> Self {
        Self::new(kind, vec![Err(err)])
    }

    fn scripted(kind: SourceKind, script: Script) -> Self {
        Self {
            kind,
            script: Mutex::new(script),
            stations: Mutex::new(HashMap::new()),
            delay: None,
            station_delays: HashMap::new(),
            calls: AtomicUsize::new(0),
            station_calls: Mutex::new(HashMap::new()),
        }
    }

    /// Make every fetch take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer `station` from its own script.
    pub fn with_station(mut self, station: &str, script: Vec<Result<String, SourceError>>) -> Self {
        self.stations
            .get_mut()
            .unwrap()
            .insert(crs(station), Script::new(script.into_iter().map(Outcome::from)));
        self
    }

    /// Make fetches for `station` take `delay` before answering.
    pub fn with_station_delay(mut self, station: &str, delay: Duration) -> Self {
        self.station_delays.insert(crs(station), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, station: &str) -> usize {
        let calls = self.station_calls.lock().unwrap();
        calls.get(&crs(station)).copied().unwrap_or(0)
    }

    fn next(&self, station: Crs) -> Result<String, SourceError> {
        let outcome = match self.stations.lock().unwrap().get_mut(&station) {
            Some(script) => script.next(),
            None => self.script.lock().unwrap().next(),
        };
        match outcome {
            Some(Outcome::Board) => Ok(station_board(station)),
            Some(Outcome::Body(body)) => Ok(body),
            Some(Outcome::Fail(err)) => Err(err),
            None => Err(SourceError::transient(self.kind, "empty script")),
        }
    }
}

impl SourceAdapter for ScriptedAdapter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn fetch<'a>(
        &'a self,
        query: &'a StationQuery,
    ) -> BoxFuture<'a, Result<RawSourceResponse, SourceError>> {
        async move {
            let station = query.station();
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.station_calls.lock().unwrap().entry(station).or_default() += 1;

            let delay = self.station_delays.get(&station).copied().or(self.delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let body = self.next(station)?;
            Ok(RawSourceResponse {
                source: self.kind,
                schema: match self.kind {
                    SourceKind::Direct => Schema::Darwin,
                    _ => Schema::Huxley,
                },
                station,
                mode: query.mode(),
                status: 200,
                received_at: Utc::now(),
                retry_after: None,
                body,
            })
        }
        .boxed()
    }
}

/// TfL feed returning fixed records and counting calls.
#[derive(Default)]
pub struct ScriptedTflFeed {
    fail: bool,
    line_calls: AtomicUsize,
    arrival_calls: AtomicUsize,
}

impl ScriptedTflFeed {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn line_calls(&self) -> usize {
        self.line_calls.load(Ordering::SeqCst)
    }

    pub fn arrival_calls(&self) -> usize {
        self.arrival_calls.load(Ordering::SeqCst)
    }
}

impl TflFeed for ScriptedTflFeed {
    fn line_status<'a>(
        &'a self,
        line_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<LineStatusRecord>, SourceError>> {
        self.line_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.fail {
            Err(SourceError::transient(SourceKind::Tfl, "HTTP 503"))
        } else {
            Ok(line_ids
                .iter()
                .map(|id| LineStatusRecord {
                    line_id: id.clone(),
                    line_name: id.clone(),
                    mode: Some("national-rail".to_string()),
                    severity: LineSeverity::GoodService,
                    description: "Good Service".to_string(),
                    reason: None,
                    affected: None,
                })
                .collect())
        };
        async move { result }.boxed()
    }

    fn stop_arrivals<'a>(
        &'a self,
        stop_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<BusRecord>, SourceError>> {
        self.arrival_calls.fetch_add(1, Ordering::SeqCst);
        let arrival = |line: &str, destination: &str, secs: i64| BusRecord {
            stop_id: stop_id.to_string(),
            line_name: line.to_string(),
            destination: destination.to_string(),
            expected_arrival: None,
            time_to_station_secs: secs,
            vehicle_id: None,
            towards: None,
            platform: None,
        };
        let result = if self.fail {
            Err(SourceError::transient(SourceKind::Tfl, "HTTP 503"))
        } else if stop_id.starts_with("940G") {
            Ok(vec![
                arrival("DLR", "Bank DLR Station", 420),
                arrival("DLR", "Stratford DLR Station", 120),
                arrival("DLR", "Bank DLR Station", 60),
            ])
        } else {
            Ok(vec![arrival("181", "Lewisham", 240)])
        };
        async move { result }.boxed()
    }
}
