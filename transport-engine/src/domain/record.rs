//! Canonical records handed to presentation layers.
//!
//! Every upstream schema is normalized into these shapes. They carry no
//! source-specific quirks: "On time" has already been turned into an
//! expected time equal to the scheduled one, and absent cancellation flags
//! have become `false`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{BoardMode, Crs, RailTime};

/// Realtime status of a rail service at the board station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// No estimate, "On time", or an estimate equal to the scheduled time.
    OnTime,
    /// A concrete estimate that differs from the scheduled time.
    Estimated,
    /// Running late with no estimate available.
    Delayed,
    Cancelled,
    /// Upstream explicitly has no realtime report.
    NoReport,
}

/// An intermediate stop of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallingPoint {
    pub station: String,
    pub crs: Option<Crs>,
    pub scheduled: Option<RailTime>,
    pub expected: Option<RailTime>,
    pub is_cancelled: bool,
}

/// One scheduled rail service at the board station.
///
/// `scheduled` is always present and `expected` defaults to it. When
/// `is_cancelled` is set, `expected` is not a meaningful estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainRecord {
    pub service_id: Option<String>,
    pub scheduled: RailTime,
    pub expected: RailTime,
    pub status: ServiceStatus,
    pub platform: Option<String>,
    pub destination: String,
    pub destination_crs: Option<Crs>,
    pub origin: String,
    pub origin_crs: Option<Crs>,
    pub operator: Option<String>,
    pub operator_code: Option<String>,
    pub is_cancelled: bool,
    pub cancel_reason: Option<String>,
    pub delay_reason: Option<String>,
    /// Ordered along the route: onward stops for departures, previous
    /// stops for arrivals.
    pub calling_points: Vec<CallingPoint>,
}

impl TrainRecord {
    /// Text a departure board would show in the "expected" column.
    pub fn expected_display(&self) -> String {
        match self.status {
            ServiceStatus::OnTime => "On time".to_string(),
            ServiceStatus::Estimated => self.expected.to_string(),
            ServiceStatus::Delayed => "Delayed".to_string(),
            ServiceStatus::Cancelled => "Cancelled".to_string(),
            ServiceStatus::NoReport => "No report".to_string(),
        }
    }

    /// Minutes between expected and scheduled; zero for cancelled services.
    pub fn delay_minutes(&self) -> i64 {
        if self.is_cancelled {
            return 0;
        }
        self.expected.signed_duration_since(self.scheduled).num_minutes()
    }

    /// The far end of the service as seen from the board: where it is
    /// going for departures, where it came from for arrivals.
    pub fn far_end(&self, mode: BoardMode) -> (&str, Option<Crs>) {
        match mode {
            BoardMode::Departures => (&self.destination, self.destination_crs),
            BoardMode::Arrivals => (&self.origin, self.origin_crs),
        }
    }
}

/// One predicted bus arrival at a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusRecord {
    pub stop_id: String,
    pub line_name: String,
    pub destination: String,
    pub expected_arrival: Option<DateTime<Utc>>,
    /// Countdown reported by upstream, in seconds.
    pub time_to_station_secs: i64,
    pub vehicle_id: Option<String>,
    pub towards: Option<String>,
    pub platform: Option<String>,
}

impl BusRecord {
    pub fn minutes_away(&self) -> i64 {
        (self.time_to_station_secs / 60).max(0)
    }
}

/// TfL status severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSeverity {
    SpecialService,
    Closed,
    Suspended,
    PartSuspended,
    PlannedClosure,
    PartClosure,
    SevereDelays,
    ReducedService,
    BusService,
    MinorDelays,
    GoodService,
    PartClosed,
    ExitOnly,
    NoStepFreeAccess,
    ChangeOfFrequency,
    Diverted,
    NotRunning,
    IssuesReported,
    NoIssues,
    Information,
    ServiceClosed,
    Other(i32),
}

impl LineSeverity {
    /// Map TfL's numeric `statusSeverity`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::SpecialService,
            1 => Self::Closed,
            2 => Self::Suspended,
            3 => Self::PartSuspended,
            4 => Self::PlannedClosure,
            5 => Self::PartClosure,
            6 => Self::SevereDelays,
            7 => Self::ReducedService,
            8 => Self::BusService,
            9 => Self::MinorDelays,
            10 => Self::GoodService,
            11 => Self::PartClosed,
            12 => Self::ExitOnly,
            13 => Self::NoStepFreeAccess,
            14 => Self::ChangeOfFrequency,
            15 => Self::Diverted,
            16 => Self::NotRunning,
            17 => Self::IssuesReported,
            18 => Self::NoIssues,
            19 => Self::Information,
            20 => Self::ServiceClosed,
            other => Self::Other(other),
        }
    }

    /// TfL's numeric code for this severity.
    pub fn code(&self) -> i32 {
        match self {
            Self::SpecialService => 0,
            Self::Closed => 1,
            Self::Suspended => 2,
            Self::PartSuspended => 3,
            Self::PlannedClosure => 4,
            Self::PartClosure => 5,
            Self::SevereDelays => 6,
            Self::ReducedService => 7,
            Self::BusService => 8,
            Self::MinorDelays => 9,
            Self::GoodService => 10,
            Self::PartClosed => 11,
            Self::ExitOnly => 12,
            Self::NoStepFreeAccess => 13,
            Self::ChangeOfFrequency => 14,
            Self::Diverted => 15,
            Self::NotRunning => 16,
            Self::IssuesReported => 17,
            Self::NoIssues => 18,
            Self::Information => 19,
            Self::ServiceClosed => 20,
            Self::Other(code) => *code,
        }
    }

    /// Codes below Good Service (10) are disruptions; everything from 10 up
    /// counts as running normally.
    pub fn is_good(&self) -> bool {
        self.code() >= 10
    }
}

/// Period a status applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidityPeriod {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub is_now: bool,
}

/// Status of one line as reported by TfL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineStatusRecord {
    pub line_id: String,
    pub line_name: String,
    pub mode: Option<String>,
    pub severity: LineSeverity,
    /// Upstream description, e.g. "Minor Delays".
    pub description: String,
    pub reason: Option<String>,
    pub affected: Option<ValidityPeriod>,
}

/// One-line summary across lines: the first disruption found, otherwise
/// "Good Service", or "Unknown" when nothing is reported.
pub fn overall_line_status(records: &[LineStatusRecord]) -> String {
    if let Some(bad) = records.iter().find(|r| !r.severity.is_good()) {
        return bad.description.clone();
    }
    if records.is_empty() {
        "Unknown".to_string()
    } else {
        "Good Service".to_string()
    }
}
