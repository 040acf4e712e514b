//! Request and response shapes for the JSON API.

use serde::{Deserialize, Serialize};

use crate::domain::{BoardKey, BusRecord, LineStatusRecord, TrainRecord, overall_line_status};
use crate::projection::FilteredView;
use crate::scheduler::{PollState, PollStatus};

/// Query for a board view.
#[derive(Debug, Default, Deserialize)]
pub struct ViewRequest {
    /// Destination (departures) or origin (arrivals): CRS code or exact
    /// station name.
    pub destination: Option<String>,
}

/// Query for line status.
#[derive(Debug, Default, Deserialize)]
pub struct LinesRequest {
    /// Comma-separated TfL line ids. Defaults to the configured lines.
    pub lines: Option<String>,
}

/// A board view with its headline.
#[derive(Debug, Serialize)]
pub struct ViewResponse {
    /// Expected time of the next service, "Cancelled", or "No services".
    pub state: String,
    pub next: Option<TrainRecord>,
    #[serde(flatten)]
    pub view: FilteredView,
}

impl From<FilteredView> for ViewResponse {
    fn from(view: FilteredView) -> Self {
        Self {
            state: view.state(),
            next: view.next().cloned(),
            view,
        }
    }
}

/// One monitored board in the health response.
#[derive(Debug, Serialize)]
pub struct BoardSummary {
    pub board: String,
    pub state: PollState,
    pub last_error: Option<String>,
    pub auth_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub boards: Vec<BoardSummary>,
}

impl BoardSummary {
    pub fn new(key: BoardKey, status: PollStatus) -> Self {
        Self {
            board: key.to_string(),
            state: status.state,
            last_error: status.last_error,
            auth_error: status.auth_error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LineStatusResponse {
    /// First disruption reported, "Good Service", or "Unknown".
    pub overall: String,
    pub lines: Vec<LineStatusRecord>,
}

impl LineStatusResponse {
    pub fn new(lines: Vec<LineStatusRecord>) -> Self {
        Self {
            overall: overall_line_status(&lines),
            lines,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BusArrivalsResponse {
    pub stop_id: String,
    pub arrivals: Vec<BusRecord>,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
