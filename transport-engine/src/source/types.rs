//! Upstream response DTOs.
//!
//! These map directly to the upstream JSON bodies. They use `Option`
//! liberally because the upstreams omit fields rather than sending nulls,
//! and the two rail schemas disagree on which fields are guaranteed.

use serde::Deserialize;

/// Board from the Rail Data Marketplace LDBWS API
/// (`GetDepBoardWithDetails` / `GetArrBoardWithDetails`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DarwinBoard {
    /// ISO 8601 datetime with offset.
    pub generated_at: String,
    pub location_name: String,
    pub crs: String,
    pub train_services: Option<Vec<LdbService>>,
    pub platform_available: Option<bool>,
    pub are_services_available: Option<bool>,
    pub nrcc_messages: Option<Vec<DarwinMessage>>,
}

/// Board from the Huxley2 proxy.
///
/// Same service shape as Darwin, but `generatedAt` can be missing and
/// messages use a lowercase key.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuxleyBoard {
    pub generated_at: Option<String>,
    pub location_name: Option<String>,
    pub crs: Option<String>,
    pub train_services: Option<Vec<LdbService>>,
    pub platform_available: Option<bool>,
    pub are_services_available: Option<bool>,
    pub nrcc_messages: Option<Vec<HuxleyMessage>>,
}

/// NRCC message as Darwin sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct DarwinMessage {
    /// May contain HTML.
    #[serde(rename = "Value")]
    pub value: Option<String>,
}

/// NRCC message as Huxley sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct HuxleyMessage {
    #[serde(alias = "Value")]
    pub value: Option<String>,
}

/// A service on a board, including calling points.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdbService {
    /// Ephemeral Darwin service ID.
    #[serde(rename = "serviceID", alias = "serviceId")]
    pub service_id: Option<String>,

    /// Scheduled arrival at the board station.
    pub sta: Option<String>,
    /// Estimated arrival: "On time", "Delayed", "Cancelled", or "HH:MM".
    pub eta: Option<String>,
    /// Scheduled departure from the board station.
    pub std: Option<String>,
    /// Estimated departure, same vocabulary as `eta`.
    pub etd: Option<String>,

    pub platform: Option<String>,
    pub operator: Option<String>,
    pub operator_code: Option<String>,
    pub is_cancelled: Option<bool>,
    #[serde(alias = "cancellationReason")]
    pub cancel_reason: Option<String>,
    pub delay_reason: Option<String>,

    pub origin: Option<Vec<ServiceLocation>>,
    pub destination: Option<Vec<ServiceLocation>>,

    /// Stops before the board station, one array per train portion.
    pub previous_calling_points: Option<Vec<Option<ArrayOfCallingPoints>>>,
    /// Stops after the board station, one array per train portion.
    pub subsequent_calling_points: Option<Vec<Option<ArrayOfCallingPoints>>>,
}

/// Wrapper for the calling points of one portion of a split/join train.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayOfCallingPoints {
    pub calling_point: Option<Vec<CallingPoint>>,
}

/// A single calling point.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallingPoint {
    pub location_name: String,
    pub crs: Option<String>,
    /// Scheduled time (arrival for previous, departure for subsequent).
    pub st: Option<String>,
    pub et: Option<String>,
    /// Actual time, present once the train has called.
    pub at: Option<String>,
    pub is_cancelled: Option<bool>,
}

/// Origin or destination location.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLocation {
    pub location_name: String,
    pub crs: Option<String>,
    /// e.g. "via Bristol Parkway".
    pub via: Option<String>,
}

/// An entry of TfL `Line/{ids}/Status`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TflLine {
    pub id: String,
    pub name: String,
    pub mode_name: Option<String>,
    #[serde(default)]
    pub line_statuses: Vec<TflLineStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TflLineStatus {
    pub status_severity: i32,
    pub status_severity_description: String,
    pub reason: Option<String>,
    #[serde(default)]
    pub validity_periods: Vec<TflValidityPeriod>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TflValidityPeriod {
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    #[serde(default)]
    pub is_now: bool,
}

/// An entry of TfL `StopPoint/{id}/Arrivals`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TflArrival {
    pub naptan_id: Option<String>,
    pub line_name: String,
    pub destination_name: Option<String>,
    /// ISO 8601 UTC.
    pub expected_arrival: Option<String>,
    /// Seconds.
    pub time_to_station: i64,
    pub vehicle_id: Option<String>,
    pub towards: Option<String>,
    pub platform_name: Option<String>,
}
