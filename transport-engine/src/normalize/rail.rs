//! Rail board normalization.
//!
//! Both rail schemas share the LDB service shape but differ in board
//! metadata. Each body is first parsed into a tagged intermediate board,
//! then mapped onto canonical [`TrainRecord`]s by one pure function.

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Europe::London;

use crate::domain::{BoardMode, CallingPoint, Crs, RailTime, ServiceStatus, TrainRecord};
use crate::source::types::{self, DarwinBoard, HuxleyBoard, LdbService, ServiceLocation};
use crate::source::{RawSourceResponse, Schema, SourceError};

/// A parsed upstream board, tagged by schema.
#[derive(Debug, Clone)]
pub enum IntermediateBoard {
    Darwin(DarwinBoard),
    Huxley(HuxleyBoard),
}

/// Canonical content of one board fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedBoard {
    pub location_name: String,
    pub crs: Crs,
    /// Upstream generation time, UK local.
    pub generated_at: NaiveDateTime,
    /// In upstream order.
    pub records: Vec<TrainRecord>,
    /// Advisory text with markup removed.
    pub nrcc_messages: Vec<String>,
    pub platforms_available: bool,
    pub services_available: bool,
    /// Services that could not be normalized, with the reason. The caller
    /// decides whether to log them.
    pub skipped: Vec<String>,
}

/// Parse a body according to its schema.
pub fn parse_board(raw: &RawSourceResponse) -> Result<IntermediateBoard, SourceError> {
    let board = match raw.schema {
        Schema::Darwin => serde_json::from_str::<DarwinBoard>(&raw.body)
            .map(IntermediateBoard::Darwin)
            .map_err(|e| SourceError::malformed(raw.source, format!("invalid Darwin board: {e}")))?,
        Schema::Huxley => serde_json::from_str::<HuxleyBoard>(&raw.body)
            .map(IntermediateBoard::Huxley)
            .map_err(|e| SourceError::malformed(raw.source, format!("invalid Huxley board: {e}")))?,
    };

    if let IntermediateBoard::Huxley(b) = &board
        && b.location_name.is_none()
        && b.crs.is_none()
    {
        return Err(SourceError::malformed(
            raw.source,
            "Huxley board has no location",
        ));
    }

    Ok(board)
}

/// Normalize a raw rail response into canonical records.
///
/// Pure: the only inputs are the response and its metadata, so identical
/// responses always produce identical boards.
pub fn normalize(raw: &RawSourceResponse) -> Result<NormalizedBoard, SourceError> {
    let board = parse_board(raw)?;

    let parts = match &board {
        IntermediateBoard::Darwin(b) => BoardParts {
            location_name: Some(b.location_name.as_str()),
            crs: Some(b.crs.as_str()),
            generated_at: Some(b.generated_at.as_str()),
            services: b.train_services.as_deref().unwrap_or(&[]),
            messages: b
                .nrcc_messages
                .iter()
                .flatten()
                .filter_map(|m| m.value.as_deref())
                .collect(),
            platforms_available: b.platform_available,
            services_available: b.are_services_available,
        },
        IntermediateBoard::Huxley(b) => BoardParts {
            location_name: b.location_name.as_deref(),
            crs: b.crs.as_deref(),
            generated_at: b.generated_at.as_deref(),
            services: b.train_services.as_deref().unwrap_or(&[]),
            messages: b
                .nrcc_messages
                .iter()
                .flatten()
                .filter_map(|m| m.value.as_deref())
                .collect(),
            platforms_available: b.platform_available,
            services_available: b.are_services_available,
        },
    };

    build(parts, raw)
}

/// Schema-independent view of a parsed board.
struct BoardParts<'a> {
    location_name: Option<&'a str>,
    crs: Option<&'a str>,
    generated_at: Option<&'a str>,
    services: &'a [LdbService],
    messages: Vec<&'a str>,
    platforms_available: Option<bool>,
    services_available: Option<bool>,
}

fn build(parts: BoardParts<'_>, raw: &RawSourceResponse) -> Result<NormalizedBoard, SourceError> {
    let crs = match parts.crs {
        Some(s) => Crs::parse_normalized(s)
            .map_err(|_| SourceError::malformed(raw.source, format!("invalid board CRS {s:?}")))?,
        None => raw.station,
    };
    if crs != raw.station {
        return Err(SourceError::malformed(
            raw.source,
            format!("board is for {crs}, requested {}", raw.station),
        ));
    }

    let generated_at = local_generation_time(parts.generated_at, raw.received_at);

    let mut records = Vec::with_capacity(parts.services.len());
    let mut skipped = Vec::new();
    for service in parts.services {
        match convert_service(service, raw.mode, generated_at) {
            Ok(record) => records.push(record),
            Err(reason) => skipped.push(format!(
                "{}: {}",
                service.service_id.as_deref().unwrap_or("unknown service"),
                reason
            )),
        }
    }

    let nrcc_messages = parts
        .messages
        .into_iter()
        .map(strip_markup)
        .filter(|m| !m.is_empty())
        .collect();

    Ok(NormalizedBoard {
        location_name: parts
            .location_name
            .map(str::to_string)
            .unwrap_or_else(|| crs.to_string()),
        crs,
        generated_at,
        records,
        nrcc_messages,
        platforms_available: parts.platforms_available.unwrap_or(false),
        services_available: parts.services_available.unwrap_or(true),
        skipped,
    })
}

/// Board generation time in UK local time, falling back to when the
/// response was received.
fn local_generation_time(generated_at: Option<&str>, received_at: DateTime<Utc>) -> NaiveDateTime {
    generated_at
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.with_timezone(&London).naive_local())
        .unwrap_or_else(|| received_at.with_timezone(&London).naive_local())
}

fn convert_service(
    service: &LdbService,
    mode: BoardMode,
    anchor: NaiveDateTime,
) -> Result<TrainRecord, String> {
    let (scheduled_raw, expected_raw, calls) = match mode {
        BoardMode::Departures => (
            service.std.as_deref().or(service.sta.as_deref()),
            service.etd.as_deref(),
            service.subsequent_calling_points.as_deref(),
        ),
        BoardMode::Arrivals => (
            service.sta.as_deref().or(service.std.as_deref()),
            service.eta.as_deref(),
            service.previous_calling_points.as_deref(),
        ),
    };

    let scheduled_raw = scheduled_raw.ok_or("no scheduled time")?;
    let scheduled = RailTime::parse_near(scheduled_raw, anchor)
        .map_err(|e| format!("scheduled time {scheduled_raw:?}: {e}"))?;

    let (mut expected, mut status) = classify_expected(expected_raw, scheduled);
    let is_cancelled = service.is_cancelled.unwrap_or(false) || status == ServiceStatus::Cancelled;
    if is_cancelled {
        expected = scheduled;
        status = ServiceStatus::Cancelled;
    }

    let (destination, destination_crs) = locations(service.destination.as_deref());
    let (origin, origin_crs) = locations(service.origin.as_deref());

    Ok(TrainRecord {
        service_id: service.service_id.clone(),
        scheduled,
        expected,
        status,
        platform: non_empty(service.platform.as_deref()),
        destination,
        destination_crs,
        origin,
        origin_crs,
        operator: non_empty(service.operator.as_deref()),
        operator_code: non_empty(service.operator_code.as_deref()),
        is_cancelled,
        cancel_reason: non_empty(service.cancel_reason.as_deref()),
        delay_reason: non_empty(service.delay_reason.as_deref()),
        calling_points: calling_points(calls, scheduled),
    })
}

/// Interpret an upstream expected-time field.
///
/// Absent, "On time", or equal to the scheduled time all mean on time and
/// yield `expected == scheduled`. "Delayed", "Cancelled" and "No report"
/// keep the scheduled time as a placeholder. Unrecognised text is treated
/// as no report.
pub fn classify_expected(raw: Option<&str>, scheduled: RailTime) -> (RailTime, ServiceStatus) {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return (scheduled, ServiceStatus::OnTime);
    };

    match raw.to_ascii_lowercase().as_str() {
        "on time" => (scheduled, ServiceStatus::OnTime),
        "delayed" => (scheduled, ServiceStatus::Delayed),
        "cancelled" => (scheduled, ServiceStatus::Cancelled),
        "no report" => (scheduled, ServiceStatus::NoReport),
        _ => match RailTime::parse_near(raw, scheduled.to_datetime()) {
            Ok(t) if t == scheduled => (scheduled, ServiceStatus::OnTime),
            Ok(t) => (t, ServiceStatus::Estimated),
            Err(_) => (scheduled, ServiceStatus::NoReport),
        },
    }
}

/// Joined names and the CRS of the first location.
fn locations(locs: Option<&[ServiceLocation]>) -> (String, Option<Crs>) {
    match locs {
        Some(locs) if !locs.is_empty() => {
            let name = locs
                .iter()
                .map(|l| l.location_name.as_str())
                .collect::<Vec<_>>()
                .join(" & ");
            let crs = locs[0].crs.as_deref().and_then(|c| Crs::parse(c).ok());
            (name, crs)
        }
        _ => ("Unknown".to_string(), None),
    }
}

/// Calling points of the main portion, each time resolved relative to
/// the previous one so services crossing midnight roll over.
fn calling_points(
    portions: Option<&[Option<types::ArrayOfCallingPoints>]>,
    board_time: RailTime,
) -> Vec<CallingPoint> {
    let Some(points) = portions
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|p| p.calling_point.as_deref())
        .find(|p| !p.is_empty())
    else {
        return Vec::new();
    };

    let mut anchor = board_time.to_datetime();
    points
        .iter()
        .map(|cp| {
            let scheduled = cp
                .st
                .as_deref()
                .and_then(|st| RailTime::parse_near(st, anchor).ok());
            if let Some(s) = scheduled {
                anchor = s.to_datetime();
            }

            let realtime = cp.at.as_deref().or(cp.et.as_deref()).map(str::trim);
            let expected = match (realtime, scheduled) {
                (Some(rt), Some(s)) if rt.eq_ignore_ascii_case("on time") => Some(s),
                (Some(rt), _) => RailTime::parse_near(rt, anchor).ok(),
                (None, s) => s,
            };

            CallingPoint {
                station: cp.location_name.clone(),
                crs: cp.crs.as_deref().and_then(|c| Crs::parse(c).ok()),
                scheduled,
                expected,
                is_cancelled: cp.is_cancelled.unwrap_or(false),
            }
        })
        .collect()
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Remove HTML tags and common entities from advisory text and collapse
/// whitespace.
pub fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }

    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ErrorClass, SourceKind};
    use chrono::{NaiveDate, TimeZone};
    use proptest::prelude::*;

    fn raw(schema: Schema, mode: BoardMode, body: &str) -> RawSourceResponse {
        RawSourceResponse {
            source: match schema {
                Schema::Darwin => SourceKind::Direct,
                Schema::Huxley => SourceKind::Fallback,
            },
            schema,
            station: Crs::parse("GRP").unwrap(),
            mode,
            status: 200,
            received_at: Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 5).unwrap(),
            retry_after: None,
            body: body.to_string(),
        }
    }

    fn darwin_board(generated_at: &str, services: &str) -> String {
        format!(
            r#"{{
                "generatedAt": "{generated_at}",
                "locationName": "Grove Park",
                "crs": "GRP",
                "platformAvailable": true,
                "trainServices": {services}
            }}"#
        )
    }

    fn at(date: (i32, u32, u32), hhmm: &str) -> RailTime {
        let date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        RailTime::parse_hhmm(hhmm, date).unwrap()
    }

    #[test]
    fn absent_expected_is_on_time() {
        let body = darwin_board(
            "2024-03-15T10:30:00+00:00",
            r#"[{"serviceID": "a", "std": "10:35",
                 "destination": [{"locationName": "London Charing Cross", "crs": "CHX"}]}]"#,
        );
        let board = normalize(&raw(Schema::Darwin, BoardMode::Departures, &body)).unwrap();

        assert_eq!(board.records.len(), 1);
        let r = &board.records[0];
        assert_eq!(r.scheduled, at((2024, 3, 15), "10:35"));
        assert_eq!(r.expected, r.scheduled);
        assert_eq!(r.status, ServiceStatus::OnTime);
        assert_eq!(r.expected_display(), "On time");
        assert!(!r.is_cancelled);
        assert_eq!(r.destination_crs, Crs::parse("CHX").ok());
        assert!(board.platforms_available);
    }

    #[test]
    fn expected_time_variants() {
        let scheduled = at((2024, 3, 15), "10:35");

        assert_eq!(classify_expected(None, scheduled), (scheduled, ServiceStatus::OnTime));
        assert_eq!(
            classify_expected(Some("On time"), scheduled),
            (scheduled, ServiceStatus::OnTime)
        );
        assert_eq!(
            classify_expected(Some("10:35"), scheduled),
            (scheduled, ServiceStatus::OnTime)
        );
        assert_eq!(
            classify_expected(Some("10:41"), scheduled),
            (at((2024, 3, 15), "10:41"), ServiceStatus::Estimated)
        );
        assert_eq!(
            classify_expected(Some("DELAYED"), scheduled).1,
            ServiceStatus::Delayed
        );
        assert_eq!(
            classify_expected(Some("No report"), scheduled).1,
            ServiceStatus::NoReport
        );
        assert_eq!(
            classify_expected(Some("Starts here"), scheduled).1,
            ServiceStatus::NoReport
        );
    }

    #[test]
    fn cancellation_from_flag_or_sentinel() {
        let body = darwin_board(
            "2024-03-15T10:30:00+00:00",
            r#"[
                {"serviceID": "a", "std": "10:35", "etd": "Cancelled",
                 "cancelReason": "A points failure"},
                {"serviceID": "b", "std": "10:50", "etd": "10:55", "isCancelled": true},
                {"serviceID": "c", "std": "11:05", "etd": "11:09",
                 "delayReason": "A late running train"}
            ]"#,
        );
        let board = normalize(&raw(Schema::Darwin, BoardMode::Departures, &body)).unwrap();
        let [a, b, c] = board.records.as_slice() else {
            panic!("expected three records");
        };

        assert!(a.is_cancelled);
        assert_eq!(a.cancel_reason.as_deref(), Some("A points failure"));
        assert!(b.is_cancelled);
        assert_eq!(b.status, ServiceStatus::Cancelled);
        assert!(!c.is_cancelled);
        assert_eq!(c.delay_minutes(), 4);
        assert_eq!(c.delay_reason.as_deref(), Some("A late running train"));
    }

    #[test]
    fn midnight_rollover() {
        let body = darwin_board(
            "2024-03-15T23:50:00+00:00",
            r#"[{"serviceID": "a", "std": "23:58", "etd": "00:03",
                 "subsequentCallingPoints": [{"callingPoint": [
                    {"locationName": "Hither Green", "crs": "HGR", "st": "00:01"},
                    {"locationName": "London Bridge", "crs": "LBG", "st": "00:12", "et": "On time"}
                 ]}]},
                {"serviceID": "b", "std": "00:20"}]"#,
        );
        let board = normalize(&raw(Schema::Darwin, BoardMode::Departures, &body)).unwrap();

        let a = &board.records[0];
        assert_eq!(a.scheduled, at((2024, 3, 15), "23:58"));
        assert_eq!(a.expected, at((2024, 3, 16), "00:03"));
        assert_eq!(a.delay_minutes(), 5);
        assert_eq!(a.calling_points[0].scheduled, Some(at((2024, 3, 16), "00:01")));
        assert_eq!(a.calling_points[1].expected, Some(at((2024, 3, 16), "00:12")));

        assert_eq!(board.records[1].scheduled, at((2024, 3, 16), "00:20"));
    }

    #[test]
    fn generation_time_is_uk_local() {
        // 09:30 UTC in July is 10:30 BST.
        let body = darwin_board("2024-07-01T09:30:00.1234567+00:00", r#"[{"std": "10:35"}]"#);
        let board = normalize(&raw(Schema::Darwin, BoardMode::Departures, &body)).unwrap();

        assert_eq!(
            board.generated_at,
            NaiveDate::from_ymd_opt(2024, 7, 1)
                .unwrap()
                .and_hms_nano_opt(10, 30, 0, 123_456_700)
                .unwrap()
        );
        assert_eq!(board.records[0].scheduled, at((2024, 7, 1), "10:35"));
    }

    #[test]
    fn arrivals_use_origin_and_previous_points() {
        let body = r#"{
            "locationName": "Grove Park",
            "crs": "GRP",
            "trainServices": [{
                "serviceID": "arr1",
                "sta": "10:44",
                "eta": "10:47",
                "std": "10:45",
                "origin": [{"locationName": "London Charing Cross", "crs": "CHX"}],
                "destination": [{"locationName": "Sevenoaks", "crs": "SEV"}],
                "previousCallingPoints": [{"callingPoint": [
                    {"locationName": "London Charing Cross", "crs": "CHX", "st": "10:22", "at": "10:24"},
                    {"locationName": "Lewisham", "crs": "LEW", "st": "10:38", "et": "On time"}
                ]}],
                "subsequentCallingPoints": [{"callingPoint": [
                    {"locationName": "Sevenoaks", "crs": "SEV", "st": "11:05"}
                ]}]
            }]
        }"#;
        let board = normalize(&raw(Schema::Huxley, BoardMode::Arrivals, body)).unwrap();
        let r = &board.records[0];

        assert_eq!(r.scheduled, at((2024, 3, 15), "10:44"));
        assert_eq!(r.expected, at((2024, 3, 15), "10:47"));
        assert_eq!(r.far_end(BoardMode::Arrivals).1, Crs::parse("CHX").ok());
        assert_eq!(r.calling_points.len(), 2);
        assert_eq!(r.calling_points[0].expected, Some(at((2024, 3, 15), "10:24")));
        assert_eq!(r.calling_points[1].station, "Lewisham");
    }

    #[test]
    fn huxley_without_generated_at_uses_receipt_time() {
        let body = r#"{"locationName": "Grove Park", "crs": "GRP", "trainServices": null}"#;
        let board = normalize(&raw(Schema::Huxley, BoardMode::Departures, body)).unwrap();

        assert!(board.records.is_empty());
        assert_eq!(
            board.generated_at,
            NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(10, 30, 5)
                .unwrap()
        );
    }

    #[test]
    fn invalid_services_are_skipped_not_fatal() {
        let body = darwin_board(
            "2024-03-15T10:30:00+00:00",
            r#"[{"serviceID": "bad", "std": "later"}, {"serviceID": "none"}, {"std": "10:40"}]"#,
        );
        let board = normalize(&raw(Schema::Darwin, BoardMode::Departures, &body)).unwrap();

        assert_eq!(board.records.len(), 1);
        assert_eq!(board.skipped.len(), 2);
        assert!(board.skipped[0].starts_with("bad:"));
        assert!(board.skipped[1].contains("no scheduled time"));
    }

    #[test]
    fn malformed_bodies() {
        for body in ["not json", "[]", r#"{"message": "An error has occurred."}"#] {
            let err = normalize(&raw(Schema::Huxley, BoardMode::Departures, body)).unwrap_err();
            assert_eq!(err.class(), ErrorClass::Malformed, "body {body}");
            assert_eq!(err.kind(), SourceKind::Fallback);
        }

        // Darwin requires its metadata.
        let err = normalize(&raw(Schema::Darwin, BoardMode::Departures, r#"{"crs": "GRP"}"#))
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Malformed);
    }

    #[test]
    fn board_for_another_station_is_malformed() {
        let body = r#"{"generatedAt": "2024-03-15T10:30:00Z", "locationName": "Lewisham", "crs": "LEW"}"#;
        let err = normalize(&raw(Schema::Darwin, BoardMode::Departures, body)).unwrap_err();
        assert!(err.to_string().contains("LEW"));
    }

    #[test]
    fn nrcc_messages_are_stripped() {
        let body = r#"{
            "generatedAt": "2024-03-15T10:30:00Z",
            "locationName": "Grove Park",
            "crs": "GRP",
            "nrccMessages": [
                {"Value": "<p>Disruption between <a href=\"x\">Lewisham</a> &amp; Hayes.</p>\n"},
                {"Value": "<br/>"}
            ]
        }"#;
        let board = normalize(&raw(Schema::Darwin, BoardMode::Departures, body)).unwrap();

        assert_eq!(
            board.nrcc_messages,
            vec!["Disruption between Lewisham & Hayes.".to_string()]
        );
    }

    #[test]
    fn split_destinations_are_joined() {
        let body = darwin_board(
            "2024-03-15T10:30:00+00:00",
            r#"[{"std": "10:35", "destination": [
                {"locationName": "Sevenoaks", "crs": "SEV"},
                {"locationName": "Hayes (Kent)", "crs": "HYS"}
            ]}]"#,
        );
        let board = normalize(&raw(Schema::Darwin, BoardMode::Departures, &body)).unwrap();

        assert_eq!(board.records[0].destination, "Sevenoaks & Hayes (Kent)");
        assert_eq!(board.records[0].destination_crs, Crs::parse("SEV").ok());
    }

    proptest! {
        #[test]
        fn missing_estimate_defaults_to_scheduled(h in 0u32..24, m in 0u32..60) {
            let body = darwin_board(
                "2024-03-15T12:00:00+00:00",
                &format!(r#"[{{"std": "{h:02}:{m:02}"}}]"#),
            );
            let board = normalize(&raw(Schema::Darwin, BoardMode::Departures, &body)).unwrap();
            let r = &board.records[0];
            prop_assert_eq!(r.expected, r.scheduled);
            prop_assert_eq!(r.status, ServiceStatus::OnTime);
        }

        #[test]
        fn normalization_is_deterministic(
            times in proptest::collection::vec((0u32..24, 0u32..60, 0u32..10, any::<bool>()), 0..8)
        ) {
            let services: Vec<String> = times
                .iter()
                .map(|(h, m, late, cancelled)| {
                    let etd_m = (m + late) % 60;
                    format!(
                        r#"{{"std": "{h:02}:{m:02}", "etd": "{h:02}:{etd_m:02}", "isCancelled": {cancelled}}}"#
                    )
                })
                .collect();
            let body = darwin_board("2024-03-15T12:00:00+00:00", &format!("[{}]", services.join(",")));
            let input = raw(Schema::Darwin, BoardMode::Departures, &body);

            let first = normalize(&input).unwrap();
            let second = normalize(&input).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.records.len(), times.len());
        }
    }
}
