//! TfL line status and bus arrival normalization.

use chrono::{DateTime, Utc};

use crate::domain::{BusRecord, LineSeverity, LineStatusRecord, ValidityPeriod};
use crate::source::types::{TflArrival, TflLine, TflValidityPeriod};
use crate::source::{SourceError, SourceKind};

/// Parse a `Line/{ids}/Status` body. Each reported status of each line
/// becomes one record.
pub fn parse_line_statuses(body: &str) -> Result<Vec<LineStatusRecord>, SourceError> {
    let lines: Vec<TflLine> = serde_json::from_str(body)
        .map_err(|e| SourceError::malformed(SourceKind::Tfl, format!("invalid line status: {e}")))?;

    Ok(lines
        .into_iter()
        .flat_map(|line| {
            let TflLine {
                id,
                name,
                mode_name,
                line_statuses,
            } = line;
            line_statuses.into_iter().map(move |status| LineStatusRecord {
                line_id: id.clone(),
                line_name: name.clone(),
                mode: mode_name.clone(),
                severity: LineSeverity::from_code(status.status_severity),
                description: status.status_severity_description,
                reason: status.reason.filter(|r| !r.trim().is_empty()),
                affected: current_period(&status.validity_periods),
            })
        })
        .collect())
}

/// Parse a `StopPoint/{id}/Arrivals` body, soonest first.
pub fn parse_bus_arrivals(stop_id: &str, body: &str) -> Result<Vec<BusRecord>, SourceError> {
    let arrivals: Vec<TflArrival> = serde_json::from_str(body)
        .map_err(|e| SourceError::malformed(SourceKind::Tfl, format!("invalid arrivals: {e}")))?;

    let mut records: Vec<BusRecord> = arrivals
        .into_iter()
        .map(|a| BusRecord {
            stop_id: a.naptan_id.unwrap_or_else(|| stop_id.to_string()),
            line_name: a.line_name,
            destination: a.destination_name.unwrap_or_else(|| "Unknown".to_string()),
            expected_arrival: a.expected_arrival.as_deref().and_then(parse_utc),
            time_to_station_secs: a.time_to_station,
            vehicle_id: a.vehicle_id,
            towards: a.towards,
            platform: a.platform_name,
        })
        .collect();

    records.sort_by_key(|r| (r.expected_arrival.is_none(), r.expected_arrival, r.time_to_station_secs));
    Ok(records)
}

/// The period flagged as current, else the first one listed.
fn current_period(periods: &[TflValidityPeriod]) -> Option<ValidityPeriod> {
    let period = periods.iter().find(|p| p.is_now).or_else(|| periods.first())?;
    Some(ValidityPeriod {
        from: period.from_date.as_deref().and_then(parse_utc),
        to: period.to_date.as_deref().and_then(parse_utc),
        is_now: period.is_now,
    })
}

fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::overall_line_status;
    use crate::source::ErrorClass;
    use chrono::TimeZone;

    #[test]
    fn line_statuses() {
        let body = r#"[
            {"id": "southeastern", "name": "Southeastern", "modeName": "national-rail",
             "lineStatuses": [{
                "statusSeverity": 9,
                "statusSeverityDescription": "Minor Delays",
                "reason": "Signal failure at Hither Green",
                "validityPeriods": [
                    {"fromDate": "2024-03-14T06:00:00Z", "toDate": "2024-03-14T23:00:00Z", "isNow": false},
                    {"fromDate": "2024-03-15T06:00:00Z", "toDate": "2024-03-16T01:29:00Z", "isNow": true}
                ]}]},
            {"id": "thameslink", "name": "Thameslink", "lineStatuses": [
                {"statusSeverity": 10, "statusSeverityDescription": "Good Service", "reason": ""}
            ]}
        ]"#;

        let records = parse_line_statuses(body).unwrap();

        assert_eq!(records.len(), 2);
        let se = &records[0];
        assert_eq!(se.severity, LineSeverity::MinorDelays);
        assert_eq!(se.reason.as_deref(), Some("Signal failure at Hither Green"));
        let affected = se.affected.as_ref().unwrap();
        assert!(affected.is_now);
        assert_eq!(
            affected.from,
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 6, 0, 0).unwrap())
        );

        let tl = &records[1];
        assert_eq!(tl.severity, LineSeverity::GoodService);
        assert!(tl.reason.is_none());
        assert!(tl.affected.is_none());

        assert_eq!(overall_line_status(&records), "Minor Delays");
    }

    #[test]
    fn bus_arrivals_sorted_soonest_first() {
        let body = r#"[
            {"lineName": "181", "destinationName": "Lewisham", "expectedArrival": "2024-03-15T10:48:00Z", "timeToStation": 700},
            {"naptanId": "490007553E", "lineName": "124", "destinationName": "Catford", "expectedArrival": "2024-03-15T10:37:00Z", "timeToStation": 60, "vehicleId": "SN12ABC"},
            {"lineName": "273", "timeToStation": 30}
        ]"#;

        let records = parse_bus_arrivals("490007553E", body).unwrap();

        let lines: Vec<&str> = records.iter().map(|r| r.line_name.as_str()).collect();
        assert_eq!(lines, vec!["124", "181", "273"]);
        assert_eq!(records[0].vehicle_id.as_deref(), Some("SN12ABC"));
        assert_eq!(records[1].stop_id, "490007553E");
        assert_eq!(records[2].destination, "Unknown");
        assert_eq!(records[0].minutes_away(), 1);
    }

    #[test]
    fn malformed_tfl_bodies() {
        let err = parse_line_statuses(r#"{"message": "no"}"#).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Malformed);
        assert_eq!(err.kind(), SourceKind::Tfl);

        assert!(parse_bus_arrivals("x", "[{\"lineName\": 5}]").is_err());
    }
}
