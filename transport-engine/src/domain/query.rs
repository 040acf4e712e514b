//! Request descriptors for boards.

use std::fmt;

use serde::Serialize;

use super::Crs;

/// Which upstream board a query targets.
///
/// Arrivals and departures are structurally different upstream queries;
/// one is never derived from the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardMode {
    Departures,
    Arrivals,
}

impl BoardMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoardMode::Departures => "departures",
            BoardMode::Arrivals => "arrivals",
        }
    }
}

impl fmt::Display for BoardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one monitored board: a station and a mode.
///
/// Each key has its own poll cycle and its own cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BoardKey {
    pub station: Crs,
    pub mode: BoardMode,
}

impl BoardKey {
    pub fn new(station: Crs, mode: BoardMode) -> Self {
        Self { station, mode }
    }
}

impl fmt::Display for BoardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.station, self.mode)
    }
}

/// Immutable description of an upstream board request.
///
/// Built once from configuration and handed to adapters by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationQuery {
    station: Crs,
    destination: Option<Crs>,
    mode: BoardMode,
    rows: u8,
    time_window: u16,
}

impl StationQuery {
    /// Create a query. `rows` is the number of services requested and
    /// `time_window` how many minutes ahead to look.
    pub fn new(
        station: Crs,
        destination: Option<Crs>,
        mode: BoardMode,
        rows: u8,
        time_window: u16,
    ) -> Self {
        Self {
            station,
            destination,
            mode,
            rows,
            time_window,
        }
    }

    pub fn station(&self) -> Crs {
        self.station
    }

    /// Upstream-side location filter, if any. Views derived from a shared
    /// fetch leave this unset and filter locally instead.
    pub fn destination(&self) -> Option<Crs> {
        self.destination
    }

    pub fn mode(&self) -> BoardMode {
        self.mode
    }

    pub fn rows(&self) -> u8 {
        self.rows
    }

    pub fn time_window(&self) -> u16 {
        self.time_window
    }

    pub fn key(&self) -> BoardKey {
        BoardKey::new(self.station, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_accessors() {
        let grp = Crs::parse("GRP").unwrap();
        let chx = Crs::parse("CHX").unwrap();
        let q = StationQuery::new(grp, Some(chx), BoardMode::Departures, 10, 120);

        assert_eq!(q.station(), grp);
        assert_eq!(q.destination(), Some(chx));
        assert_eq!(q.mode(), BoardMode::Departures);
        assert_eq!(q.rows(), 10);
        assert_eq!(q.time_window(), 120);
        assert_eq!(q.key(), BoardKey::new(grp, BoardMode::Departures));
    }

    #[test]
    fn board_key_display() {
        let key = BoardKey::new(Crs::parse("LBG").unwrap(), BoardMode::Arrivals);
        assert_eq!(key.to_string(), "LBG arrivals");
    }
}
