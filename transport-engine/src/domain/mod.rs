//! Domain types for the transport engine.
//!
//! Types here are validated at construction time, so code that receives
//! them can trust their invariants without re-checking.

mod query;
mod record;
mod station;
mod time;

pub use query::{BoardKey, BoardMode, StationQuery};
pub use record::{
    BusRecord, CallingPoint, LineSeverity, LineStatusRecord, ServiceStatus, TrainRecord,
    ValidityPeriod, overall_line_status,
};
pub use station::{Crs, InvalidCrs};
pub use time::{RailTime, TimeError};
