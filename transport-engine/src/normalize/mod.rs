//! Normalization of upstream bodies into canonical records.
//!
//! Everything here is pure: no I/O, no shared state. Parsing failures are
//! returned as [`SourceError::Malformed`](crate::source::SourceError).

mod rail;
mod tfl;

pub use rail::{IntermediateBoard, NormalizedBoard, classify_expected, normalize, parse_board, strip_markup};
pub use tfl::{parse_bus_arrivals, parse_line_statuses};
