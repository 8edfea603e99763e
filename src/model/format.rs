// File: ./src/model/format.rs
// Maps extracted table rows onto observations.
use crate::model::normalize::{convert_magnitude, normalize_date};
use crate::model::observation::{NormalizedObservation, PRELIMINARY_MARKER, RawRow};

// Column positions in the source table.
const DATE_CELL: usize = 0;
const ACTUAL_CELL: usize = 2;
const FORECAST_CELL: usize = 3;

/// Never fails: missing cells read as empty and unparseable dates stay raw.
pub fn format_row(raw: &RawRow) -> NormalizedObservation {
    NormalizedObservation {
        date: normalize_date(raw.cell(DATE_CELL)),
        forecast: convert_magnitude(raw.cell(FORECAST_CELL)),
        actual: convert_magnitude(raw.cell(ACTUAL_CELL)),
        preliminary: raw.marker() == PRELIMINARY_MARKER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_typical_row() {
        let raw = RawRow::new(["07.02.2025 (Gen)", "14:30", "143K", "169K", "307K"], false);
        let obs = format_row(&raw);
        assert_eq!(obs.date, "07/02/2025");
        assert_eq!(obs.actual, "143000");
        assert_eq!(obs.forecast, "169000");
        assert!(!obs.preliminary);
    }

    #[test]
    fn test_format_preliminary_row() {
        let raw = RawRow::new(["Feb 7, 2025", "", "2.5%", "2.4%"], true);
        let obs = format_row(&raw);
        assert_eq!(obs.actual, "2,5%");
        assert_eq!(obs.forecast, "2,4%");
        assert!(obs.preliminary);
    }

    #[test]
    fn test_format_short_row_is_total() {
        let raw = RawRow::new(["soon"], false);
        let obs = format_row(&raw);
        assert_eq!(obs.date, "soon");
        assert_eq!(obs.actual, "");
        assert_eq!(obs.forecast, "");
    }
}
