// File: ./src/model/observation.rs
use crate::model::task::{Field, FieldLayout};

pub const PRELIMINARY_MARKER: &str = "p";

/// One extracted table row. The last cell is always the preliminary marker
/// (`"p"` or empty), appended when the row is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub cells: Vec<String>,
}

impl RawRow {
    pub fn new<S: Into<String>>(cells: impl IntoIterator<Item = S>, preliminary: bool) -> Self {
        let mut cells: Vec<String> = cells.into_iter().map(Into::into).collect();
        cells.push(if preliminary {
            PRELIMINARY_MARKER.to_string()
        } else {
            String::new()
        });
        Self { cells }
    }

    pub fn cell(&self, index: usize) -> &str {
        self.cells.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn marker(&self) -> &str {
        self.cells.last().map(String::as_str).unwrap_or("")
    }

    /// Cells before the marker.
    pub fn data_cells(&self) -> &[String] {
        match self.cells.split_last() {
            Some((_, data)) => data,
            None => &[],
        }
    }

    /// True when the row carries no usable text.
    pub fn is_empty(&self) -> bool {
        self.data_cells().iter().all(|c| c.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedObservation {
    /// `DD/MM/YYYY`, or the raw text when it could not be parsed.
    pub date: String,
    pub forecast: String,
    pub actual: String,
    pub preliminary: bool,
}

impl NormalizedObservation {
    pub fn value(&self, field: Field) -> &str {
        match field {
            Field::Date => &self.date,
            Field::Forecast => &self.forecast,
            Field::Actual => &self.actual,
        }
    }

    /// Field values in layout order, as they are written to the sheet.
    pub fn values(&self, layout: FieldLayout) -> Vec<String> {
        layout
            .fields()
            .iter()
            .map(|f| self.value(*f).to_string())
            .collect()
    }
}
