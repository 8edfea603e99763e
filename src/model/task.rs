// File: ./src/model/task.rs
// Series tasks, cursors and field layouts.
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// A semantic column written to the destination sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum Field {
    Date,
    Forecast,
    Actual,
}

/// Ordered set of fields a task writes, left to right from its cursor column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumIter)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub enum FieldLayout {
    DateActual,
    #[default]
    DateForecastActual,
}

impl FieldLayout {
    pub fn fields(&self) -> &'static [Field] {
        match self {
            FieldLayout::DateActual => &[Field::Date, Field::Actual],
            FieldLayout::DateForecastActual => &[Field::Date, Field::Forecast, Field::Actual],
        }
    }

    pub fn width(&self) -> usize {
        self.fields().len()
    }

    /// Matches the exact tag list of a known layout.
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Result<Self> {
        FieldLayout::iter()
            .find(|layout| {
                layout.width() == tags.len()
                    && layout
                        .fields()
                        .iter()
                        .zip(tags)
                        .all(|(f, t)| {
                            Field::from_str(AsRef::<str>::as_ref(t)).ok() == Some(*f)
                        })
            })
            .ok_or_else(|| {
                let got: Vec<&str> = tags.iter().map(AsRef::<str>::as_ref).collect();
                anyhow!("Unknown field layout {:?}", got)
            })
    }
}

impl TryFrom<Vec<String>> for FieldLayout {
    type Error = anyhow::Error;

    fn try_from(tags: Vec<String>) -> Result<Self> {
        FieldLayout::from_tags(&tags)
    }
}

impl From<FieldLayout> for Vec<String> {
    fn from(layout: FieldLayout) -> Self {
        layout.fields().iter().map(|f| f.to_string()).collect()
    }
}

/// 1-based write position of one column group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub row: u32,
    pub column: u32,
}

impl Slot {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}C{}", self.row, self.column)
    }
}

/// Which scraped observations a slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SlotFilter {
    #[default]
    Any,
    Confirmed,
    Preliminary,
}

impl SlotFilter {
    pub fn accepts(&self, preliminary: bool) -> bool {
        match self {
            SlotFilter::Any => true,
            SlotFilter::Confirmed => !preliminary,
            SlotFilter::Preliminary => preliminary,
        }
    }

    /// Filters used when a parallel task does not list its own:
    /// every slot but the last takes confirmed figures, the last takes preliminary ones.
    pub fn parallel_defaults(len: usize) -> Vec<SlotFilter> {
        (0..len)
            .map(|i| {
                if i + 1 == len {
                    SlotFilter::Preliminary
                } else {
                    SlotFilter::Confirmed
                }
            })
            .collect()
    }
}

/// Persisted write position of a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Single(Slot),
    Parallel(Vec<Slot>),
}

impl Cursor {
    pub fn slots(&self) -> &[Slot] {
        match self {
            Cursor::Single(slot) => std::slice::from_ref(slot),
            Cursor::Parallel(slots) => slots,
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Cursor::Parallel(_))
    }

    /// Copy of the cursor with slot `index` moved down exactly one row.
    pub fn advanced(&self, index: usize) -> Cursor {
        let mut next = self.clone();
        let slot = match &mut next {
            Cursor::Single(slot) => {
                debug_assert_eq!(index, 0);
                slot
            }
            Cursor::Parallel(slots) => &mut slots[index],
        };
        slot.row += 1;
        next
    }

    pub fn rows(&self) -> Vec<u32> {
        self.slots().iter().map(|s| s.row).collect()
    }

    pub fn columns(&self) -> Vec<u32> {
        self.slots().iter().map(|s| s.column).collect()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Single(slot) => write!(f, "{}", slot),
            Cursor::Parallel(slots) => {
                let parts: Vec<String> = slots.iter().map(|s| s.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Identifies one series inside the task document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub sheet: String,
    pub tab: String,
    pub source: String,
}

impl SeriesKey {
    pub fn new(sheet: &str, tab: &str, source: &str) -> Self {
        Self {
            sheet: sheet.to_string(),
            tab: tab.to_string(),
            source: source.to_string(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} <- {}", self.sheet, self.tab, self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesTask {
    pub key: SeriesKey,
    pub cursor: Cursor,
    pub layout: FieldLayout,
    /// One filter per cursor slot.
    pub filters: Vec<SlotFilter>,
}

impl SeriesTask {
    pub fn single(key: SeriesKey, slot: Slot, layout: FieldLayout) -> Self {
        Self {
            key,
            cursor: Cursor::Single(slot),
            layout,
            filters: vec![SlotFilter::Any],
        }
    }

    pub fn parallel(key: SeriesKey, slots: Vec<Slot>, layout: FieldLayout) -> Self {
        let filters = SlotFilter::parallel_defaults(slots.len());
        Self {
            key,
            cursor: Cursor::Parallel(slots),
            layout,
            filters,
        }
    }

    pub fn with_filters(mut self, filters: Vec<SlotFilter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn filter_for(&self, index: usize) -> SlotFilter {
        self.filters.get(index).copied().unwrap_or_default()
    }
}
