// File: ./src/model/mod.rs
pub mod format;
pub mod normalize;
pub mod observation;
pub mod task;

pub use format::format_row;
pub use normalize::{
    CorruptCell, DateOrder, compare_dates, comparison_form, convert_magnitude, normalize_date,
    normalize_sheet_value, parse_canonical_date,
};
pub use observation::{NormalizedObservation, RawRow};
pub use task::{Cursor, Field, FieldLayout, SeriesKey, SeriesTask, Slot, SlotFilter};
