// File: ./src/reconcile.rs
//! Decides what a freshly scraped table means for a series' sheet region.
//!
//! [`reconcile`] is pure. It looks at the task's cursor, the newest-first
//! observations and a snapshot of the tab, and returns a [`Plan`]: an ordered
//! list of cursor commits and cell writes, plus one [`Decision`] per slot pass
//! for the audit log. The runner applies the steps in order, so a cursor commit
//! always lands before the writes it precedes.
//!
//! Per slot:
//! - newer date: advance the slot one row, commit, write the new row;
//! - same date: overwrite the cursor row in place if any field differs;
//! - older or incomparable date: leave everything alone, including the row above;
//! - blank cursor row: a run stopped between committing the cursor and writing
//!   the row. Fill it in place if the scraped date is newer than the row above.
//!
//! After a newer/same decision the slot's second observation is checked
//! against the row just above the (possibly advanced) cursor row and
//! overwritten if it differs. This is how preliminary figures get replaced by
//! confirmed ones a cycle later.
use crate::model::{
    CorruptCell, Cursor, DateOrder, NormalizedObservation, SeriesTask, Slot, compare_dates,
    comparison_form, parse_canonical_date,
};
use crate::sheet::ExistingState;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Persist the whole cursor before any following write.
    Commit(Cursor),
    Write { row: u32, column: u32, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Advanced { from: u32, to: u32 },
    UpdatedInPlace { row: u32 },
    /// The cursor row was blank and got the current observation.
    Filled { row: u32 },
    Unchanged { row: u32 },
    /// Scraped date is older than the sheet's.
    Regressed { row: u32, sheet_date: String },
    /// One of the dates is not `DD/MM/YYYY`.
    Incomparable { row: u32, sheet_date: String },
    /// Nothing scraped matches the slot's filter.
    NoObservation,
    RetroCorrected { row: u32 },
    RetroUnchanged { row: u32 },
    /// No row above the cursor to correct (first row, or a header).
    RetroSkipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub slot_index: usize,
    pub slot: Slot,
    /// Date of the observation the decision was made for, empty if none.
    pub date: String,
    pub action: Action,
}

impl Decision {
    /// Regressions and unparseable dates are worth a warning.
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self.action,
            Action::Regressed { .. } | Action::Incomparable { .. }
        )
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {} ({}) ", self.slot_index, self.slot)?;
        match &self.action {
            Action::Advanced { from, to } => {
                write!(f, "advance row {} -> {} for {}", from, to, self.date)
            }
            Action::UpdatedInPlace { row } => {
                write!(f, "update row {} in place for {}", row, self.date)
            }
            Action::Filled { row } => write!(f, "fill blank row {} with {}", row, self.date),
            Action::Unchanged { row } => write!(f, "no-op, row {} already holds {}", row, self.date),
            Action::Regressed { row, sheet_date } => write!(
                f,
                "skip, scraped {} is older than {} at row {}",
                self.date, sheet_date, row
            ),
            Action::Incomparable { row, sheet_date } => write!(
                f,
                "skip, cannot compare scraped '{}' with '{}' at row {}",
                self.date, sheet_date, row
            ),
            Action::NoObservation => write!(f, "no-op, no matching observation"),
            Action::RetroCorrected { row } => {
                write!(f, "retro-correct row {} with {}", row, self.date)
            }
            Action::RetroUnchanged { row } => {
                write!(f, "no-op, row {} already holds {}", row, self.date)
            }
            Action::RetroSkipped => write!(f, "retro pass skipped, no dated row above cursor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub decisions: Vec<Decision>,
    /// Cursor after every commit in `steps`.
    pub cursor: Cursor,
}

impl Plan {
    pub fn writes(&self) -> impl Iterator<Item = (u32, u32, &str)> {
        self.steps.iter().filter_map(|s| match s {
            Step::Write { row, column, value } => Some((*row, *column, value.as_str())),
            Step::Commit(_) => None,
        })
    }

    pub fn commits(&self) -> impl Iterator<Item = &Cursor> {
        self.steps.iter().filter_map(|s| match s {
            Step::Commit(c) => Some(c),
            Step::Write { .. } => None,
        })
    }

    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }
}

fn push_row(steps: &mut Vec<Step>, row: u32, column: u32, values: Vec<String>) {
    for (offset, value) in values.into_iter().enumerate() {
        steps.push(Step::Write {
            row,
            column: column + offset as u32,
            value,
        });
    }
}

/// Scraped values in the shape the sheet reports them back.
fn comparable(values: &[String]) -> Vec<String> {
    values.iter().map(|v| comparison_form(v)).collect()
}

fn has_dated_row_above(existing: &ExistingState, slot: Slot) -> bool {
    slot.row > 1 && parse_canonical_date(existing.cell(slot.row - 1, slot.column)).is_some()
}

fn is_blank(values: &[String]) -> bool {
    values.iter().all(|v| v.is_empty())
}

/// A blank cursor row may take `date` only if it is a real date that comes
/// after the one in the row above (or there is no dated row above).
fn fills_after(
    date: &str,
    existing: &ExistingState,
    slot: Slot,
    width: usize,
) -> Result<bool, CorruptCell> {
    if parse_canonical_date(date).is_none() {
        return Ok(false);
    }
    if slot.row == 1 {
        return Ok(true);
    }
    let above = existing.row_values(slot.row - 1, slot.column, width)?;
    let above_date = above.first().map(String::as_str).unwrap_or("");
    Ok(match compare_dates(date, above_date) {
        DateOrder::Newer => true,
        DateOrder::Equal | DateOrder::Older => false,
        // Header or blank above the first data row
        DateOrder::Incomparable => parse_canonical_date(above_date).is_none(),
    })
}

/// Builds the plan for one task. `observations` are newest first.
///
/// Fails only when a destination cell it needs to compare is corrupt.
pub fn reconcile(
    task: &SeriesTask,
    observations: &[NormalizedObservation],
    existing: &ExistingState,
) -> Result<Plan, CorruptCell> {
    let layout = task.layout;
    let width = layout.width();
    let mut cursor = task.cursor.clone();
    let mut steps = Vec::new();
    let mut decisions = Vec::new();

    for (index, slot) in task.cursor.slots().iter().copied().enumerate() {
        let filter = task.filter_for(index);
        let mut matching = observations.iter().filter(|o| filter.accepts(o.preliminary));

        let decide = |date: &str, action: Action| Decision {
            slot_index: index,
            slot,
            date: date.to_string(),
            action,
        };

        let Some(current) = matching.next() else {
            decisions.push(decide("", Action::NoObservation));
            continue;
        };
        let retro = matching.next();

        let new_values = current.values(layout);
        let sheet_values = existing.row_values(slot.row, slot.column, width)?;
        let sheet_date = sheet_values.first().cloned().unwrap_or_default();

        let target_row = match compare_dates(&current.date, &sheet_date) {
            DateOrder::Newer => {
                let to = slot.row + 1;
                cursor = cursor.advanced(index);
                steps.push(Step::Commit(cursor.clone()));
                push_row(&mut steps, to, slot.column, new_values);
                decisions.push(decide(&current.date, Action::Advanced { from: slot.row, to }));
                to
            }
            DateOrder::Equal => {
                if comparable(&new_values) != sheet_values {
                    push_row(&mut steps, slot.row, slot.column, new_values);
                    decisions.push(decide(&current.date, Action::UpdatedInPlace { row: slot.row }));
                } else {
                    decisions.push(decide(&current.date, Action::Unchanged { row: slot.row }));
                }
                slot.row
            }
            DateOrder::Older => {
                decisions.push(decide(
                    &current.date,
                    Action::Regressed {
                        row: slot.row,
                        sheet_date,
                    },
                ));
                continue;
            }
            DateOrder::Incomparable
                if is_blank(&sheet_values)
                    && fills_after(&current.date, existing, slot, width)? =>
            {
                push_row(&mut steps, slot.row, slot.column, new_values);
                decisions.push(decide(&current.date, Action::Filled { row: slot.row }));
                // Nothing dated above (a header), so no retro pass either.
                if !has_dated_row_above(existing, slot) {
                    if let Some(previous) = retro {
                        decisions.push(decide(&previous.date, Action::RetroSkipped));
                    }
                    continue;
                }
                slot.row
            }
            DateOrder::Incomparable => {
                decisions.push(decide(
                    &current.date,
                    Action::Incomparable {
                        row: slot.row,
                        sheet_date,
                    },
                ));
                continue;
            }
        };

        let Some(previous) = retro else {
            continue;
        };
        let prev_row = target_row - 1;
        if prev_row == 0 {
            decisions.push(decide(&previous.date, Action::RetroSkipped));
            continue;
        }
        let prev_values = previous.values(layout);
        if comparable(&prev_values) != existing.row_values(prev_row, slot.column, width)? {
            push_row(&mut steps, prev_row, slot.column, prev_values);
            decisions.push(decide(&previous.date, Action::RetroCorrected { row: prev_row }));
        } else {
            decisions.push(decide(&previous.date, Action::RetroUnchanged { row: prev_row }));
        }
    }

    Ok(Plan {
        steps,
        decisions,
        cursor,
    })
}
