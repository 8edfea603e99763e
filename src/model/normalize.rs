// File: ./src/model/normalize.rs
//! Canonical forms for scraped text and for values read back from the sheet.
//!
//! Scraped values go through [`normalize_date`] and [`convert_magnitude`];
//! sheet values go through [`normalize_sheet_value`]. Both sides then compare
//! as plain strings.
use chrono::{Datelike, NaiveDate};
use std::cmp::Ordering;
use std::fmt;

pub const CANONICAL_DATE_FORMAT: &str = "%d/%m/%Y";

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// A destination cell that cannot be turned into a comparison value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptCell {
    pub value: String,
}

impl fmt::Display for CorruptCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cannot normalize sheet value '{}'", self.value)
    }
}

impl std::error::Error for CorruptCell {}

/// Ordering of a scraped date relative to the sheet's date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOrder {
    Newer,
    Equal,
    Older,
    /// One side is not a `DD/MM/YYYY` date.
    Incomparable,
}

/// Normalizes a scraped date to `DD/MM/YYYY`, preferring day-first readings.
/// Returns `raw` unchanged when no date can be recognised.
pub fn normalize_date(raw: &str) -> String {
    let cleaned = strip_parentheticals(raw);
    let cleaned: String = cleaned
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '.' | '/' | '-' | ' '))
        .collect();
    let cleaned = cleaned.trim();

    match parse_dayfirst(cleaned) {
        Some(date) => date.format(CANONICAL_DATE_FORMAT).to_string(),
        None => {
            log::warn!("Date parsing failed for '{}', keeping raw text", raw);
            raw.to_string()
        }
    }
}

/// `"143K"` -> `"143000"`, `"2.5"` -> `"2,5"`. Anything else passes through.
pub fn convert_magnitude(raw: &str) -> String {
    let mut value = raw.to_string();
    if value.contains('K') {
        value = value.replace('K', "000");
    }
    if value.contains('.') {
        value = value.replace('.', ",");
    }
    value
}

/// Canonical comparison form of a cell read from the sheet.
///
/// - `"2,50%"` -> `"2,5%"` (float round-trip, comma decimal)
/// - `"133.000"` -> `"133000"` (grouping dots removed)
///
/// A percentage that does not parse is a [`CorruptCell`].
pub fn normalize_sheet_value(raw: &str) -> Result<String, CorruptCell> {
    let value = raw.trim();

    if let Some(number_part) = value.strip_suffix('%') {
        let parsed: f64 = number_part
            .trim()
            .replace(',', ".")
            .parse()
            .map_err(|_| CorruptCell {
                value: raw.to_string(),
            })?;
        let rendered = render_float(parsed).replace('.', ",");
        return Ok(format!("{}%", rendered.trim_end_matches(',')));
    }

    if value.contains('.') {
        return Ok(value.replace('.', ""));
    }

    Ok(value.to_string())
}

/// The form a scraped value will take once it sits in the sheet, so both
/// sides of a comparison agree (`"4,50%"` -> `"4,5%"`, `"3%"` -> `"3,0%"`).
/// Values the sheet side would reject are compared as trimmed text.
pub fn comparison_form(value: &str) -> String {
    normalize_sheet_value(value).unwrap_or_else(|_| value.trim().to_string())
}

pub fn parse_canonical_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), CANONICAL_DATE_FORMAT).ok()
}

/// Compares a scraped date with the date stored in the sheet.
pub fn compare_dates(new_date: &str, sheet_date: &str) -> DateOrder {
    match (parse_canonical_date(new_date), parse_canonical_date(sheet_date)) {
        (Some(new), Some(existing)) => match new.cmp(&existing) {
            Ordering::Greater => DateOrder::Newer,
            Ordering::Equal => DateOrder::Equal,
            Ordering::Less => DateOrder::Older,
        },
        _ => DateOrder::Incomparable,
    }
}

/// Shortest round-trip rendering, always with a fractional part (`3` -> `3.0`).
fn render_float(value: f64) -> String {
    let s = format!("{}", value);
    if value.is_finite() && !s.contains('.') {
        format!("{}.0", s)
    } else {
        s
    }
}

/// Removes every `( ... )` group. An unmatched `(` is left alone.
fn strip_parentheticals(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find('(') {
        match rest[open..].find(')') {
            Some(close) => {
                out.push_str(&rest[..open]);
                rest = &rest[open + close + 1..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

fn parse_dayfirst(cleaned: &str) -> Option<NaiveDate> {
    if cleaned.is_empty() {
        return None;
    }
    let first = cleaned.split_whitespace().next()?;
    if first.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '/' | '-'))
        && let Some(date) = parse_numeric(first)
    {
        return Some(date);
    }
    parse_textual(cleaned)
}

/// `DD.MM.YYYY`, `DD/MM/YY`, `YYYY-MM-DD`, ...
fn parse_numeric(token: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = token
        .split(['.', '/', '-'])
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 3 {
        return None;
    }
    let nums: Vec<u32> = parts
        .iter()
        .map(|p| p.parse().ok())
        .collect::<Option<_>>()?;

    if parts[0].len() == 4 {
        return NaiveDate::from_ymd_opt(nums[0] as i32, nums[1], nums[2]);
    }

    let year = expand_year(nums[2], parts[2].len())?;
    // Day first; fall back to month first when the day-first reading is impossible.
    NaiveDate::from_ymd_opt(year, nums[1], nums[0])
        .or_else(|| NaiveDate::from_ymd_opt(year, nums[0], nums[1]))
}

/// `Feb 7, 2025`, `7 February 2025`, `February 07 25`, ...
fn parse_textual(cleaned: &str) -> Option<NaiveDate> {
    let tokens: Vec<&str> = cleaned
        .split([' ', '.', '/', '-'])
        .filter(|t| !t.is_empty())
        .collect();

    let mut month = None;
    let mut numbers: Vec<&str> = Vec::new();
    for token in tokens {
        if token.chars().all(|c| c.is_ascii_digit()) {
            numbers.push(token);
        } else if month.is_none() {
            month = month_from_name(token);
        }
    }
    let month = month?;

    let (day_token, year_token) = match numbers.as_slice() {
        [a, b, ..] if a.len() == 4 => (*b, Some(*a)),
        [a, b, ..] => (*a, Some(*b)),
        [a] => (*a, None),
        [] => return None,
    };
    let day: u32 = day_token.parse().ok()?;
    let year = match year_token {
        Some(y) => expand_year(y.parse().ok()?, y.len())?,
        None => chrono::Local::now().year(),
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn month_from_name(token: &str) -> Option<u32> {
    let lower = token.to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.starts_with(&lower))
        .map(|i| i as u32 + 1)
}

fn expand_year(value: u32, digits: usize) -> Option<i32> {
    match digits {
        4 => Some(value as i32),
        1 | 2 => {
            let century = if value <= 68 { 2000 } else { 1900 };
            Some((century + value) as i32)
        }
        _ => None,
    }
}
