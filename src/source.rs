// File: ./src/source.rs
//! Source tables. Rendering and scraping live outside seriesync: a
//! [`TableSource`] hands out an [`ExtractionSession`] that returns the first
//! rows of the first table on a page as [`RawRow`]s, newest first.
//!
//! A session is a scoped resource. It is released when dropped, which happens
//! on every exit path of a task.
use crate::model::RawRow;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::rc::Rc;

/// Fewest rows a task can be reconciled from.
pub const MIN_ROWS: usize = 2;

pub trait ExtractionSession {
    fn extract_rows(&mut self, url: &str, max_rows: usize) -> Result<Vec<RawRow>>;
}

pub trait TableSource {
    fn open_session(&mut self) -> Result<Box<dyn ExtractionSession + '_>>;
}

/// The extracted table cannot be reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    TooFewRows(usize),
    EmptyRow(usize),
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeError::TooFewRows(n) => {
                write!(f, "Not enough rows in the table ({} of {} needed)", n, MIN_ROWS)
            }
            ShapeError::EmptyRow(i) => write!(f, "Table row {} is empty", i + 1),
        }
    }
}

impl std::error::Error for ShapeError {}

pub fn check_shape(rows: &[RawRow]) -> Result<(), ShapeError> {
    if rows.len() < MIN_ROWS {
        return Err(ShapeError::TooFewRows(rows.len()));
    }
    match rows.iter().position(RawRow::is_empty) {
        Some(i) => Err(ShapeError::EmptyRow(i)),
        None => Ok(()),
    }
}

/// Wire format of one row printed by an extractor program.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExtractedRow {
    pub cells: Vec<String>,
    #[serde(default)]
    pub preliminary: bool,
}

impl From<ExtractedRow> for RawRow {
    fn from(row: ExtractedRow) -> Self {
        RawRow::new(row.cells, row.preliminary)
    }
}

// --- External extractor program ---

/// Runs `program [args..] <url> <max_rows>` and reads a JSON array of
/// [`ExtractedRow`] from its stdout.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
        }
    }
}

impl TableSource for CommandSource {
    fn open_session(&mut self) -> Result<Box<dyn ExtractionSession + '_>> {
        Ok(Box::new(CommandSession {
            source: self,
            child: None,
        }))
    }
}

struct CommandSession<'a> {
    source: &'a CommandSource,
    child: Option<Child>,
}

impl ExtractionSession for CommandSession<'_> {
    fn extract_rows(&mut self, url: &str, max_rows: usize) -> Result<Vec<RawRow>> {
        let child = self.child.insert(
            Command::new(&self.source.program)
                .args(&self.source.args)
                .arg(url)
                .arg(max_rows.to_string())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .spawn()
                .with_context(|| format!("Failed to start extractor '{}'", self.source.program))?,
        );

        let mut output = String::new();
        child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Extractor stdout unavailable"))?
            .read_to_string(&mut output)
            .context("Failed to read extractor output")?;
        let status = child.wait()?;
        self.child = None;

        if !status.success() {
            return Err(anyhow!("Extractor exited with {} for {}", status, url));
        }
        let rows: Vec<ExtractedRow> = serde_json::from_str(&output)
            .with_context(|| format!("Extractor printed malformed rows for {}", url))?;
        Ok(rows.into_iter().take(max_rows).map(RawRow::from).collect())
    }
}

impl Drop for CommandSession<'_> {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            log::debug!("Stopping extractor process {}", child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

// --- Canned tables ---

/// Source serving queued responses per URL; counts opened and released sessions.
#[derive(Debug, Default)]
pub struct CannedSource {
    responses: RefCell<HashMap<String, VecDeque<Result<Vec<RawRow>, String>>>>,
    pub opened: Rc<Cell<usize>>,
    pub released: Rc<Cell<usize>>,
    /// URLs in the order they were requested.
    pub requests: RefCell<Vec<String>>,
}

impl CannedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a table for `url`. The last queued response repeats once the queue drains.
    pub fn with_rows(self, url: &str, rows: Vec<RawRow>) -> Self {
        self.push(url, Ok(rows));
        self
    }

    pub fn with_failure(self, url: &str, message: &str) -> Self {
        self.push(url, Err(message.to_string()));
        self
    }

    fn push(&self, url: &str, response: Result<Vec<RawRow>, String>) {
        self.responses
            .borrow_mut()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }
}

impl TableSource for CannedSource {
    fn open_session(&mut self) -> Result<Box<dyn ExtractionSession + '_>> {
        self.opened.set(self.opened.get() + 1);
        Ok(Box::new(CannedSession { source: self }))
    }
}

struct CannedSession<'a> {
    source: &'a CannedSource,
}

impl ExtractionSession for CannedSession<'_> {
    fn extract_rows(&mut self, url: &str, max_rows: usize) -> Result<Vec<RawRow>> {
        self.source.requests.borrow_mut().push(url.to_string());
        let mut responses = self.source.responses.borrow_mut();
        let queue = responses
            .get_mut(url)
            .ok_or_else(|| anyhow!("No table at {}", url))?;
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match response {
            Some(Ok(rows)) => Ok(rows.into_iter().take(max_rows).collect()),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("No table at {}", url)),
        }
    }
}

impl Drop for CannedSession<'_> {
    fn drop(&mut self) {
        self.source.released.set(self.source.released.get() + 1);
    }
}
