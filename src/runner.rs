// File: ./src/runner.rs
//! Drives a run: spreadsheet -> tab -> task, strictly one at a time.
//!
//! Per task: fetch the source table (with bounded retries), check its shape,
//! normalize it, snapshot the tab, reconcile, then apply the plan step by step.
//! Task-level failures are logged and skipped. A [`FatalError`] ends the run.
use crate::config::{Settings, ShapePolicy};
use crate::model::{CorruptCell, NormalizedObservation, RawRow, SeriesKey, SeriesTask, format_row};
use crate::reconcile::{Action, Plan, Step, reconcile};
use crate::sheet::{ExistingState, SheetService};
use crate::source::{ShapeError, TableSource, check_shape};
use crate::store::{CursorStore, TaskDocument};
use anyhow::{Context, Result, anyhow};
use std::fmt;
use std::time::Duration;

/// Conditions that stop the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// A destination cell cannot be normalized, so nothing can be compared safely.
    CorruptCell { key: SeriesKey, cell: CorruptCell },
    /// The source table is unusable and the shape policy is `fail_fast`.
    Shape { key: SeriesKey, error: ShapeError },
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::CorruptCell { key, cell } => write!(f, "{} ({})", cell, key),
            FatalError::Shape { key, error } => write!(f, "{} ({})", error, key),
        }
    }
}

impl std::error::Error for FatalError {}

impl FatalError {
    /// Finds a fatal condition anywhere in an error chain.
    pub fn find(err: &anyhow::Error) -> Option<&FatalError> {
        err.chain().find_map(|cause| cause.downcast_ref::<FatalError>())
    }
}

/// Bounded retries with linear, jittered backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            attempts: settings.fetch_attempts.max(1),
            base: Duration::from_millis(settings.backoff_base_ms),
            jitter: Duration::from_millis(settings.backoff_jitter_ms),
        }
    }

    /// Pause after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            fastrand::u64(0..=jitter_ms)
        };
        self.base * attempt + Duration::from_millis(jitter)
    }

    pub fn run<T, F, S>(&self, what: &str, sleep: &mut S, mut f: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
        S: FnMut(Duration) + ?Sized,
    {
        let mut attempt = 1;
        loop {
            match f(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= self.attempts => {
                    return Err(e.context(format!("{} failed after {} attempt(s)", what, attempt)));
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {:#}. Retrying in {:?}",
                        what,
                        attempt,
                        self.attempts,
                        e,
                        delay
                    );
                    sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tasks: usize,
    pub tasks_skipped: usize,
    pub sheets_skipped: usize,
    pub tabs_skipped: usize,
    pub advances: usize,
    pub in_place_updates: usize,
    pub retro_corrections: usize,
    pub unchanged: usize,
    pub anomalies: usize,
    pub cells_written: usize,
    pub commit_failures: usize,
}

impl RunSummary {
    fn record(&mut self, plan: &Plan) {
        for decision in &plan.decisions {
            match decision.action {
                Action::Advanced { .. } => self.advances += 1,
                Action::UpdatedInPlace { .. } | Action::Filled { .. } => self.in_place_updates += 1,
                Action::RetroCorrected { .. } => self.retro_corrections += 1,
                Action::Regressed { .. } | Action::Incomparable { .. } => self.anomalies += 1,
                Action::Unchanged { .. }
                | Action::RetroUnchanged { .. }
                | Action::NoObservation
                | Action::RetroSkipped => self.unchanged += 1,
            }
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} task(s), {} skipped; {} advance(s), {} in-place update(s), {} retro correction(s), {} no-op(s), {} anomaly(ies); {} cell(s) written",
            self.tasks,
            self.tasks_skipped,
            self.advances,
            self.in_place_updates,
            self.retro_corrections,
            self.unchanged,
            self.anomalies,
            self.cells_written
        )?;
        if self.commit_failures > 0 {
            write!(f, "; {} cursor commit(s) failed", self.commit_failures)?;
        }
        Ok(())
    }
}

pub struct Runner<'a> {
    sheets: &'a mut dyn SheetService,
    source: &'a mut dyn TableSource,
    store: &'a mut dyn CursorStore,
    retry: RetryPolicy,
    shape_policy: ShapePolicy,
    single_rows: usize,
    parallel_rows: usize,
    sleep: Box<dyn FnMut(Duration) + 'a>,
}

impl<'a> Runner<'a> {
    pub fn new(
        sheets: &'a mut dyn SheetService,
        source: &'a mut dyn TableSource,
        store: &'a mut dyn CursorStore,
        settings: &Settings,
    ) -> Self {
        Self {
            sheets,
            source,
            store,
            retry: RetryPolicy::from_settings(settings),
            shape_policy: settings.shape_policy,
            single_rows: settings.rows_for(false),
            parallel_rows: settings.rows_for(true),
            sleep: Box::new(std::thread::sleep),
        }
    }

    /// Replaces the backoff sleep (tests use a recorder).
    pub fn with_sleep(mut self, sleep: impl FnMut(Duration) + 'a) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    /// Processes every task in the document. `Err` means the run was aborted
    /// by a [`FatalError`].
    pub fn run(&mut self, document: &TaskDocument) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        for sheet in &document.spreadsheets {
            if let Err(e) = self.sheets.open(&sheet.url) {
                log::error!("Cannot open spreadsheet {}: {:#}. Skipping", sheet.url, e);
                summary.sheets_skipped += 1;
                continue;
            }
            log::info!("Processing spreadsheet {}", sheet.url);

            for (tab, entries) in &sheet.tabs.0 {
                match self.sheets.has_tab(&sheet.url, tab) {
                    Ok(true) => log::info!("Processing tab '{}'", tab),
                    Ok(false) => {
                        log::error!("Tab '{}' not found in {}. Skipping", tab, sheet.url);
                        summary.tabs_skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        log::error!("Cannot read tab '{}' in {}: {:#}. Skipping", tab, sheet.url, e);
                        summary.tabs_skipped += 1;
                        continue;
                    }
                }

                for entry in entries {
                    summary.tasks += 1;
                    let mut task = match entry.to_task(&sheet.url, tab) {
                        Ok(task) => task,
                        Err(e) => {
                            log::error!("Invalid task in '{}': {:#}. Skipping", tab, e);
                            summary.tasks_skipped += 1;
                            continue;
                        }
                    };
                    if let Some(cursor) = self.store.get(&task.key) {
                        task.cursor = cursor;
                    }

                    match self.run_task(&task, &mut summary) {
                        Ok(()) => {}
                        Err(e) => {
                            if let Some(fatal) = FatalError::find(&e) {
                                log::error!("Fatal: {}. Terminating run", fatal);
                                return Err(e);
                            }
                            log::error!("Task {} failed: {:#}. Skipping", task.key, e);
                            summary.tasks_skipped += 1;
                        }
                    }
                }
            }
            log::info!("Done with spreadsheet {}", sheet.url);
        }

        log::info!("Run complete: {}", summary);
        Ok(summary)
    }

    /// Scrapes and applies a single task.
    pub fn run_task(&mut self, task: &SeriesTask, summary: &mut RunSummary) -> Result<()> {
        let key = &task.key;
        let max_rows = if task.cursor.is_parallel() {
            self.parallel_rows
        } else {
            self.single_rows
        };
        log::info!("Scraping {} (cursor {})", key.source, task.cursor);

        let rows = self.fetch_rows(&key.source, max_rows)?;
        if let Err(error) = check_shape(&rows) {
            return match self.shape_policy {
                ShapePolicy::FailFast => Err(FatalError::Shape {
                    key: key.clone(),
                    error,
                }
                .into()),
                ShapePolicy::Skip => Err(anyhow!(error)),
            };
        }

        let observations: Vec<NormalizedObservation> = rows.iter().map(format_row).collect();
        let existing = ExistingState::fetch(&mut *self.sheets, &key.sheet, &key.tab)
            .with_context(|| format!("Failed to read tab '{}'", key.tab))?;

        let plan = reconcile(task, &observations, &existing).map_err(|cell| FatalError::CorruptCell {
            key: key.clone(),
            cell,
        })?;

        for decision in &plan.decisions {
            if decision.is_anomaly() {
                log::warn!("{}: {}", key, decision);
            } else {
                log::info!("{}: {}", key, decision);
            }
        }
        summary.record(&plan);

        self.apply(key, &plan, summary)
    }

    fn fetch_rows(&mut self, url: &str, max_rows: usize) -> Result<Vec<RawRow>> {
        let source = &mut *self.source;
        let sleep = &mut self.sleep;
        self.retry.run(&format!("Fetching {}", url), sleep, |_| {
            // One session per attempt; dropped (and released) on every path.
            let mut session = source.open_session()?;
            session.extract_rows(url, max_rows)
        })
    }

    /// Applies steps in order. A failed commit is logged and the writes go ahead;
    /// a failed write abandons the rest of the plan.
    fn apply(&mut self, key: &SeriesKey, plan: &Plan, summary: &mut RunSummary) -> Result<()> {
        for step in &plan.steps {
            match step {
                Step::Commit(cursor) => {
                    if let Err(e) = self.store.commit(key, cursor) {
                        log::error!(
                            "Could not persist cursor {} for {}: {:#}. Continuing; the next run recomputes it",
                            cursor,
                            key,
                            e
                        );
                        summary.commit_failures += 1;
                    }
                }
                Step::Write { row, column, value } => {
                    self.sheets
                        .update_cell(&key.sheet, &key.tab, *row, *column, value)
                        .with_context(|| {
                            format!("Write to R{}C{} failed, plan partially applied", row, column)
                        })?;
                    log::debug!("{}: R{}C{} <- '{}'", key, row, column, value);
                    summary.cells_written += 1;
                }
            }
        }
        Ok(())
    }
}
