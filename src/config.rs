// File: ./src/config.rs
// Handles settings loading, saving, and defaults.
use crate::context::AppContext;
use crate::storage::LocalStorage;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use simplelog::LevelFilter;
use std::fs;
use std::path::PathBuf;
use strum::Display;

fn default_fetch_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    2000
}
fn default_backoff_jitter_ms() -> u64 {
    1000
}

fn default_single_rows() -> usize {
    2
}
fn default_parallel_rows() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

/// What to do when a source table is too short or has an empty row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShapePolicy {
    /// Stop the whole run.
    #[default]
    FailFast,
    /// Log and move on to the next task.
    Skip,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ExtractorConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Settings {
    /// Task document; defaults to `tasks.json` in the config dir.
    #[serde(default)]
    pub tasks_file: Option<PathBuf>,
    /// Local workbooks directory; defaults to `workbooks/` in the data dir.
    #[serde(default)]
    pub workbook_dir: Option<PathBuf>,
    #[serde(default)]
    pub extractor: Option<ExtractorConfig>,

    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,

    #[serde(default = "default_single_rows")]
    pub single_rows: usize,
    #[serde(default = "default_parallel_rows")]
    pub parallel_rows: usize,

    #[serde(default)]
    pub shape_policy: ShapePolicy,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub log_file: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tasks_file: None,
            workbook_dir: None,
            extractor: None,
            fetch_attempts: 3,
            backoff_base_ms: 2000,
            backoff_jitter_ms: 1000,
            single_rows: 2,
            parallel_rows: 4,
            shape_policy: ShapePolicy::FailFast,
            log_level: "info".to_string(),
            log_file: true,
        }
    }
}

impl Settings {
    /// Loads `config.toml`; a missing file yields the defaults.
    pub fn load(ctx: &dyn AppContext) -> Result<Self> {
        let path = ctx.get_settings_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to read settings file '{}': {}", path.display(), e)
        })?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            anyhow::anyhow!("Failed to parse settings file '{}': {}", path.display(), e)
        })?;

        Ok(settings)
    }

    pub fn save(&self, ctx: &dyn AppContext) -> Result<()> {
        let path = ctx.get_settings_path()?;
        LocalStorage::with_lock(&path, || {
            let toml_str = toml::to_string_pretty(self)?;
            LocalStorage::atomic_write(&path, toml_str)?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn tasks_path(&self, ctx: &dyn AppContext) -> Result<PathBuf> {
        match &self.tasks_file {
            Some(p) => Ok(p.clone()),
            None => ctx.get_tasks_path(),
        }
    }

    pub fn workbook_path(&self, ctx: &dyn AppContext) -> Result<PathBuf> {
        match &self.workbook_dir {
            Some(p) => Ok(p.clone()),
            None => ctx.get_workbook_dir(),
        }
    }

    /// Rows to request from the source for a task.
    pub fn rows_for(&self, parallel: bool) -> usize {
        let wanted = if parallel {
            self.parallel_rows
        } else {
            self.single_rows
        };
        wanted.max(crate::source::MIN_ROWS)
    }

    /// Unknown level names fall back to `Info`.
    pub fn level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}
