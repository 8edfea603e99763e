// File: src/store.rs
//! The task document and the cursor store built on top of it.
//!
//! The task document lists spreadsheets, their tabs, and per tab an ordered
//! list of series tasks. Each task's `row` is its cursor; it is the only part
//! of the document seriesync ever rewrites, and only through [`CursorStore`].
use crate::model::{Cursor, FieldLayout, SeriesKey, SeriesTask, Slot, SlotFilter};
use crate::storage::LocalStorage;
use anyhow::{Context, Result, anyhow};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// `row` / `column` in the document: a scalar for single tasks, a list for parallel ones.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Position {
    One(u32),
    Many(Vec<u32>),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskEntry {
    pub url: String,
    pub row: Position,
    pub column: Position,
    #[serde(default)]
    pub fields: FieldLayout,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<Vec<SlotFilter>>,
    /// Keys seriesync does not know about survive a save untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskEntry {
    pub fn new(url: &str, row: Position, column: Position, fields: FieldLayout) -> Self {
        Self {
            url: url.to_string(),
            row,
            column,
            fields,
            slots: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Validates the entry and builds the task it describes.
    pub fn to_task(&self, sheet: &str, tab: &str) -> Result<SeriesTask> {
        let key = SeriesKey::new(sheet, tab, &self.url);
        let task = match (&self.row, &self.column) {
            (Position::One(row), Position::One(column)) => {
                SeriesTask::single(key, checked_slot(*row, *column)?, self.fields)
            }
            (Position::Many(rows), Position::Many(columns)) => {
                if rows.is_empty() || rows.len() != columns.len() {
                    return Err(anyhow!(
                        "Task '{}' has {} rows but {} columns",
                        self.url,
                        rows.len(),
                        columns.len()
                    ));
                }
                let slots = rows
                    .iter()
                    .zip(columns)
                    .map(|(r, c)| checked_slot(*r, *c))
                    .collect::<Result<Vec<_>>>()?;
                let task = SeriesTask::parallel(key, slots, self.fields);
                match &self.slots {
                    Some(filters) if filters.len() != rows.len() => {
                        return Err(anyhow!(
                            "Task '{}' lists {} slot filters for {} slots",
                            self.url,
                            filters.len(),
                            rows.len()
                        ));
                    }
                    Some(filters) => task.with_filters(filters.clone()),
                    None => task,
                }
            }
            _ => {
                return Err(anyhow!(
                    "Task '{}' mixes scalar and list positions",
                    self.url
                ));
            }
        };
        Ok(task)
    }

    /// Rewrites `row` from `cursor`. Columns are never changed.
    fn set_cursor(&mut self, cursor: &Cursor) -> Result<()> {
        if cursor.columns() != self.cursor_columns() {
            return Err(anyhow!(
                "Cursor {} does not match the columns of task '{}'",
                cursor,
                self.url
            ));
        }
        self.row = match cursor {
            Cursor::Single(slot) => Position::One(slot.row),
            Cursor::Parallel(_) => Position::Many(cursor.rows()),
        };
        Ok(())
    }

    fn cursor_columns(&self) -> Vec<u32> {
        match &self.column {
            Position::One(c) => vec![*c],
            Position::Many(cs) => cs.clone(),
        }
    }
}

fn checked_slot(row: u32, column: u32) -> Result<Slot> {
    if row == 0 || column == 0 {
        return Err(anyhow!("Rows and columns are 1-based (got row {}, column {})", row, column));
    }
    Ok(Slot::new(row, column))
}

/// Tab name -> tasks, kept in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tabs(pub Vec<(String, Vec<TaskEntry>)>);

impl Serialize for Tabs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, tasks) in &self.0 {
            map.serialize_entry(name, tasks)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Tabs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TabsVisitor;

        impl<'de> Visitor<'de> for TabsVisitor {
            type Value = Tabs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of tab names to task lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Tabs, A::Error> {
                let mut tabs = Vec::new();
                while let Some((name, tasks)) = access.next_entry::<String, Vec<TaskEntry>>()? {
                    tabs.push((name, tasks));
                }
                Ok(Tabs(tabs))
            }
        }

        deserializer.deserialize_map(TabsVisitor)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpreadsheetEntry {
    pub url: String,
    #[serde(default)]
    pub tabs: Tabs,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TaskDocument {
    #[serde(default)]
    pub spreadsheets: Vec<SpreadsheetEntry>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskDocument {
    /// Loads the document; a missing file is an error since there is nothing to run.
    pub fn load(path: &Path) -> Result<Self> {
        LocalStorage::load_json(path)?
            .ok_or_else(|| anyhow!("Task file not found: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        LocalStorage::save_json(path, self)
    }

    fn entry_mut(&mut self, key: &SeriesKey) -> Option<&mut TaskEntry> {
        self.spreadsheets
            .iter_mut()
            .filter(|s| s.url == key.sheet)
            .flat_map(|s| s.tabs.0.iter_mut())
            .filter(|(name, _)| *name == key.tab)
            .flat_map(|(_, tasks)| tasks.iter_mut())
            .find(|t| t.url == key.source)
    }

    pub fn entry(&self, key: &SeriesKey) -> Option<&TaskEntry> {
        self.spreadsheets
            .iter()
            .filter(|s| s.url == key.sheet)
            .flat_map(|s| s.tabs.0.iter())
            .filter(|(name, _)| *name == key.tab)
            .flat_map(|(_, tasks)| tasks.iter())
            .find(|t| t.url == key.source)
    }

    pub fn set_cursor(&mut self, key: &SeriesKey, cursor: &Cursor) -> Result<()> {
        self.entry_mut(key)
            .ok_or_else(|| anyhow!("No task for {}", key))?
            .set_cursor(cursor)
    }

    /// Every task in document order; invalid entries come back as errors.
    pub fn tasks(&self) -> Vec<(SeriesKey, Result<SeriesTask>)> {
        let mut out = Vec::new();
        for sheet in &self.spreadsheets {
            for (tab, entries) in &sheet.tabs.0 {
                for entry in entries {
                    let key = SeriesKey::new(&sheet.url, tab, &entry.url);
                    out.push((key, entry.to_task(&sheet.url, tab)));
                }
            }
        }
        out
    }
}

/// The only way cursors change.
pub trait CursorStore {
    fn get(&self, key: &SeriesKey) -> Option<Cursor>;

    /// Records `cursor` for `key` and makes it durable before returning.
    fn commit(&mut self, key: &SeriesKey, cursor: &Cursor) -> Result<()>;
}

/// Cursor store backed by the task document on disk.
#[derive(Debug)]
pub struct JsonCursorStore {
    path: PathBuf,
    document: TaskDocument,
}

impl JsonCursorStore {
    pub fn open(path: &Path) -> Result<Self> {
        let document = TaskDocument::load(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    pub fn document(&self) -> &TaskDocument {
        &self.document
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CursorStore for JsonCursorStore {
    fn get(&self, key: &SeriesKey) -> Option<Cursor> {
        let entry = self.document.entry(key)?;
        entry.to_task(&key.sheet, &key.tab).ok().map(|t| t.cursor)
    }

    fn commit(&mut self, key: &SeriesKey, cursor: &Cursor) -> Result<()> {
        self.document.set_cursor(key, cursor)?;

        // Read-modify-write against the file itself so entries edited on disk
        // since this run started are not clobbered.
        let path = &self.path;
        let fallback = &self.document;
        LocalStorage::with_lock(path, || {
            let mut on_disk = match fs::read_to_string(path) {
                Ok(json) => serde_json::from_str::<TaskDocument>(&json)
                    .with_context(|| format!("Failed to parse '{}'", path.display()))?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => fallback.clone(),
                Err(e) => return Err(e.into()),
            };
            on_disk.set_cursor(key, cursor)?;
            let json = serde_json::to_string_pretty(&on_disk)?;
            LocalStorage::atomic_write(path, json)?;
            Ok(())
        })
        .with_context(|| format!("Failed to persist cursor for {}", key))?;

        log::info!("Cursor for {} committed: {}", key, cursor);
        Ok(())
    }
}

/// In-memory cursor store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    pub cursors: HashMap<SeriesKey, Cursor>,
    /// Every successful commit, in order.
    pub history: Vec<(SeriesKey, Cursor)>,
    /// When set, commits fail without recording anything.
    pub fail_commits: bool,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: &SeriesTask) -> Self {
        self.cursors.insert(task.key.clone(), task.cursor.clone());
        self
    }
}

impl CursorStore for MemoryCursorStore {
    fn get(&self, key: &SeriesKey) -> Option<Cursor> {
        self.cursors.get(key).cloned()
    }

    fn commit(&mut self, key: &SeriesKey, cursor: &Cursor) -> Result<()> {
        if self.fail_commits {
            return Err(anyhow!("Cursor store is read-only"));
        }
        self.cursors.insert(key.clone(), cursor.clone());
        self.history.push((key.clone(), cursor.clone()));
        Ok(())
    }
}
