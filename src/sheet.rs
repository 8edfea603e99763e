// File: ./src/sheet.rs
// Destination spreadsheets: the service seam, the existing-state reader,
// and the local workbook / dry-run implementations.
use crate::model::{CorruptCell, normalize_sheet_value};
use crate::storage::LocalStorage;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Cell text of a tab, row-major. Rows may be ragged.
pub type Grid = Vec<Vec<String>>;

/// A destination spreadsheet service. Rows and columns are 1-based.
pub trait SheetService {
    /// Fails when the spreadsheet cannot be reached.
    fn open(&mut self, sheet: &str) -> Result<()>;

    fn has_tab(&mut self, sheet: &str, tab: &str) -> Result<bool>;

    fn get_all_values(&mut self, sheet: &str, tab: &str) -> Result<Grid>;

    fn update_cell(
        &mut self,
        sheet: &str,
        tab: &str,
        row: u32,
        column: u32,
        value: &str,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub sheet: String,
    pub tab: String,
    pub row: u32,
    pub column: u32,
    pub value: String,
}

/// Snapshot of a tab taken before reconciling one task.
#[derive(Debug, Clone, Default)]
pub struct ExistingState {
    grid: Grid,
}

impl ExistingState {
    pub fn new(grid: Grid) -> Self {
        Self { grid }
    }

    pub fn fetch(service: &mut dyn SheetService, sheet: &str, tab: &str) -> Result<Self> {
        Ok(Self::new(service.get_all_values(sheet, tab)?))
    }

    /// Raw text at (row, column); empty outside the grid.
    pub fn cell(&self, row: u32, column: u32) -> &str {
        if row == 0 || column == 0 {
            return "";
        }
        self.grid
            .get(row as usize - 1)
            .and_then(|r| r.get(column as usize - 1))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// `width` normalized cells starting at (row, column).
    pub fn row_values(&self, row: u32, column: u32, width: usize) -> Result<Vec<String>, CorruptCell> {
        (0..width as u32)
            .map(|offset| normalize_sheet_value(self.cell(row, column + offset)))
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.grid.len()
    }
}

/// Sets a cell in a grid, growing it as needed.
fn set_grid_cell(grid: &mut Grid, row: u32, column: u32, value: &str) -> Result<()> {
    if row == 0 || column == 0 {
        return Err(anyhow!("Cell R{}C{} is outside the sheet", row, column));
    }
    let (r, c) = (row as usize - 1, column as usize - 1);
    if grid.len() <= r {
        grid.resize_with(r + 1, Vec::new);
    }
    let cells = &mut grid[r];
    if cells.len() <= c {
        cells.resize(c + 1, String::new());
    }
    cells[c] = value.to_string();
    Ok(())
}

// --- In-memory service ---

/// Spreadsheets held in memory. Records every write it applies.
#[derive(Debug, Default, Clone)]
pub struct MemorySheets {
    pub sheets: HashMap<String, BTreeMap<String, Grid>>,
    pub writes: Vec<CellWrite>,
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tab(mut self, sheet: &str, tab: &str, grid: Grid) -> Self {
        self.sheets
            .entry(sheet.to_string())
            .or_default()
            .insert(tab.to_string(), grid);
        self
    }

    pub fn grid(&self, sheet: &str, tab: &str) -> Option<&Grid> {
        self.sheets.get(sheet).and_then(|tabs| tabs.get(tab))
    }
}

impl SheetService for MemorySheets {
    fn open(&mut self, sheet: &str) -> Result<()> {
        if self.sheets.contains_key(sheet) {
            Ok(())
        } else {
            Err(anyhow!("Spreadsheet '{}' not found", sheet))
        }
    }

    fn has_tab(&mut self, sheet: &str, tab: &str) -> Result<bool> {
        Ok(self.grid(sheet, tab).is_some())
    }

    fn get_all_values(&mut self, sheet: &str, tab: &str) -> Result<Grid> {
        self.grid(sheet, tab)
            .cloned()
            .ok_or_else(|| anyhow!("Tab '{}' not found in '{}'", tab, sheet))
    }

    fn update_cell(
        &mut self,
        sheet: &str,
        tab: &str,
        row: u32,
        column: u32,
        value: &str,
    ) -> Result<()> {
        let grid = self
            .sheets
            .get_mut(sheet)
            .and_then(|tabs| tabs.get_mut(tab))
            .ok_or_else(|| anyhow!("Tab '{}' not found in '{}'", tab, sheet))?;
        set_grid_cell(grid, row, column, value)?;
        self.writes.push(CellWrite {
            sheet: sheet.to_string(),
            tab: tab.to_string(),
            row,
            column,
            value: value.to_string(),
        });
        Ok(())
    }
}

// --- Local workbook files ---

#[derive(Serialize, Deserialize, Debug, Default)]
struct Workbook {
    url: String,
    #[serde(default)]
    tabs: BTreeMap<String, Grid>,
}

/// One JSON workbook per spreadsheet under a directory.
///
/// Files are named after a hash of the spreadsheet URL. A spreadsheet without
/// a file is unreachable; `create` makes an empty one.
#[derive(Debug, Clone)]
pub struct LocalWorkbooks {
    dir: PathBuf,
}

impl LocalWorkbooks {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, sheet: &str) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        sheet.hash(&mut hasher);
        self.dir.join(format!("workbook_{:x}.json", hasher.finish()))
    }

    pub fn create(&self, sheet: &str, tabs: &[&str]) -> Result<()> {
        let workbook = Workbook {
            url: sheet.to_string(),
            tabs: tabs.iter().map(|t| (t.to_string(), Grid::new())).collect(),
        };
        LocalStorage::save_json(&self.path_for(sheet), &workbook)
    }

    fn load(&self, sheet: &str) -> Result<Workbook> {
        let path = self.path_for(sheet);
        LocalStorage::load_json(&path)?
            .ok_or_else(|| anyhow!("Spreadsheet '{}' has no workbook at {}", sheet, path.display()))
    }
}

impl SheetService for LocalWorkbooks {
    fn open(&mut self, sheet: &str) -> Result<()> {
        self.load(sheet).map(|_| ())
    }

    fn has_tab(&mut self, sheet: &str, tab: &str) -> Result<bool> {
        Ok(self.load(sheet)?.tabs.contains_key(tab))
    }

    fn get_all_values(&mut self, sheet: &str, tab: &str) -> Result<Grid> {
        self.load(sheet)?
            .tabs
            .remove(tab)
            .ok_or_else(|| anyhow!("Tab '{}' not found in '{}'", tab, sheet))
    }

    fn update_cell(
        &mut self,
        sheet: &str,
        tab: &str,
        row: u32,
        column: u32,
        value: &str,
    ) -> Result<()> {
        let path = self.path_for(sheet);
        LocalStorage::with_lock(&path, || {
            let json = std::fs::read_to_string(&path)?;
            let mut workbook: Workbook = serde_json::from_str(&json)?;
            let grid = workbook
                .tabs
                .get_mut(tab)
                .ok_or_else(|| anyhow!("Tab '{}' not found in '{}'", tab, sheet))?;
            set_grid_cell(grid, row, column, value)?;
            LocalStorage::atomic_write(&path, serde_json::to_string_pretty(&workbook)?)?;
            Ok(())
        })
    }
}

// --- Dry run ---

/// Reads through to `inner`; writes are logged and recorded, never applied.
#[derive(Debug)]
pub struct DryRun<S> {
    inner: S,
    pub skipped: Vec<CellWrite>,
}

impl<S: SheetService> DryRun<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            skipped: Vec::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: SheetService> SheetService for DryRun<S> {
    fn open(&mut self, sheet: &str) -> Result<()> {
        self.inner.open(sheet)
    }

    fn has_tab(&mut self, sheet: &str, tab: &str) -> Result<bool> {
        self.inner.has_tab(sheet, tab)
    }

    fn get_all_values(&mut self, sheet: &str, tab: &str) -> Result<Grid> {
        self.inner.get_all_values(sheet, tab)
    }

    fn update_cell(
        &mut self,
        sheet: &str,
        tab: &str,
        row: u32,
        column: u32,
        value: &str,
    ) -> Result<()> {
        log::info!("[dry-run] {} / {} R{}C{} <- '{}'", sheet, tab, row, column, value);
        self.skipped.push(CellWrite {
            sheet: sheet.to_string(),
            tab: tab.to_string(),
            row,
            column,
            value: value.to_string(),
        });
        Ok(())
    }
}
