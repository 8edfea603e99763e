// Scenario tests for the reconciliation engine, driven end to end through the
// runner with in-memory spreadsheets, canned tables and an in-memory cursor store.
use seriesync::config::Settings;
use seriesync::model::{
    Cursor, FieldLayout, NormalizedObservation, RawRow, SeriesKey, SeriesTask, Slot, format_row,
};
use seriesync::reconcile::{Action, Step, reconcile};
use seriesync::runner::{RunSummary, Runner};
use seriesync::sheet::{ExistingState, Grid, MemorySheets};
use seriesync::source::CannedSource;
use seriesync::store::{CursorStore, MemoryCursorStore, TaskDocument};
use serde_json::json;

const SHEET: &str = "https://sheets.example/d/macro";
const TAB: &str = "USA";
const NFP: &str = "https://calendar.example/usa/nfp";

fn grid(rows: &[&[&str]]) -> Grid {
    rows.iter()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect()
}

fn raw(date: &str, actual: &str, forecast: &str, preliminary: bool) -> RawRow {
    RawRow::new([date, "14:30", actual, forecast], preliminary)
}

fn document(task: serde_json::Value) -> TaskDocument {
    serde_json::from_value(json!({
        "spreadsheets": [{"url": SHEET, "tabs": {TAB: [task]}}]
    }))
    .unwrap()
}

fn quiet_settings() -> Settings {
    Settings {
        backoff_base_ms: 0,
        backoff_jitter_ms: 0,
        ..Settings::default()
    }
}

fn run(
    sheets: &mut MemorySheets,
    source: &mut CannedSource,
    store: &mut MemoryCursorStore,
    doc: &TaskDocument,
) -> RunSummary {
    Runner::new(sheets, source, store, &quiet_settings())
        .with_sleep(|_| {})
        .run(doc)
        .unwrap()
}

fn key() -> SeriesKey {
    SeriesKey::new(SHEET, TAB, NFP)
}

fn three_field_sheet() -> MemorySheets {
    MemorySheets::new().with_tab(
        SHEET,
        TAB,
        grid(&[
            &["Date", "Forecast", "Actual"],
            &["10/12/2024", "200000", "227000"],
            &["06/01/2025", "165000", "256000"],
        ]),
    )
}

#[test]
fn test_new_period_advances_and_writes_next_row() {
    let mut sheets = three_field_sheet();
    let mut source = CannedSource::new().with_rows(
        NFP,
        vec![
            raw("07.02.2025 (Gen)", "143K", "169K", false),
            raw("06.01.2025", "256K", "165K", false),
        ],
    );
    let mut store = MemoryCursorStore::new();
    let doc = document(json!({"url": NFP, "row": 3, "column": 1}));

    let summary = run(&mut sheets, &mut source, &mut store, &doc);

    assert_eq!(summary.advances, 1);
    assert_eq!(store.get(&key()), Some(Cursor::Single(Slot::new(4, 1))));
    assert_eq!(store.history.len(), 1);

    let written: Vec<(u32, u32, &str)> = sheets
        .writes
        .iter()
        .map(|w| (w.row, w.column, w.value.as_str()))
        .collect();
    assert_eq!(
        written,
        vec![(4, 1, "07/02/2025"), (4, 2, "169000"), (4, 3, "143000")]
    );
    assert!(sheets.writes.iter().all(|w| w.row != 3));
}

#[test]
fn test_commit_precedes_writes_in_plan() {
    let task = SeriesTask::single(key(), Slot::new(3, 1), FieldLayout::DateForecastActual);
    let existing = ExistingState::new(grid(&[
        &["Date", "Forecast", "Actual"],
        &["10/12/2024", "200000", "227000"],
        &["06/01/2025", "165000", "256000"],
    ]));
    let observations: Vec<NormalizedObservation> = [
        raw("07.02.2025", "143K", "169K", false),
        raw("06.01.2025", "256K", "165K", false),
    ]
    .iter()
    .map(format_row)
    .collect();

    let plan = reconcile(&task, &observations, &existing).unwrap();

    assert_eq!(plan.steps[0], Step::Commit(Cursor::Single(Slot::new(4, 1))));
    assert_eq!(plan.commits().count(), 1);
    assert_eq!(plan.writes().count(), 3);
    assert_eq!(plan.decisions[1].action, Action::RetroUnchanged { row: 3 });
}

#[test]
fn test_revision_overwrites_in_place() {
    let mut sheets = MemorySheets::new().with_tab(
        SHEET,
        TAB,
        grid(&[
            &["Date", "Forecast", "Actual"],
            &["10/12/2024", "200000", "227000"],
            &["06/01/2025", "165000", "169000"],
        ]),
    );
    let mut source = CannedSource::new().with_rows(
        NFP,
        vec![
            raw("06.01.2025", "175K", "165K", false),
            raw("10.12.2024", "227K", "200K", false),
        ],
    );
    let mut store = MemoryCursorStore::new();
    let doc = document(json!({"url": NFP, "row": 3, "column": 1}));

    let summary = run(&mut sheets, &mut source, &mut store, &doc);

    assert_eq!(summary.in_place_updates, 1);
    assert!(store.history.is_empty());
    assert!(!sheets.writes.is_empty());
    assert!(sheets.writes.iter().all(|w| w.row == 3));
    assert_eq!(sheets.grid(SHEET, TAB).unwrap()[2][2], "175000");
}

#[test]
fn test_retroactive_confirmation_rewrites_previous_row() {
    let mut sheets = MemorySheets::new().with_tab(
        SHEET,
        TAB,
        grid(&[
            &["Date", "Forecast", "Actual"],
            &["06/01/2025", "165000", "250000"],
            &["07/02/2025", "169000", "143000"],
        ]),
    );
    let mut source = CannedSource::new().with_rows(
        NFP,
        vec![
            raw("07.02.2025", "143K", "169K", true),
            raw("06.01.2025", "256K", "165K", false),
        ],
    );
    let mut store = MemoryCursorStore::new();
    let doc = document(json!({"url": NFP, "row": 3, "column": 1}));

    let summary = run(&mut sheets, &mut source, &mut store, &doc);

    assert_eq!(summary.retro_corrections, 1);
    assert!(store.history.is_empty());
    assert!(sheets.writes.iter().all(|w| w.row == 2));
    let g = sheets.grid(SHEET, TAB).unwrap();
    assert_eq!(g[1], vec!["06/01/2025", "165000", "256000"]);
    assert_eq!(g[2], vec!["07/02/2025", "169000", "143000"]);
}

#[test]
fn test_parallel_slots_advance_independently() {
    let mut sheets = MemorySheets::new().with_tab(
        SHEET,
        TAB,
        grid(&[
            &["Date", "Actual", "", "Date", "Actual"],
            &["10/12/2024", "227000", "", "10/12/2024", "220000"],
            &["06/01/2025", "256000", "", "06/01/2025", "250000"],
        ]),
    );
    let mut source = CannedSource::new().with_rows(
        NFP,
        vec![
            raw("07.02.2025", "143K", "", false),
            raw("06.01.2025", "250K", "", true),
            raw("06.01.2025", "256K", "", false),
            raw("10.12.2024", "220K", "", true),
        ],
    );
    let mut store = MemoryCursorStore::new();
    let doc = document(json!({
        "url": NFP, "row": [3, 3], "column": [1, 4], "fields": ["Date", "Actual"]
    }));

    let summary = run(&mut sheets, &mut source, &mut store, &doc);

    assert_eq!(summary.advances, 1);
    assert_eq!(
        store.get(&key()),
        Some(Cursor::Parallel(vec![Slot::new(4, 1), Slot::new(3, 4)]))
    );
    assert!(sheets.writes.iter().all(|w| w.row == 4 && w.column <= 2));
    assert_eq!(sheets.grid(SHEET, TAB).unwrap()[3], vec!["07/02/2025", "143000"]);
    // Parallel tasks fetch four rows, so every slot also gets a retro candidate.
    assert_eq!(summary.unchanged, 3);
}

#[test]
fn test_parallel_slots_both_advance_in_one_run() {
    let mut sheets = MemorySheets::new().with_tab(
        SHEET,
        TAB,
        grid(&[
            &["Date", "Actual", "", "Date", "Actual"],
            &["06/01/2025", "256000", "", "06/01/2025", "250000"],
        ]),
    );
    let mut source = CannedSource::new().with_rows(
        NFP,
        vec![
            raw("07.02.2025", "143K", "", false),
            raw("07.02.2025", "140K", "", true),
            raw("06.01.2025", "256K", "", false),
            raw("06.01.2025", "250K", "", true),
        ],
    );
    let mut store = MemoryCursorStore::new();
    let doc = document(json!({
        "url": NFP, "row": [2, 2], "column": [1, 4], "fields": ["Date", "Actual"]
    }));

    let summary = run(&mut sheets, &mut source, &mut store, &doc);

    assert_eq!(summary.advances, 2);
    assert_eq!(
        store.history,
        vec![
            (key(), Cursor::Parallel(vec![Slot::new(3, 1), Slot::new(2, 4)])),
            (key(), Cursor::Parallel(vec![Slot::new(3, 1), Slot::new(3, 4)])),
        ]
    );
    assert!(sheets.writes.iter().all(|w| w.row == 3));
    let g = sheets.grid(SHEET, TAB).unwrap();
    assert_eq!(g[2], vec!["07/02/2025", "143000", "", "07/02/2025", "140000"]);
    assert_eq!(summary.unchanged, 2);
}

#[test]
fn test_parallel_retro_touches_only_its_own_slot() {
    let mut sheets = MemorySheets::new().with_tab(
        SHEET,
        TAB,
        grid(&[
            &["Date", "Actual", "", "Date", "Actual"],
            &["10/12/2024", "227000", "", "10/12/2024", "220000"],
            &["06/01/2025", "256000", "", "06/01/2025", "250000"],
        ]),
    );
    let mut source = CannedSource::new().with_rows(
        NFP,
        vec![
            raw("06.01.2025", "256K", "", false),
            raw("06.01.2025", "250K", "", true),
            raw("10.12.2024", "227K", "", false),
            raw("10.12.2024", "224K", "", true),
        ],
    );
    let mut store = MemoryCursorStore::new();
    let doc = document(json!({
        "url": NFP, "row": [3, 3], "column": [1, 4], "fields": ["Date", "Actual"]
    }));

    let summary = run(&mut sheets, &mut source, &mut store, &doc);

    assert_eq!(summary.retro_corrections, 1);
    assert!(store.history.is_empty());
    assert!(!sheets.writes.is_empty());
    assert!(sheets.writes.iter().all(|w| w.row == 2 && w.column >= 4));
    let g = sheets.grid(SHEET, TAB).unwrap();
    assert_eq!(g[1], vec!["10/12/2024", "227000", "", "10/12/2024", "224000"]);
    assert_eq!(g[2], vec!["06/01/2025", "256000", "", "06/01/2025", "250000"]);
}

#[test]
fn test_percentages_are_not_rewritten_on_rerun() {
    let mut sheets = MemorySheets::new().with_tab(
        SHEET,
        TAB,
        grid(&[
            &["Date", "Forecast", "Actual"],
            &["05/12/2024", "3,1%", "3%"],
        ]),
    );
    let mut source = CannedSource::new().with_rows(
        NFP,
        vec![
            raw("06.01.2025", "4.50%", "4.40%", false),
            raw("05.12.2024", "3%", "3.1%", false),
        ],
    );
    let mut store = MemoryCursorStore::new();
    let doc = document(json!({"url": NFP, "row": 2, "column": 1}));

    let first = run(&mut sheets, &mut source, &mut store, &doc);
    assert_eq!(first.advances, 1);
    assert_eq!(first.cells_written, 3);
    assert_eq!(first.retro_corrections, 0);
    assert_eq!(
        sheets.grid(SHEET, TAB).unwrap()[2],
        vec!["06/01/2025", "4,40%", "4,50%"]
    );

    for _ in 0..2 {
        let summary = run(&mut sheets, &mut source, &mut store, &doc);
        assert_eq!(summary.cells_written, 0);
        assert_eq!(summary.unchanged, 2);
    }
    assert_eq!(sheets.writes.len(), 3);
}

#[test]
fn test_second_run_is_idempotent() {
    let mut sheets = three_field_sheet();
    let mut source = CannedSource::new().with_rows(
        NFP,
        vec![
            raw("07.02.2025", "143K", "169K", false),
            raw("06.01.2025", "256K", "165K", false),
        ],
    );
    let mut store = MemoryCursorStore::new();
    let doc = document(json!({"url": NFP, "row": 3, "column": 1}));

    run(&mut sheets, &mut source, &mut store, &doc);
    let after_first = sheets.writes.len();
    let summary = run(&mut sheets, &mut source, &mut store, &doc);

    assert_eq!(summary.cells_written, 0);
    assert_eq!(sheets.writes.len(), after_first);
    assert_eq!(store.history.len(), 1);
}

#[test]
fn test_cursor_never_moves_backwards() {
    let mut sheets = three_field_sheet();
    let mut source = CannedSource::new()
        .with_rows(
            NFP,
            vec![
                raw("07.02.2025", "143K", "169K", false),
                raw("06.01.2025", "256K", "165K", false),
            ],
        )
        .with_rows(
            NFP,
            vec![
                raw("10.12.2024", "227K", "200K", false),
                raw("08.11.2024", "12K", "100K", false),
            ],
        )
        .with_rows(
            NFP,
            vec![
                raw("07.03.2025", "151K", "160K", false),
                raw("07.02.2025", "125K", "169K", false),
            ],
        );
    let mut store = MemoryCursorStore::new();
    let doc = document(json!({"url": NFP, "row": 3, "column": 1}));

    let mut rows = vec![3];
    for _ in 0..4 {
        run(&mut sheets, &mut source, &mut store, &doc);
        let cursor = store.get(&key()).unwrap_or(Cursor::Single(Slot::new(3, 1)));
        rows.push(cursor.rows()[0]);
    }

    assert!(rows.windows(2).all(|w| w[0] <= w[1]), "{:?}", rows);
    assert_eq!(*rows.last().unwrap(), 5);
    // Revised February figure landed on the row above the new cursor.
    assert_eq!(sheets.grid(SHEET, TAB).unwrap()[3][2], "125000");
}

#[test]
fn test_older_observation_writes_nothing() {
    let mut sheets = MemorySheets::new().with_tab(
        SHEET,
        TAB,
        grid(&[
            &["Date", "Forecast", "Actual"],
            &["06/01/2025", "165000", "256000"],
            &["07/02/2025", "169000", "143000"],
        ]),
    );
    let before = sheets.grid(SHEET, TAB).unwrap().clone();
    let mut source = CannedSource::new().with_rows(
        NFP,
        vec![
            raw("06.01.2025", "999K", "165K", false),
            raw("10.12.2024", "1K", "200K", false),
        ],
    );
    let mut store = MemoryCursorStore::new();
    let doc = document(json!({"url": NFP, "row": 3, "column": 1}));

    let summary = run(&mut sheets, &mut source, &mut store, &doc);

    assert_eq!(summary.anomalies, 1);
    assert!(sheets.writes.is_empty());
    assert_eq!(sheets.grid(SHEET, TAB).unwrap(), &before);
    assert!(store.history.is_empty());
}
