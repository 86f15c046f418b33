//! Sparse result grid
//!
//! Rows are keyed by device/port label, columns by test name. Every row owns
//! exactly one cell per column, so adding a column widens every row and adding
//! a row fills in every known column. Columns are append-only.
//!
//! Writes are last-writer-wins by run id (not by arrival time), which makes
//! every operation idempotent and independent of the order in which
//! subscription branches deliver their events.

pub mod recency;

pub use recency::{classify, Recency, RunWindow, Transition};

use crate::run_id::RunId;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    /// Row (and column, when given) is not part of the grid
    NotFound { row: String, column: Option<String> },
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::NotFound { row, column: Some(column) } => {
                write!(f, "Cell not found: row={} column={}", row, column)
            }
            GridError::NotFound { row, column: None } => write!(f, "Row not found: {}", row),
        }
    }
}

impl std::error::Error for GridError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub label: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    run_id: Option<RunId>,
    /// Display entries; more than one only for appended cells
    entries: Vec<String>,
}

impl Cell {
    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    pub fn value(&self) -> Option<String> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.join(" "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    pub label: String,
    pub content: String,
    window: RunWindow,
    /// Unix seconds of the last observed update
    updated: Option<i64>,
    /// Newest run that reported `terminate`
    terminated_run: Option<RunId>,
    timed_out: bool,
    cells: Vec<Cell>,
}

impl Row {
    fn new(label: &str, content: &str, width: usize) -> Self {
        Self {
            label: label.to_string(),
            content: content.to_string(),
            window: RunWindow::default(),
            updated: None,
            terminated_run: None,
            timed_out: false,
            cells: vec![Cell::default(); width],
        }
    }

    pub fn window(&self) -> &RunWindow {
        &self.window
    }

    pub fn updated(&self) -> Option<i64> {
        self.updated
    }

    /// Terminated only while the terminating run is the current one
    pub fn is_terminated(&self) -> bool {
        self.terminated_run.is_some() && self.terminated_run.as_ref() == self.window.current()
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    pub(crate) fn set_timed_out(&mut self, timed_out: bool) {
        self.timed_out = timed_out;
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Recency of the cell at `index`, always derived from the current window
    pub fn recency(&self, index: usize) -> Recency {
        classify(self.cells.get(index).and_then(Cell::run_id), &self.window)
    }

    fn cell_state(&self, index: usize, column: &Column, written: bool) -> CellState {
        let cell = &self.cells[index];
        CellState {
            row: self.label.clone(),
            column: column.label.clone(),
            run_id: cell.run_id.clone(),
            value: cell.value(),
            recency: self.recency(index),
            written,
        }
    }
}

/// Snapshot of one cell, as projected to the rendering sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellState {
    pub row: String,
    pub column: String,
    pub run_id: Option<RunId>,
    pub value: Option<String>,
    pub recency: Recency,
    /// Whether the write that produced this snapshot was applied
    pub written: bool,
}

/// In-memory grid index; the single source of truth for the dashboard
#[derive(Debug, Default)]
pub struct GridModel {
    columns: Vec<Column>,
    column_index: HashMap<String, usize>,
    rows: Vec<Row>,
    row_index: HashMap<String, usize>,
}

impl GridModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column if unseen (widening every row); always rewrite its header.
    ///
    /// Returns whether the column was created.
    pub fn ensure_column(&mut self, label: &str, content: Option<&str>) -> bool {
        let content = content.unwrap_or(label).to_string();
        if let Some(&index) = self.column_index.get(label) {
            self.columns[index].content = content;
            return false;
        }

        self.column_index.insert(label.to_string(), self.columns.len());
        self.columns.push(Column {
            label: label.to_string(),
            content,
        });
        for row in &mut self.rows {
            row.cells.push(Cell::default());
        }
        true
    }

    /// Add a row if unseen (one cell per column); always rewrite its content.
    ///
    /// Returns whether the row was created.
    pub fn ensure_row(&mut self, label: &str, content: Option<&str>) -> bool {
        let content = content.unwrap_or(label);
        if let Some(&index) = self.row_index.get(label) {
            self.rows[index].content = content.to_string();
            return false;
        }

        self.row_index.insert(label.to_string(), self.rows.len());
        self.rows.push(Row::new(label, content, self.columns.len()));
        true
    }

    /// Write a cell unless the incoming run is older than the stored one.
    ///
    /// With `append`, a value for the stored run is added as an extra entry
    /// (duplicates skipped); a newer run replaces the entries.
    pub fn set_cell(
        &mut self,
        row: &str,
        column: &str,
        run_id: Option<RunId>,
        value: Option<&str>,
        append: bool,
    ) -> Result<CellState, GridError> {
        let (r, c) = self.locate(row, column)?;
        let cell = &mut self.rows[r].cells[c];

        let written = match (&run_id, &cell.run_id) {
            (Some(incoming), Some(stored)) => incoming >= stored,
            _ => true,
        };

        if written {
            if let Some(value) = value {
                let same_run = run_id.is_none() || run_id == cell.run_id;
                if append && same_run {
                    if !cell.entries.iter().any(|entry| entry == value) {
                        cell.entries.push(value.to_string());
                    }
                } else {
                    cell.entries = vec![value.to_string()];
                }
            }
            if run_id.is_some() {
                cell.run_id = run_id;
            }
        }

        Ok(self.rows[r].cell_state(c, &self.columns[c], written))
    }

    /// Feed a run id into the row's window.
    ///
    /// An accepted transition changes the recency of cells in the row; callers
    /// re-project the row via [`GridModel::row_cells`].
    pub fn set_row_state(&mut self, row: &str, run_id: RunId) -> Result<Transition, GridError> {
        let index = self.row_position(row)?;
        let row = &mut self.rows[index];
        Ok(row.window.observe(run_id))
    }

    /// Record an update time; the row keeps the latest timestamp seen
    pub fn touch_row(&mut self, row: &str, timestamp: i64) -> Result<(), GridError> {
        let index = self.row_position(row)?;
        let row = &mut self.rows[index];
        row.updated = Some(row.updated.map_or(timestamp, |t| t.max(timestamp)));
        Ok(())
    }

    /// Record that `run_id` finished; only the current run ends the row
    pub fn terminate_row(&mut self, row: &str, run_id: RunId) -> Result<(), GridError> {
        let index = self.row_position(row)?;
        let row = &mut self.rows[index];
        if row.terminated_run.as_ref().map_or(true, |stored| run_id > *stored) {
            row.terminated_run = Some(run_id);
        }
        Ok(())
    }

    pub fn cell(&self, row: &str, column: &str) -> Result<CellState, GridError> {
        let (r, c) = self.locate(row, column)?;
        Ok(self.rows[r].cell_state(c, &self.columns[c], false))
    }

    pub fn recency(&self, row: &str, column: &str) -> Result<Recency, GridError> {
        let (r, c) = self.locate(row, column)?;
        Ok(self.rows[r].recency(c))
    }

    /// Every cell of a row with freshly derived recency
    pub fn row_cells(&self, row: &str) -> Result<Vec<CellState>, GridError> {
        let index = self.row_position(row)?;
        let row = &self.rows[index];
        Ok(self
            .columns
            .iter()
            .enumerate()
            .map(|(c, column)| row.cell_state(c, column, false))
            .collect())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> impl Iterator<Item = &mut Row> {
        self.rows.iter_mut()
    }

    pub fn row(&self, label: &str) -> Option<&Row> {
        self.row_index.get(label).map(|&index| &self.rows[index])
    }

    /// Most recent update across all rows
    pub fn last_update(&self) -> Option<i64> {
        self.rows.iter().filter_map(Row::updated).max()
    }

    fn row_position(&self, row: &str) -> Result<usize, GridError> {
        self.row_index
            .get(row)
            .copied()
            .ok_or_else(|| GridError::NotFound {
                row: row.to_string(),
                column: None,
            })
    }

    fn locate(&self, row: &str, column: &str) -> Result<(usize, usize), GridError> {
        let not_found = || GridError::NotFound {
            row: row.to_string(),
            column: Some(column.to_string()),
        };
        let r = self.row_index.get(row).copied().ok_or_else(not_found)?;
        let c = self.column_index.get(column).copied().ok_or_else(not_found)?;
        Ok((r, c))
    }
}
