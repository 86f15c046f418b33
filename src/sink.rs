//! Rendering sink
//!
//! The grid model is the only source of state; a sink receives projections of
//! it and is never read back by the engine. [`GridView`] is the projection the
//! terminal UI draws, shared through [`SharedView`].

use crate::grid::{GridError, Recency};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

/// Output surface addressed by row/column label
pub trait GridSink: Send {
    fn ensure_column(&mut self, label: &str, content: &str);

    fn ensure_row(&mut self, label: &str, content: &str);

    /// Unknown cells are reported as `NotFound`, never a panic
    fn set_cell_value(
        &mut self,
        row: &str,
        column: &str,
        value: Option<&str>,
        recency: Recency,
    ) -> Result<(), GridError>;

    /// Row timeout decoration and the row's timer text
    fn set_row_timeout(&mut self, row: &str, timed_out: bool, timer: &str);

    fn set_status(&mut self, status: &str);

    /// Global "last update" indicator
    fn set_last_update(&mut self, text: &str);

    fn set_origins(&mut self, origins: &[String]);

    fn set_heartbeat(&mut self, text: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewCell {
    pub value: Option<String>,
    pub recency: Recency,
}

impl Default for ViewCell {
    fn default() -> Self {
        Self {
            value: None,
            recency: Recency::Gone,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewColumn {
    pub label: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewRow {
    pub label: String,
    pub content: String,
    pub timer: String,
    pub timed_out: bool,
    pub cells: HashMap<String, ViewCell>,
}

/// Render-ready projection of the dashboard
#[derive(Debug, Clone, Default)]
pub struct GridView {
    pub columns: Vec<ViewColumn>,
    pub rows: Vec<ViewRow>,
    pub status: String,
    pub last_update: String,
    pub heartbeat: String,
    pub origins: Vec<String>,
    /// Bumped on every projected change (drives UI refresh pacing)
    pub revision: u64,
}

impl GridView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(&self, label: &str) -> Option<&ViewRow> {
        self.rows.iter().find(|row| row.label == label)
    }

    pub fn cell(&self, row: &str, column: &str) -> Option<&ViewCell> {
        self.row(row).and_then(|row| row.cells.get(column))
    }

    fn row_mut(&mut self, label: &str) -> Option<&mut ViewRow> {
        self.rows.iter_mut().find(|row| row.label == label)
    }
}

impl GridSink for GridView {
    fn ensure_column(&mut self, label: &str, content: &str) {
        self.revision += 1;
        if let Some(column) = self.columns.iter_mut().find(|c| c.label == label) {
            column.content = content.to_string();
            return;
        }
        self.columns.push(ViewColumn {
            label: label.to_string(),
            content: content.to_string(),
        });
        for row in &mut self.rows {
            row.cells.insert(label.to_string(), ViewCell::default());
        }
    }

    fn ensure_row(&mut self, label: &str, content: &str) {
        self.revision += 1;
        if let Some(row) = self.row_mut(label) {
            row.content = content.to_string();
            return;
        }
        let cells = self
            .columns
            .iter()
            .map(|c| (c.label.clone(), ViewCell::default()))
            .collect();
        self.rows.push(ViewRow {
            label: label.to_string(),
            content: content.to_string(),
            cells,
            ..Default::default()
        });
    }

    fn set_cell_value(
        &mut self,
        row: &str,
        column: &str,
        value: Option<&str>,
        recency: Recency,
    ) -> Result<(), GridError> {
        let cell = self
            .row_mut(row)
            .and_then(|r| r.cells.get_mut(column))
            .ok_or_else(|| GridError::NotFound {
                row: row.to_string(),
                column: Some(column.to_string()),
            })?;
        cell.value = value.map(str::to_string);
        cell.recency = recency;
        self.revision += 1;
        Ok(())
    }

    fn set_row_timeout(&mut self, row: &str, timed_out: bool, timer: &str) {
        if let Some(view_row) = self.row_mut(row) {
            view_row.timed_out = timed_out;
            view_row.timer = timer.to_string();
            self.revision += 1;
        }
    }

    fn set_status(&mut self, status: &str) {
        self.status = status.to_string();
        self.revision += 1;
    }

    fn set_last_update(&mut self, text: &str) {
        self.last_update = text.to_string();
    }

    fn set_origins(&mut self, origins: &[String]) {
        self.origins = origins.to_vec();
        self.revision += 1;
    }

    fn set_heartbeat(&mut self, text: &str) {
        self.heartbeat = text.to_string();
    }
}

/// [`GridView`] shared between the dashboard task and the UI loop
#[derive(Debug, Clone, Default)]
pub struct SharedView(Arc<RwLock<GridView>>);

impl SharedView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, GridView> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn with<T>(&self, f: impl FnOnce(&mut GridView) -> T) -> T {
        let mut view = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut view)
    }
}

impl GridSink for SharedView {
    fn ensure_column(&mut self, label: &str, content: &str) {
        self.with(|view| view.ensure_column(label, content))
    }

    fn ensure_row(&mut self, label: &str, content: &str) {
        self.with(|view| view.ensure_row(label, content))
    }

    fn set_cell_value(
        &mut self,
        row: &str,
        column: &str,
        value: Option<&str>,
        recency: Recency,
    ) -> Result<(), GridError> {
        self.with(|view| view.set_cell_value(row, column, value, recency))
    }

    fn set_row_timeout(&mut self, row: &str, timed_out: bool, timer: &str) {
        self.with(|view| view.set_row_timeout(row, timed_out, timer))
    }

    fn set_status(&mut self, status: &str) {
        self.with(|view| view.set_status(status))
    }

    fn set_last_update(&mut self, text: &str) {
        self.with(|view| view.set_last_update(text))
    }

    fn set_origins(&mut self, origins: &[String]) {
        self.with(|view| view.set_origins(origins))
    }

    fn set_heartbeat(&mut self, text: &str) {
        self.with(|view| view.set_heartbeat(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_tracks_grid_shape() {
        let mut view = GridView::new();
        view.ensure_row("port1", "port1");
        view.ensure_column("ping", "ping");
        view.ensure_row("port2", "Port 2");

        assert_eq!(view.cell("port1", "ping"), Some(&ViewCell::default()));
        assert_eq!(view.cell("port2", "ping"), Some(&ViewCell::default()));
        assert_eq!(view.row("port2").unwrap().content, "Port 2");
    }

    #[test]
    fn test_unknown_cell_is_not_found() {
        let mut view = GridView::new();
        view.ensure_row("port1", "port1");
        let result = view.set_cell_value("port1", "ping", Some("pass"), Recency::Current);
        assert!(matches!(result, Err(GridError::NotFound { .. })));
    }

    #[test]
    fn test_shared_view_projects_writes() {
        let mut shared = SharedView::new();
        let reader = shared.clone();
        shared.ensure_row("port1", "port1");
        shared.ensure_column("ping", "ping");
        shared
            .set_cell_value("port1", "ping", Some("pass"), Recency::Current)
            .unwrap();
        shared.set_row_timeout("port1", true, "Timed Out");

        let view = reader.read();
        let cell = view.cell("port1", "ping").unwrap();
        assert_eq!(cell.value.as_deref(), Some("pass"));
        assert_eq!(cell.recency, Recency::Current);
        assert!(view.row("port1").unwrap().timed_out);
        assert!(view.revision > 0);
    }
}
