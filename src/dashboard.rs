//! Dashboard controller
//!
//! The single task that owns the [`GridModel`]. Subscription branches, the
//! session and the staleness ticker all talk to it through one mpsc channel,
//! so every grid mutation is applied in arrival order on this task and then
//! projected to the [`GridSink`].

use crate::grid::{CellState, GridError, GridModel, Transition};
use crate::layout::{INFO_COLUMN, REPORT_COLUMN, TERMINATE_TEST};
use crate::run_id::RunId;
use crate::sink::GridSink;
use crate::ticker;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardMessage {
    /// A test result document for `row` at run `run_id`
    Result {
        row: String,
        run_id: String,
        test: String,
        data: Value,
    },
    /// Expected test names, created as columns up front
    Columns(Vec<String>),
    /// Runner heartbeat document data
    Heartbeat(Value),
    /// Available origins (listing mode)
    Origins(Vec<String>),
    Status(String),
    /// Setup failure; the dashboard stops applying results
    Fatal(String),
    /// Staleness sweep
    Tick,
    Shutdown,
}

/// Status of a result document.
///
/// An explicit `state` wins; otherwise an `exception` or a non-zero numeric
/// `code` is a failure and anything else passes.
pub fn result_status(data: &Value) -> String {
    match data.get("state") {
        Some(Value::String(state)) if !state.is_empty() => return state.clone(),
        Some(state) if truthy(state) => return state.to_string(),
        _ => {}
    }

    if data.get("exception").map_or(false, truthy) {
        return "fail".to_string();
    }

    let code = match data.get("code") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    match code {
        Some(code) if code != 0.0 && !code.is_nan() => "fail".to_string(),
        _ => "pass".to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub struct Dashboard<S: GridSink> {
    model: GridModel,
    sink: S,
    timeout_secs: i64,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    halted: bool,
}

impl<S: GridSink> Dashboard<S> {
    pub fn new(sink: S, timeout_secs: i64) -> Self {
        Self {
            model: GridModel::new(),
            sink,
            timeout_secs,
            now_fn: Box::new(|| chrono::Utc::now().timestamp()),
            halted: false,
        }
    }

    /// Replace the wall clock (unix seconds)
    pub fn with_clock(mut self, now_fn: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.now_fn = Box::new(now_fn);
        self
    }

    pub fn model(&self) -> &GridModel {
        &self.model
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Apply one message; returns `false` on shutdown
    pub fn apply(&mut self, message: DashboardMessage) -> bool {
        match message {
            DashboardMessage::Result {
                row,
                run_id,
                test,
                data,
            } => {
                if let Err(e) = self.handle_result(&row, &run_id, &test, &data) {
                    log::warn!("⚠️  Dropped result {} {} @ {}: {}", row, test, run_id, e);
                }
            }
            DashboardMessage::Columns(tests) => self.handle_columns(&tests),
            DashboardMessage::Heartbeat(data) => self.handle_heartbeat(&data),
            DashboardMessage::Origins(origins) => {
                self.sink.set_origins(&origins);
                self.sink
                    .set_status(&format!("{} origins available", origins.len()));
            }
            DashboardMessage::Status(status) => self.sink.set_status(&status),
            DashboardMessage::Fatal(error) => {
                log::error!("❌ Loading error: {}", error);
                self.halted = true;
                self.sink.set_status(&format!("Loading error: {}", error));
            }
            DashboardMessage::Tick => self.tick(),
            DashboardMessage::Shutdown => return false,
        }
        true
    }

    /// Reconcile one result document into the grid.
    ///
    /// The row window is updated before the cells so that an accepted
    /// transition reprojects the row with the new window in the same step.
    pub fn handle_result(
        &mut self,
        row: &str,
        run_id: &str,
        test: &str,
        data: &Value,
    ) -> Result<(), GridError> {
        if self.halted {
            return Ok(());
        }
        let Some(run) = RunId::parse(run_id) else {
            log::warn!("⚠️  Ignoring result {} {} without run id", row, test);
            return Ok(());
        };

        if self.model.ensure_row(row, None) {
            self.sink.ensure_row(row, row);
        }
        let terminate = test == TERMINATE_TEST;
        if !terminate {
            self.ensure_column(test);
        }

        let status = result_status(data);
        let line = format!("updating {} {} = {} with {}", row, test, run, status);
        log::debug!("{}", line);
        self.sink.set_status(&line);

        let transition = self.model.set_row_state(row, run.clone())?;

        let mut written: Vec<CellState> = Vec::new();
        if !terminate {
            written.push(self.model.set_cell(row, test, Some(run.clone()), Some(status.as_str()), false)?);
        }
        if let Some(info) = data.get(INFO_COLUMN).and_then(Value::as_str) {
            self.ensure_column(INFO_COLUMN);
            written.push(self.model.set_cell(row, INFO_COLUMN, Some(run.clone()), Some(info), false)?);
        }
        if let Some(report) = data.get(REPORT_COLUMN).and_then(Value::as_str) {
            self.ensure_column(REPORT_COLUMN);
            written.push(self.model.set_cell(row, REPORT_COLUMN, Some(run.clone()), Some(report), true)?);
        }

        // Results of runs already out of the window say nothing about liveness
        if transition != Transition::Discarded {
            self.model.touch_row(row, (self.now_fn)())?;
        }
        if terminate {
            log::info!("🏁 Row {} run {} terminated", row, run);
            self.model.terminate_row(row, run)?;
        }

        if transition.accepted() {
            self.project_row(row)
        } else {
            written
                .iter()
                .filter(|state| state.written)
                .try_for_each(|state| self.project_cell(state))
        }
    }

    /// Create columns for the expected test list
    pub fn handle_columns(&mut self, tests: &[String]) {
        if self.halted {
            return;
        }
        for test in tests {
            self.ensure_column(test);
        }
    }

    fn handle_heartbeat(&mut self, data: &Value) {
        let updated = data
            .get("updated")
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()));
        let message = data.get("message").and_then(Value::as_str);

        let text = match (updated, message) {
            (Some(updated), Some(message)) => format!("{} {}", updated, message),
            (Some(updated), None) => updated,
            (None, Some(message)) => message.to_string(),
            (None, None) => "unknown".to_string(),
        };
        self.sink.set_heartbeat(&text);
    }

    /// Run the staleness sweep and project timers
    pub fn tick(&mut self) {
        let report = ticker::sweep(&mut self.model, (self.now_fn)(), self.timeout_secs);
        for timer in &report.timers {
            self.sink
                .set_row_timeout(&timer.row, timer.timed_out, &timer.timer);
        }
        self.sink.set_last_update(&report.last_update);
    }

    fn ensure_column(&mut self, label: &str) {
        if self.model.ensure_column(label, None) {
            self.sink.ensure_column(label, label);
        }
    }

    fn project_row(&mut self, row: &str) -> Result<(), GridError> {
        for state in self.model.row_cells(row)? {
            self.project_cell(&state)?;
        }
        Ok(())
    }

    fn project_cell(&mut self, state: &CellState) -> Result<(), GridError> {
        self.sink.set_cell_value(
            &state.row,
            &state.column,
            state.value.as_deref(),
            state.recency,
        )
    }
}

/// Dashboard task: applies messages until shutdown or until every sender is
/// dropped, then hands the dashboard back.
pub async fn dashboard_task<S: GridSink>(
    mut receiver: mpsc::Receiver<DashboardMessage>,
    mut dashboard: Dashboard<S>,
) -> Dashboard<S> {
    log::info!("📊 Dashboard task started");

    while let Some(message) = receiver.recv().await {
        if !dashboard.apply(message) {
            log::info!("Dashboard received shutdown signal");
            break;
        }
    }

    log::info!("Dashboard task stopped");
    dashboard
}
