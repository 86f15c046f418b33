//! Per-row two-generation run window and cell recency classification

use crate::run_id::RunId;

/// Recency of a cell relative to its row's run window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recency {
    Current,
    Previous,
    Gone,
}

impl Recency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recency::Current => "current",
            Recency::Previous => "previous",
            Recency::Gone => "gone",
        }
    }
}

/// Classify a cell from its run id and the row's window
pub fn classify(cell: Option<&RunId>, window: &RunWindow) -> Recency {
    match cell {
        Some(run) if window.current.as_ref() == Some(run) => Recency::Current,
        Some(run) if window.previous.as_ref() == Some(run) => Recency::Previous,
        _ => Recency::Gone,
    }
}

/// The newest and second-newest run observed for a row.
///
/// Invariant: `current >= previous` whenever both are set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunWindow {
    current: Option<RunId>,
    previous: Option<RunId>,
}

/// Outcome of feeding a run id into a [`RunWindow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Same as the current run
    Replay,
    /// New newest run; the old current became previous
    Advanced,
    /// Slotted in as the previous run
    Backfilled,
    /// Older than both tracked runs
    Discarded,
}

impl Transition {
    pub fn accepted(&self) -> bool {
        matches!(self, Transition::Advanced | Transition::Backfilled)
    }
}

impl RunWindow {
    pub fn current(&self) -> Option<&RunId> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&RunId> {
        self.previous.as_ref()
    }

    pub fn observe(&mut self, run: RunId) -> Transition {
        if self.current.as_ref() == Some(&run) {
            return Transition::Replay;
        }

        let newest = self.current.as_ref().map_or(true, |current| run > *current);
        if newest {
            self.previous = self.current.replace(run);
            return Transition::Advanced;
        }

        if self.previous.as_ref().map_or(false, |previous| run <= *previous) {
            return Transition::Discarded;
        }

        self.previous = Some(run);
        Transition::Backfilled
    }
}
