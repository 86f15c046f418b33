//! Staleness ticker
//!
//! A fixed-interval sweep over every row: terminated rows show `Done`, rows
//! silent for longer than the timeout show `Timed Out`, everything else shows
//! a live elapsed counter. The sweep itself is synchronous and runs on the
//! dashboard task; the async side only emits ticks into the dashboard channel.

use crate::dashboard::DashboardMessage;
use crate::grid::GridModel;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub const DONE_TEXT: &str = "Done";
pub const TIMED_OUT_TEXT: &str = "Timed Out";

/// Timer state of one row after a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowTimer {
    pub row: String,
    pub timer: String,
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub timers: Vec<RowTimer>,
    /// Global "last update" indicator text
    pub last_update: String,
}

/// Mark rows timed-out / done and compute their timer text.
///
/// Rows that have never been updated are skipped.
pub fn sweep(model: &mut GridModel, now: i64, timeout_secs: i64) -> SweepReport {
    let mut timers = Vec::new();

    for row in model.rows_mut() {
        let Some(updated) = row.updated() else {
            continue;
        };

        let (timer, timed_out) = if row.is_terminated() {
            (DONE_TEXT.to_string(), true)
        } else {
            let elapsed = (now - updated).max(0);
            if elapsed > timeout_secs {
                (TIMED_OUT_TEXT.to_string(), true)
            } else {
                (format_elapsed(elapsed), false)
            }
        };

        row.set_timed_out(timed_out);
        timers.push(RowTimer {
            row: row.label.clone(),
            timer,
            timed_out,
        });
    }

    let last_update = match model.last_update() {
        Some(updated) => format!("Last update {} ago", format_elapsed((now - updated).max(0))),
        None => "No updates yet".to_string(),
    };

    SweepReport { timers, last_update }
}

/// `42s`, `3m 05s`, `1h 02m 03s`
pub fn format_elapsed(secs: i64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Emit a `Tick` into the dashboard channel every `interval_ms`.
///
/// Runs until the dashboard side of the channel is dropped.
pub async fn staleness_ticker_task(tx: mpsc::Sender<DashboardMessage>, interval_ms: u64) {
    log::info!("⏰ Starting staleness ticker (interval: {}ms)", interval_ms);

    let mut timer = interval(Duration::from_millis(interval_ms));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        timer.tick().await;
        if tx.send(DashboardMessage::Tick).await.is_err() {
            log::debug!("Dashboard closed, stopping staleness ticker");
            break;
        }
    }
}
