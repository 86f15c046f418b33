//! Session wiring
//!
//! Decides what the dashboard watches from the filter and starts it:
//!
//! - no origin: list the available origins
//! - origin only: cascade `port → runid (latest N) → test`
//! - origin plus filters: resolve the matching runs once, then watch each
//!   run's tests
//!
//! Every mode also starts the staleness ticker; origin modes watch the runner
//! heartbeat. Cascade events are translated into [`DashboardMessage`]s by
//! forwarder tasks.

use crate::config::DashboardConfig;
use crate::dashboard::DashboardMessage;
use crate::filter::{build_query, resolve_runs, FilterSpec, RunRecord};
use crate::layout::{
    self, COLUMN_SOURCE_ID, HEARTBEAT_ID, PORT_COLLECTION, RUNNER_COLLECTION, RUN_COLLECTION,
    TEST_COLLECTION,
};
use crate::store::{DocumentStore, OrderSpec, Query, StorePath};
use crate::subscription::{CascadeEvent, Level, SubscriptionTree};
use crate::ticker::staleness_ticker_task;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Run documents are ordered by this field in the cascade's run window
const RUN_ORDER_FIELD: &str = "timestamp";

#[derive(Debug)]
pub enum SessionError {
    Initialization(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Initialization(msg) => write!(f, "Initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    Listing,
    Cascade { origin: String },
    Filtered { origin: String, runs: usize },
}

/// A running dashboard session
pub struct Session {
    mode: SessionMode,
    tree: Arc<SubscriptionTree>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn mode(&self) -> &SessionMode {
        &self.mode
    }

    pub fn tree(&self) -> &Arc<SubscriptionTree> {
        &self.tree
    }

    /// Stop the ticker and forwarders; open subscriptions wind down once
    /// their next event finds the forwarder gone
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

pub async fn start_session(
    store: Arc<dyn DocumentStore>,
    config: &DashboardConfig,
    filter: &FilterSpec,
    tx: mpsc::Sender<DashboardMessage>,
) -> Result<Session, SessionError> {
    let tree = SubscriptionTree::new(Arc::clone(&store), Duration::from_millis(config.stagger_ms));
    let mut tasks = vec![tokio::spawn(staleness_ticker_task(
        tx.clone(),
        config.tick_interval_ms,
    ))];

    send(&tx, DashboardMessage::Status("System initialized.".to_string())).await?;

    let Some(origin) = filter.origin.clone() else {
        log::info!("📋 No origin selected, listing origins");
        list_origins(store.as_ref(), &tx).await?;
        return Ok(Session {
            mode: SessionMode::Listing,
            tree,
            tasks,
        });
    };

    tasks.push(watch_heartbeat(&tree, &origin, tx.clone()));

    let mode = if filter.is_filtered() {
        let plan = build_query(filter, config.page_size);
        let runs = match resolve_runs(store.as_ref(), &origin, &plan).await {
            Ok(runs) => runs,
            Err(e) => {
                let message = format!("run query failed: {}", e);
                let _ = tx.send(DashboardMessage::Fatal(message.clone())).await;
                return Err(SessionError::Initialization(message));
            }
        };
        log::info!("🔎 Filter matched {} runs under origin {}", runs.len(), origin);
        if runs.is_empty() {
            send(&tx, DashboardMessage::Status("No runs match filter".to_string())).await?;
        }

        let count = runs.len();
        tasks.push(watch_runs(&tree, &origin, runs, tx.clone()));
        SessionMode::Filtered {
            origin: origin.clone(),
            runs: count,
        }
    } else {
        log::info!("🌲 Watching origin {} (latest {} runs per port)", origin, config.run_window);
        tasks.push(watch_origin(&tree, &origin, config.run_window, tx.clone()));
        SessionMode::Cascade {
            origin: origin.clone(),
        }
    };

    Ok(Session { mode, tree, tasks })
}

async fn send(tx: &mpsc::Sender<DashboardMessage>, message: DashboardMessage) -> Result<(), SessionError> {
    tx.send(message)
        .await
        .map_err(|_| SessionError::Initialization("dashboard channel closed".to_string()))
}

async fn list_origins(
    store: &dyn DocumentStore,
    tx: &mpsc::Sender<DashboardMessage>,
) -> Result<(), SessionError> {
    match store.query(&layout::origins(), &Query::default()).await {
        Ok(documents) => {
            let origins = documents.into_iter().map(|d| d.id).collect();
            send(tx, DashboardMessage::Origins(origins)).await
        }
        Err(e) => {
            log::error!("❌ Origin list failed: {}", e);
            send(tx, DashboardMessage::Status(format!("origin list error {}", e))).await
        }
    }
}

/// Cascade levels below `origin/{o}`
pub fn origin_levels(run_window: usize) -> Vec<Level> {
    vec![
        Level::new(PORT_COLLECTION).detach(COLUMN_SOURCE_ID),
        Level::new(RUN_COLLECTION).ordered(OrderSpec::latest(RUN_ORDER_FIELD, run_window)),
        Level::new(TEST_COLLECTION),
    ]
}

fn watch_origin(
    tree: &Arc<SubscriptionTree>,
    origin: &str,
    run_window: usize,
    tx: mpsc::Sender<DashboardMessage>,
) -> JoinHandle<()> {
    let (cascade_tx, cascade_rx) = mpsc::channel(64);
    tree.register_cascade(layout::origin(origin), origin_levels(run_window), cascade_tx);

    tokio::spawn(forward(cascade_rx, tx, |event| match event {
        CascadeEvent::Document {
            level: 0, document, ..
        } if document.id == COLUMN_SOURCE_ID => Some(DashboardMessage::Columns(expected_tests(&document.data))),
        CascadeEvent::Document {
            ids, document, ..
        } => match ids.as_slice() {
            [port, run] => Some(DashboardMessage::Result {
                row: port.clone(),
                run_id: result_run_id(&document.data, run),
                test: document.id,
                data: document.data,
            }),
            _ => None,
        },
        CascadeEvent::Failed { path, error } => Some(failure_status(&path, &error)),
    }))
}

fn watch_runs(
    tree: &Arc<SubscriptionTree>,
    origin: &str,
    runs: Vec<RunRecord>,
    tx: mpsc::Sender<DashboardMessage>,
) -> JoinHandle<()> {
    let (cascade_tx, cascade_rx) = mpsc::channel(64);
    let mut by_base: HashMap<StorePath, RunRecord> = HashMap::new();

    for (n, record) in runs.into_iter().enumerate() {
        let base = layout::run(origin, &record.id);
        let delay = tree.stagger() * n as u32;
        tree.register_cascade_after(
            base.clone(),
            vec![Level::new(TEST_COLLECTION)],
            cascade_tx.clone(),
            delay,
        );
        by_base.insert(base, record);
    }
    drop(cascade_tx);

    tokio::spawn(forward(cascade_rx, tx, move |event| match event {
        CascadeEvent::Document { base, document, .. } => {
            let record = by_base.get(&base)?;
            Some(DashboardMessage::Result {
                row: record.row_label(),
                run_id: result_run_id(&document.data, &record.id),
                test: document.id,
                data: document.data,
            })
        }
        CascadeEvent::Failed { path, error } => Some(failure_status(&path, &error)),
    }))
}

fn watch_heartbeat(
    tree: &Arc<SubscriptionTree>,
    origin: &str,
    tx: mpsc::Sender<DashboardMessage>,
) -> JoinHandle<()> {
    let (cascade_tx, cascade_rx) = mpsc::channel(8);
    tree.register_cascade(
        layout::origin(origin),
        vec![Level::new(RUNNER_COLLECTION)],
        cascade_tx,
    );

    tokio::spawn(forward(cascade_rx, tx, |event| match event {
        CascadeEvent::Document { document, .. } if document.id == HEARTBEAT_ID => {
            Some(DashboardMessage::Heartbeat(document.data))
        }
        CascadeEvent::Document { .. } => None,
        CascadeEvent::Failed { path, error } => Some(failure_status(&path, &error)),
    }))
}

async fn forward<F>(
    mut events: mpsc::Receiver<CascadeEvent>,
    tx: mpsc::Sender<DashboardMessage>,
    translate: F,
) where
    F: Fn(CascadeEvent) -> Option<DashboardMessage> + Send + 'static,
{
    while let Some(event) = events.recv().await {
        let Some(message) = translate(event) else {
            continue;
        };
        if tx.send(message).await.is_err() {
            log::debug!("Dashboard closed, stopping forwarder");
            break;
        }
    }
}

fn failure_status(path: &StorePath, error: &crate::store::StoreError) -> DashboardMessage {
    DashboardMessage::Status(format!("Subscription error on {}: {}", path, error))
}

/// Run id carried by the result itself, else the run it was found under
fn result_run_id(data: &Value, fallback: &str) -> String {
    data.get("runid")
        .and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| fallback.to_string())
}

/// `message.tests` of the column source document
fn expected_tests(data: &Value) -> Vec<String> {
    data.pointer("/message/tests")
        .and_then(Value::as_array)
        .map(|tests| {
            tests
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
