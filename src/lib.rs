//! testgrid: live hierarchical result grid
//!
//! Subscribes to the `origin → port → run → test` document hierarchy of a
//! [`DocumentStore`](store::DocumentStore) and keeps a sparse row × column
//! grid of results, classifying each cell against its row's two latest runs
//! and flagging rows that stop reporting.

pub mod config;
pub mod dashboard;
pub mod filter;
pub mod grid;
pub mod layout;
pub mod run_id;
pub mod session;
pub mod sink;
pub mod store;
pub mod subscription;
pub mod ticker;
pub mod ui;

pub use dashboard::{Dashboard, DashboardMessage};
pub use grid::{GridError, GridModel, Recency};
pub use run_id::RunId;
pub use sink::{GridSink, GridView, SharedView};
