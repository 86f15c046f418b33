//! Document layout written by the ingestion functions

use crate::store::StorePath;

pub const ORIGIN_COLLECTION: &str = "origin";
pub const PORT_COLLECTION: &str = "port";
pub const RUN_COLLECTION: &str = "runid";
pub const TEST_COLLECTION: &str = "test";
pub const RUNNER_COLLECTION: &str = "runner";

/// Runner liveness document under `origin/{o}/runner`
pub const HEARTBEAT_ID: &str = "heartbeat";

/// Port document carrying the expected test list instead of runs
pub const COLUMN_SOURCE_ID: &str = "port-undefined";

/// Reserved test name that marks a row's run as finished
pub const TERMINATE_TEST: &str = "terminate";

/// Extra columns fed from result fields
pub const INFO_COLUMN: &str = "info";
pub const REPORT_COLUMN: &str = "report";

/// Run record fields (`origin/{o}/runid/{run}`)
pub const FIELD_SITE: &str = "siteName";
pub const FIELD_PORT: &str = "port";
pub const FIELD_DEVICE: &str = "deviceId";
pub const FIELD_UPDATED: &str = "updated";

pub fn origins() -> StorePath {
    StorePath::new([ORIGIN_COLLECTION])
}

pub fn origin(origin: &str) -> StorePath {
    origins().child(origin)
}

/// `origin/{o}/runid`
pub fn runs(origin_id: &str) -> StorePath {
    origin(origin_id).child(RUN_COLLECTION)
}

/// `origin/{o}/runid/{run}`
pub fn run(origin_id: &str, run_id: &str) -> StorePath {
    runs(origin_id).child(run_id)
}
