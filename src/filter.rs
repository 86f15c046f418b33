//! Filter query builder
//!
//! Turns user-facing filter parameters into a concrete plan against the run
//! records of one origin:
//!
//! - **Direct**: explicit run ids are fetched one by one and the remaining
//!   filters are checked on each record; failing records are dropped whole.
//! - **Range**: one query with equality constraints, a half-open `updated`
//!   range, newest first, capped at a page size (no pagination).

use crate::layout::{self, FIELD_DEVICE, FIELD_PORT, FIELD_SITE, FIELD_UPDATED};
use crate::store::{
    values_equal, Document, DocumentStore, OrderSpec, Query, RangeFilter, RangeOp, StoreError,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};

/// Timestamp format used by the store's `updated` fields
const UPDATED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Optional filter criteria; `None` imposes no constraint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    pub site: Option<String>,
    pub origin: Option<String>,
    pub port: Option<i64>,
    pub device: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub run_ids: Vec<String>,
}

impl FilterSpec {
    /// Build from key/value parameters.
    ///
    /// Blank or malformed values are treated as "no constraint".
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut spec = Self::default();

        for (key, value) in params {
            let key = key.as_ref().trim().to_lowercase();
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }

            match key.as_str() {
                "origin" => spec.origin = Some(value.to_string()),
                "site" => spec.site = Some(value.to_string()),
                "device" => spec.device = Some(value.to_string()),
                "port" => spec.port = parse_or_ignore(&key, value, |v| v.parse().ok()),
                "from" => spec.from = parse_or_ignore(&key, value, parse_date),
                "to" => spec.to = parse_or_ignore(&key, value, parse_date),
                "runid" | "runids" => spec.run_ids.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string),
                ),
                _ => log::debug!("Ignoring unknown filter parameter: {}", key),
            }
        }

        spec
    }

    /// Whether anything beyond the origin narrows the run set
    pub fn is_filtered(&self) -> bool {
        self.site.is_some()
            || self.port.is_some()
            || self.device.is_some()
            || self.from.is_some()
            || self.to.is_some()
            || !self.run_ids.is_empty()
    }

    /// Post-hoc predicate over a run record (run ids are not checked here)
    pub fn matches(&self, data: &Value) -> bool {
        let field_equals = |field: &str, expected: Value| {
            data.get(field)
                .map(|actual| values_equal(actual, &expected))
                .unwrap_or(false)
        };

        if let Some(site) = &self.site {
            if !field_equals(FIELD_SITE, json!(site)) {
                return false;
            }
        }
        if let Some(port) = self.port {
            if !field_equals(FIELD_PORT, json!(port)) {
                return false;
            }
        }
        if let Some(device) = &self.device {
            if !field_equals(FIELD_DEVICE, json!(device)) {
                return false;
            }
        }

        if self.from.is_none() && self.to.is_none() {
            return true;
        }

        let Some(updated) = data
            .get(FIELD_UPDATED)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
        else {
            return false;
        };

        self.from.map_or(true, |from| updated >= from) && self.to.map_or(true, |to| updated < to)
    }
}

fn parse_or_ignore<T>(key: &str, value: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let parsed = parse(value);
    if parsed.is_none() {
        log::debug!("Malformed filter {}={}, no constraint applied", key, value);
    }
    parsed
}

/// RFC 3339 timestamp or `YYYY-MM-DD` (midnight UTC)
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Render a bound the same way the store writes `updated`
pub fn format_updated(dt: &DateTime<Utc>) -> String {
    dt.format(UPDATED_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// Resolve these run ids directly, checking `predicate` on each record
    Direct {
        run_ids: Vec<String>,
        predicate: FilterSpec,
    },
    /// Single ordered, capped query over the origin's run records
    Range(Query),
}

pub fn build_query(spec: &FilterSpec, page_size: usize) -> QueryPlan {
    if !spec.run_ids.is_empty() {
        return QueryPlan::Direct {
            run_ids: spec.run_ids.clone(),
            predicate: FilterSpec {
                run_ids: Vec::new(),
                ..spec.clone()
            },
        };
    }

    let mut query = Query::default();
    if let Some(site) = &spec.site {
        query.equality.push((FIELD_SITE.to_string(), json!(site)));
    }
    if let Some(port) = spec.port {
        query.equality.push((FIELD_PORT.to_string(), json!(port)));
    }
    if let Some(device) = &spec.device {
        query.equality.push((FIELD_DEVICE.to_string(), json!(device)));
    }
    if let Some(from) = &spec.from {
        query.range.push(RangeFilter {
            field: FIELD_UPDATED.to_string(),
            op: RangeOp::AtLeast,
            value: json!(format_updated(from)),
        });
    }
    if let Some(to) = &spec.to {
        query.range.push(RangeFilter {
            field: FIELD_UPDATED.to_string(),
            op: RangeOp::Below,
            value: json!(format_updated(to)),
        });
    }
    query.order = Some(OrderSpec::latest(FIELD_UPDATED, page_size));

    QueryPlan::Range(query)
}

/// A resolved `origin/{o}/runid/{run}` record
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub port: Option<i64>,
    pub device_id: Option<String>,
    pub site_name: Option<String>,
    pub updated: Option<String>,
}

impl RunRecord {
    pub fn from_document(document: &Document) -> Self {
        Self {
            id: document.id.clone(),
            port: document.field(FIELD_PORT).and_then(|v| {
                v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            }),
            device_id: document.str_field(FIELD_DEVICE).map(str::to_string),
            site_name: document.str_field(FIELD_SITE).map(str::to_string),
            updated: document.str_field(FIELD_UPDATED).map(str::to_string),
        }
    }

    /// Grid row for this run: port, else device, else the run itself
    pub fn row_label(&self) -> String {
        match (&self.port, &self.device_id) {
            (Some(port), _) => format!("port{}", port),
            (None, Some(device)) => device.clone(),
            (None, None) => self.id.clone(),
        }
    }
}

/// Execute a plan against the run records of `origin`
pub async fn resolve_runs(
    store: &dyn DocumentStore,
    origin: &str,
    plan: &QueryPlan,
) -> Result<Vec<RunRecord>, StoreError> {
    match plan {
        QueryPlan::Direct { run_ids, predicate } => {
            let mut records = Vec::with_capacity(run_ids.len());
            for run_id in run_ids {
                match store.get(&layout::run(origin, run_id)).await? {
                    None => log::warn!("⚠️  Run {} not found under origin {}", run_id, origin),
                    Some(document) if !predicate.matches(&document.data) => {
                        log::debug!("Run {} filtered out", run_id);
                    }
                    Some(document) => records.push(RunRecord::from_document(&document)),
                }
            }
            Ok(records)
        }
        QueryPlan::Range(query) => Ok(store
            .query(&layout::runs(origin), query)
            .await?
            .iter()
            .map(RunRecord::from_document)
            .collect()),
    }
}
