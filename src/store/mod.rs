//! Hierarchical document store interface
//!
//! The dashboard never talks to a vendor SDK directly. Everything it needs from
//! the backing store goes through [`DocumentStore`]:
//!
//! ```text
//! subscribe(collection, order?) → stream of change batches (add-only consumers)
//! get(document path)            → one-shot snapshot
//! query(collection, Query)      → one-shot result set
//! ```
//!
//! Paths alternate collection and document segments:
//! `origin/{origin}/port/{port}/runid/{run}/test/{test}`.

pub mod feed;
pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use tokio::sync::mpsc;

/// Slash-separated path into the store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StorePath(Vec<String>);

impl StorePath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse `origin/o1/port/port3`; empty segments are dropped
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Append one segment (collection name or document id)
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Last segment (the document id for document paths)
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// A document snapshot: its id within the parent collection plus JSON data
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self { id: id.into(), data }
    }

    /// Top-level field lookup
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Top-level string field, ignoring blanks
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One change within a subscription batch
#[derive(Debug, Clone, PartialEq)]
pub struct ChildChange {
    pub kind: ChangeKind,
    pub document: Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Ordering and optional result cap for subscriptions and queries
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub field: String,
    pub direction: Direction,
    pub limit: Option<usize>,
}

impl OrderSpec {
    /// Newest-first on `field`, keeping at most `limit` documents
    pub fn latest(field: &str, limit: usize) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Descending,
            limit: Some(limit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    /// `field >= value`
    AtLeast,
    /// `field < value`
    Below,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    pub field: String,
    pub op: RangeOp,
    pub value: Value,
}

/// Equality + range constraints with an optional order/limit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub equality: Vec<(String, Value)>,
    pub range: Vec<RangeFilter>,
    pub order: Option<OrderSpec>,
}

impl Query {
    /// Whether a document satisfies every equality and range constraint
    pub fn matches(&self, data: &Value) -> bool {
        let equal = self.equality.iter().all(|(field, expected)| {
            data.get(field)
                .map(|actual| values_equal(actual, expected))
                .unwrap_or(false)
        });

        equal
            && self.range.iter().all(|filter| {
                let ordering = data
                    .get(&filter.field)
                    .and_then(|actual| compare_values(actual, &filter.value));
                match (filter.op, ordering) {
                    (RangeOp::AtLeast, Some(o)) => o != Ordering::Less,
                    (RangeOp::Below, Some(o)) => o == Ordering::Less,
                    (_, None) => false,
                }
            })
    }
}

/// Compare two JSON scalars of the same kind (numbers or strings)
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Equality that treats `3` and `3.0` as the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Sort documents by an order spec and apply its limit.
///
/// Documents missing the order field sort last regardless of direction.
pub fn apply_order(documents: &mut Vec<Document>, order: &OrderSpec) {
    documents.sort_by(|a, b| {
        let ordering = match (a.field(&order.field), b.field(&order.field)) {
            (Some(x), Some(y)) => {
                let o = compare_values(x, y).unwrap_or(Ordering::Equal);
                match order.direction {
                    Direction::Ascending => o,
                    Direction::Descending => o.reverse(),
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    });

    if let Some(limit) = order.limit {
        documents.truncate(limit);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Listener failure; the subscription produces nothing further
    Subscription(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Subscription(msg) => write!(f, "Subscription error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Stream of change batches; an `Err` item ends the subscription
pub type ChangeStream = mpsc::UnboundedReceiver<Result<Vec<ChildChange>, StoreError>>;

/// Backing hierarchical store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a live subscription on a collection.
    ///
    /// The first batch carries the current window as `Added` changes.
    async fn subscribe(
        &self,
        collection: &StorePath,
        order: Option<&OrderSpec>,
    ) -> Result<ChangeStream, StoreError>;

    /// One-shot snapshot of a single document
    async fn get(&self, path: &StorePath) -> Result<Option<Document>, StoreError>;

    /// One-shot query over a collection
    async fn query(&self, collection: &StorePath, query: &Query) -> Result<Vec<Document>, StoreError>;
}
