//! In-memory document store
//!
//! Implements the full [`DocumentStore`] contract so the dashboard can run
//! against a local feed and tests can drive subscriptions deterministically.
//! Each subscription keeps the window it last reported; every write to the
//! collection recomputes the window and sends the diff as one batch.

use super::{
    apply_order, ChangeKind, ChangeStream, ChildChange, Document, DocumentStore, OrderSpec, Query,
    StoreError, StorePath,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

type BatchSender = mpsc::UnboundedSender<Result<Vec<ChildChange>, StoreError>>;

struct Watcher {
    collection: StorePath,
    order: Option<OrderSpec>,
    /// Documents last reported to this subscriber (id -> data)
    visible: HashMap<String, Value>,
    tx: BatchSender,
}

impl Watcher {
    fn diff(&mut self, window: Vec<Document>) -> Vec<ChildChange> {
        let mut changes = Vec::new();
        let mut next = HashMap::with_capacity(window.len());

        for document in window {
            match self.visible.get(&document.id) {
                None => changes.push(ChildChange {
                    kind: ChangeKind::Added,
                    document: document.clone(),
                }),
                Some(previous) if *previous != document.data => changes.push(ChildChange {
                    kind: ChangeKind::Modified,
                    document: document.clone(),
                }),
                Some(_) => {}
            }
            next.insert(document.id, document.data);
        }

        let mut removed: Vec<(&String, &Value)> = self
            .visible
            .iter()
            .filter(|(id, _)| !next.contains_key(*id))
            .collect();
        removed.sort_by(|a, b| a.0.cmp(b.0));
        for (id, data) in removed {
            changes.push(ChildChange {
                kind: ChangeKind::Removed,
                document: Document::new(id.clone(), data.clone()),
            });
        }

        self.visible = next;
        changes
    }
}

#[derive(Default)]
struct Inner {
    documents: BTreeMap<StorePath, Value>,
    watchers: Vec<Watcher>,
    /// Number of subscribe calls per collection path
    opened: HashMap<StorePath, usize>,
    /// Collections whose subscribe calls are refused
    rejected: HashSet<StorePath>,
}

impl Inner {
    fn notify(&mut self, collection: &StorePath) {
        let documents = &self.documents;
        self.watchers.retain_mut(|watcher| {
            if watcher.collection != *collection {
                return !watcher.tx.is_closed();
            }
            let window = window_of(documents, &watcher.collection, watcher.order.as_ref());
            let changes = watcher.diff(window);
            if changes.is_empty() {
                return !watcher.tx.is_closed();
            }
            watcher.tx.send(Ok(changes)).is_ok()
        });
    }
}

/// Documents directly inside `collection`, ordered/limited when requested
fn window_of(
    documents: &BTreeMap<StorePath, Value>,
    collection: &StorePath,
    order: Option<&OrderSpec>,
) -> Vec<Document> {
    let mut window: Vec<Document> = documents
        .iter()
        .filter(|(path, _)| path.parent().as_ref() == Some(collection))
        .filter_map(|(path, data)| path.leaf().map(|id| Document::new(id, data.clone())))
        .collect();

    if let Some(order) = order {
        apply_order(&mut window, order);
    }
    window
}

/// Thread-safe in-memory [`DocumentStore`]
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a document and notify subscribers of its collection
    pub fn set(&self, path: &StorePath, data: Value) {
        let Some(collection) = path.parent() else {
            log::warn!("Ignoring write to empty path");
            return;
        };
        let mut inner = self.lock();
        inner.documents.insert(path.clone(), data);
        inner.notify(&collection);
    }

    /// Remove a document (no-op when absent)
    pub fn delete(&self, path: &StorePath) {
        let Some(collection) = path.parent() else {
            return;
        };
        let mut inner = self.lock();
        if inner.documents.remove(path).is_some() {
            inner.notify(&collection);
        }
    }

    /// Fail every live subscription on `collection`; they are dropped afterwards
    pub fn fail_subscriptions(&self, collection: &StorePath, message: &str) {
        let mut inner = self.lock();
        inner.watchers.retain(|watcher| {
            if watcher.collection != *collection {
                return true;
            }
            let _ = watcher
                .tx
                .send(Err(StoreError::Subscription(message.to_string())));
            false
        });
    }

    /// Refuse future subscribe calls on `collection`
    pub fn reject_subscriptions(&self, collection: &StorePath) {
        self.lock().rejected.insert(collection.clone());
    }

    /// How many times `collection` has been subscribed to
    pub fn subscribe_count(&self, collection: &StorePath) -> usize {
        self.lock().opened.get(collection).copied().unwrap_or(0)
    }

    /// Total subscribe calls across all collections
    pub fn total_subscribe_count(&self) -> usize {
        self.lock().opened.values().sum()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn subscribe(
        &self,
        collection: &StorePath,
        order: Option<&OrderSpec>,
    ) -> Result<ChangeStream, StoreError> {
        let mut inner = self.lock();
        *inner.opened.entry(collection.clone()).or_insert(0) += 1;

        if inner.rejected.contains(collection) {
            return Err(StoreError::Subscription(format!(
                "permission denied on {}",
                collection
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = Watcher {
            collection: collection.clone(),
            order: order.cloned(),
            visible: HashMap::new(),
            tx,
        };

        let initial = watcher.diff(window_of(&inner.documents, collection, order));
        if !initial.is_empty() {
            // Receiver is held locally, send cannot fail here
            let _ = watcher.tx.send(Ok(initial));
        }
        inner.watchers.push(watcher);

        Ok(rx)
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Document>, StoreError> {
        let inner = self.lock();
        Ok(inner.documents.get(path).and_then(|data| {
            path.leaf().map(|id| Document::new(id, data.clone()))
        }))
    }

    async fn query(&self, collection: &StorePath, query: &Query) -> Result<Vec<Document>, StoreError> {
        let inner = self.lock();
        let mut results: Vec<Document> = window_of(&inner.documents, collection, None)
            .into_iter()
            .filter(|document| query.matches(&document.data))
            .collect();

        if let Some(order) = &query.order {
            apply_order(&mut results, order);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> StorePath {
        StorePath::parse(s)
    }

    #[tokio::test]
    async fn test_initial_batch_reports_existing_documents() {
        let store = MemoryStore::new();
        store.set(&path("origin/o1/port/port1"), json!({"updated": "a"}));
        store.set(&path("origin/o1/port/port2"), json!({"updated": "b"}));
        // Nested documents are not part of the collection
        store.set(&path("origin/o1/port/port1/runid/r1"), json!({}));

        let mut rx = store.subscribe(&path("origin/o1/port"), None).await.unwrap();
        let batch = rx.recv().await.unwrap().unwrap();

        let ids: Vec<&str> = batch.iter().map(|c| c.document.id.as_str()).collect();
        assert_eq!(ids, vec!["port1", "port2"]);
        assert!(batch.iter().all(|c| c.kind == ChangeKind::Added));
        assert_eq!(store.subscribe_count(&path("origin/o1/port")), 1);
    }

    #[tokio::test]
    async fn test_modified_and_removed_changes() {
        let store = MemoryStore::new();
        let doc = path("origin/o1/runid/r1/test/ping");
        let mut rx = store.subscribe(&path("origin/o1/runid/r1/test"), None).await.unwrap();

        store.set(&doc, json!({"state": "start"}));
        store.set(&doc, json!({"state": "pass"}));
        // Same data again produces no batch
        store.set(&doc, json!({"state": "pass"}));
        store.delete(&doc);

        let kinds: Vec<ChangeKind> = [
            rx.recv().await.unwrap().unwrap(),
            rx.recv().await.unwrap().unwrap(),
            rx.recv().await.unwrap().unwrap(),
        ]
        .iter()
        .map(|batch| batch[0].kind)
        .collect();
        assert_eq!(kinds, vec![ChangeKind::Added, ChangeKind::Modified, ChangeKind::Removed]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_limited_window_admits_newer_documents() {
        let store = MemoryStore::new();
        let runs = path("origin/o1/port/port1/runid");
        for (id, ts) in [("r1", "01"), ("r2", "02")] {
            store.set(&runs.child(id), json!({"timestamp": ts}));
        }

        let order = OrderSpec::latest("timestamp", 2);
        let mut rx = store.subscribe(&runs, Some(&order)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap().len(), 2);

        store.set(&runs.child("r3"), json!({"timestamp": "03"}));
        let batch = rx.recv().await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].kind, ChangeKind::Added);
        assert_eq!(batch[0].document.id, "r3");
        assert_eq!(batch[1].kind, ChangeKind::Removed);
        assert_eq!(batch[1].document.id, "r1");
    }

    #[tokio::test]
    async fn test_failed_subscription_ends_stream() {
        let store = MemoryStore::new();
        let collection = path("origin/o1/port");
        let mut rx = store.subscribe(&collection, None).await.unwrap();

        store.fail_subscriptions(&collection, "quota exceeded");
        assert!(matches!(rx.recv().await, Some(Err(StoreError::Subscription(_)))));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_subscribe() {
        let store = MemoryStore::new();
        let collection = path("origin/o1/port");
        store.reject_subscriptions(&collection);
        assert!(store.subscribe(&collection, None).await.is_err());
        assert_eq!(store.subscribe_count(&collection), 1);
    }

    #[tokio::test]
    async fn test_get_and_query() {
        let store = MemoryStore::new();
        let runs = path("origin/o1/runid");
        store.set(&runs.child("a1"), json!({"port": 3, "updated": "2020-01-01"}));
        store.set(&runs.child("a2"), json!({"port": 5, "updated": "2020-01-03"}));
        store.set(&runs.child("a3"), json!({"port": 3, "updated": "2020-01-02"}));

        let found = store.get(&runs.child("a2")).await.unwrap().unwrap();
        assert_eq!(found.id, "a2");
        assert!(store.get(&runs.child("zz")).await.unwrap().is_none());

        let query = Query {
            equality: vec![("port".to_string(), json!(3))],
            order: Some(OrderSpec::latest("updated", 10)),
            ..Default::default()
        };
        let ids: Vec<String> = store
            .query(&runs, &query)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["a3", "a1"]);
    }
}
