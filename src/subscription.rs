//! Subscription tree manager
//!
//! Opens a cascade of live subscriptions down the store hierarchy. Each node
//! is one collection subscription running on its own task; `Added` children
//! of an intermediate level schedule the next level's subscription, staggered
//! by `n × stagger` within one change batch. Leaf documents (and documents
//! whose id is marked detached at their level) are published as
//! [`CascadeEvent`]s on a channel; the tree never touches the grid.
//!
//! The tree only grows: a collection path is opened at most once per tree and
//! nodes live until the store closes the stream. Failed subscriptions are
//! reported once and not retried.

use crate::store::{ChangeKind, Document, DocumentStore, OrderSpec, StoreError, StorePath};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

/// One hierarchy level below the cascade base
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    /// Child collection name (`port`, `runid`, `test`, ...)
    pub collection: String,
    pub order: Option<OrderSpec>,
    /// Ids forwarded as documents instead of descended into
    pub detached: HashSet<String>,
}

impl Level {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            order: None,
            detached: HashSet::new(),
        }
    }

    pub fn ordered(mut self, order: OrderSpec) -> Self {
        self.order = Some(order);
        self
    }

    pub fn detach(mut self, id: &str) -> Self {
        self.detached.insert(id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CascadeEvent {
    /// A forwarded document: a leaf, or a detached document of an
    /// intermediate level.
    Document {
        /// Base path the cascade was registered on
        base: StorePath,
        /// Ids descended through from the base, one per level above `level`
        ids: Vec<String>,
        /// Index of the level the document belongs to
        level: usize,
        kind: ChangeKind,
        document: Document,
    },
    /// The subscription on `path` failed; that branch produces nothing more
    Failed { path: StorePath, error: StoreError },
}

/// Where a node sits in its cascade
struct NodeContext {
    base: StorePath,
    levels: Arc<[Level]>,
    depth: usize,
    ids: Vec<String>,
    tx: mpsc::Sender<CascadeEvent>,
}

pub struct SubscriptionTree {
    store: Arc<dyn DocumentStore>,
    stagger: Duration,
    /// Collection paths already opened (or scheduled) by this tree
    registered: Mutex<HashSet<StorePath>>,
}

impl SubscriptionTree {
    pub fn new(store: Arc<dyn DocumentStore>, stagger: Duration) -> Arc<Self> {
        Arc::new(Self {
            store,
            stagger,
            registered: Mutex::new(HashSet::new()),
        })
    }

    pub fn stagger(&self) -> Duration {
        self.stagger
    }

    /// Start a cascade under `base`; events go to `tx`.
    ///
    /// Returns `false` when there are no levels or the first collection was
    /// already registered on this tree.
    pub fn register_cascade(
        self: &Arc<Self>,
        base: StorePath,
        levels: Vec<Level>,
        tx: mpsc::Sender<CascadeEvent>,
    ) -> bool {
        self.register_cascade_after(base, levels, tx, Duration::ZERO)
    }

    /// Same as [`register_cascade`](Self::register_cascade), opening the
    /// first subscription after `delay`
    pub fn register_cascade_after(
        self: &Arc<Self>,
        base: StorePath,
        levels: Vec<Level>,
        tx: mpsc::Sender<CascadeEvent>,
        delay: Duration,
    ) -> bool {
        let Some(first) = levels.first() else {
            log::warn!("⚠️  Empty cascade requested on {}", base);
            return false;
        };
        let collection = base.child(&first.collection);

        let context = NodeContext {
            base,
            levels: Arc::from(levels),
            depth: 0,
            ids: Vec::new(),
            tx,
        };
        self.spawn_node(collection, context, delay)
    }

    pub fn is_registered(&self, collection: &StorePath) -> bool {
        self.registered().contains(collection)
    }

    pub fn registered_count(&self) -> usize {
        self.registered().len()
    }

    fn registered(&self) -> MutexGuard<'_, HashSet<StorePath>> {
        self.registered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_node(self: &Arc<Self>, collection: StorePath, context: NodeContext, delay: Duration) -> bool {
        if !self.registered().insert(collection.clone()) {
            log::debug!("Already subscribed to {}", collection);
            return false;
        }

        let tree = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            tree.run_node(collection, context).await;
        });
        true
    }

    async fn run_node(self: Arc<Self>, collection: StorePath, context: NodeContext) {
        let level = &context.levels[context.depth];
        let is_leaf = context.depth + 1 == context.levels.len();

        let mut stream = match self.store.subscribe(&collection, level.order.as_ref()).await {
            Ok(stream) => stream,
            Err(error) => {
                report_failure(&context.tx, collection, error).await;
                return;
            }
        };
        log::debug!("📡 Subscribed to {}", collection);

        while let Some(batch) = stream.recv().await {
            let changes = match batch {
                Ok(changes) => changes,
                Err(error) => {
                    report_failure(&context.tx, collection, error).await;
                    return;
                }
            };

            let mut descended = 0u32;
            for change in changes {
                if is_leaf || level.detached.contains(&change.document.id) {
                    if change.kind == ChangeKind::Removed {
                        continue;
                    }
                    let event = CascadeEvent::Document {
                        base: context.base.clone(),
                        ids: context.ids.clone(),
                        level: context.depth,
                        kind: change.kind,
                        document: change.document,
                    };
                    if context.tx.send(event).await.is_err() {
                        log::debug!("Cascade consumer gone, closing {}", collection);
                        return;
                    }
                    continue;
                }

                if change.kind != ChangeKind::Added {
                    continue;
                }

                let next_level = &context.levels[context.depth + 1];
                let child = collection
                    .child(&change.document.id)
                    .child(&next_level.collection);
                let mut ids = context.ids.clone();
                ids.push(change.document.id);
                let next = NodeContext {
                    base: context.base.clone(),
                    levels: Arc::clone(&context.levels),
                    depth: context.depth + 1,
                    ids,
                    tx: context.tx.clone(),
                };

                let delay = self.stagger * (descended + 1);
                if self.spawn_node(child, next, delay) {
                    descended += 1;
                }
            }
        }

        log::debug!("Subscription on {} closed", collection);
    }
}

async fn report_failure(tx: &mpsc::Sender<CascadeEvent>, path: StorePath, error: StoreError) {
    log::error!("❌ Subscription on {} failed: {}", path, error);
    let _ = tx.send(CascadeEvent::Failed { path, error }).await;
}
