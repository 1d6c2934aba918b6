//! Invalidation-tracked live queries.
//!
//! A [`LiveQuery`] runs its query once when created and again every time a
//! committed transaction writes one of the tables it depends on. Results are
//! pushed through a bounded channel and surfaced as a [`Stream`].
//!
//! Invalidations that arrive while a re-evaluation is already pending are
//! coalesced: the evaluator sees one wakeup and re-reads the latest state.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use crate::error::DbResult;
use crate::schema::{Table, TableSet};
use crate::MentraDb;

/// Identifier of a registered subscription.
pub type SubscriptionId = u64;

/// Lifecycle of a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Registered, first result not yet produced
    Created,
    /// Latest result delivered, waiting for invalidation
    Active,
    /// A dependency was written and the query is running again
    Reevaluating,
    /// Detached from every table; no further results
    Cancelled,
}

impl SubscriptionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Active,
            2 => Self::Reevaluating,
            _ => Self::Cancelled,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn set(&self, state: SubscriptionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.0.load(Ordering::Acquire))
    }
}

#[derive(Debug, Default)]
struct Registry {
    by_table: HashMap<Table, HashSet<SubscriptionId>>,
    signals: HashMap<SubscriptionId, (TableSet, Arc<Notify>)>,
}

/// Registry mapping each table to the subscriptions that read it.
#[derive(Debug, Default)]
pub struct InvalidationTracker {
    next_id: AtomicU64,
    registry: Mutex<Registry>,
}

impl InvalidationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `tables`. The returned signal fires once per
    /// invalidation pass touching any of them; pending signals coalesce.
    pub fn register(&self, tables: &[Table]) -> (SubscriptionId, Arc<Notify>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let signal = Arc::new(Notify::new());
        let tables: TableSet = tables.iter().copied().collect();

        let mut registry = self.registry.lock();
        for table in &tables {
            registry.by_table.entry(*table).or_default().insert(id);
        }
        registry.signals.insert(id, (tables, signal.clone()));
        trace!(id, "subscription registered");
        (id, signal)
    }

    /// Detach a subscription from every table. Unknown ids are ignored.
    pub fn unregister(&self, id: SubscriptionId) {
        let mut registry = self.registry.lock();
        let Some((tables, _)) = registry.signals.remove(&id) else {
            return;
        };
        for table in tables {
            if let Some(ids) = registry.by_table.get_mut(&table) {
                ids.remove(&id);
                if ids.is_empty() {
                    registry.by_table.remove(&table);
                }
            }
        }
        trace!(id, "subscription unregistered");
    }

    /// Signal every subscription whose table set intersects `written`.
    /// Returns how many were signalled.
    pub fn invalidate(&self, written: &TableSet) -> usize {
        let registry = self.registry.lock();
        let affected: HashSet<SubscriptionId> = written
            .iter()
            .filter_map(|table| registry.by_table.get(table))
            .flatten()
            .copied()
            .collect();
        for id in &affected {
            if let Some((_, signal)) = registry.signals.get(id) {
                signal.notify_one();
            }
        }
        debug!(tables = ?written, subscriptions = affected.len(), "invalidation pass");
        affected.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().signals.len()
    }

    /// Subscriptions currently depending on `table`.
    pub fn subscribers_of(&self, table: Table) -> usize {
        self.registry
            .lock()
            .by_table
            .get(&table)
            .map_or(0, HashSet::len)
    }
}

/// A query that re-runs whenever one of its tables is written.
///
/// Dropping the handle cancels it.
pub struct LiveQuery<T> {
    id: SubscriptionId,
    state: Arc<StateCell>,
    results: ReceiverStream<DbResult<T>>,
    task: JoinHandle<()>,
    tracker: Arc<InvalidationTracker>,
}

impl<T> LiveQuery<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn state(&self) -> SubscriptionState {
        self.state.get()
    }

    /// Detach from all tables and stop evaluating. Results already buffered
    /// can still be drained; nothing new arrives.
    pub fn cancel(&mut self) {
        if self.state.get() == SubscriptionState::Cancelled {
            return;
        }
        self.state.set(SubscriptionState::Cancelled);
        self.tracker.unregister(self.id);
        self.task.abort();
        self.results.close();
        debug!(id = self.id, "live query cancelled");
    }
}

impl<T> Stream for LiveQuery<T> {
    type Item = DbResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().results).poll_next(cx)
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T> std::fmt::Debug for LiveQuery<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl MentraDb {
    /// Start a live query over `tables`.
    ///
    /// `query` runs immediately and then once per invalidation pass that
    /// writes any of `tables`. Must be called from within a tokio runtime.
    ///
    /// ```rust,ignore
    /// let mut live = db.subscribe(&[Table::ShellAliases], |db| {
    ///     Box::pin(async move { db.shell_aliases().all().await })
    /// });
    /// let first = live.next().await;
    /// ```
    pub fn subscribe<T, F>(&self, tables: &[Table], query: F) -> LiveQuery<T>
    where
        T: Send + 'static,
        F: Fn(MentraDb) -> BoxFuture<'static, DbResult<T>> + Send + 'static,
    {
        let tracker = self.inner.tracker.clone();
        // Registered before the first evaluation so no commit in between is missed.
        let (id, signal) = tracker.register(tables);
        let state = Arc::new(StateCell(AtomicU8::new(SubscriptionState::Created as u8)));
        let (tx, rx) = mpsc::channel(self.inner.config.subscription_buffer);

        let db = self.clone();
        let task_state = state.clone();
        let task = tokio::spawn(async move {
            loop {
                let result = query(db.clone()).await;
                task_state.set(SubscriptionState::Active);
                if tx.send(result).await.is_err() {
                    debug!(id, "live query receiver gone, stopping evaluator");
                    break;
                }
                signal.notified().await;
                task_state.set(SubscriptionState::Reevaluating);
                trace!(id, "re-evaluating live query");
            }
        });

        debug!(id, ?tables, "live query started");
        LiveQuery {
            id,
            state,
            results: ReceiverStream::new(rx),
            task,
            tracker,
        }
    }

    /// Cancel a live query. Equivalent to dropping it.
    pub fn cancel<T>(&self, mut query: LiveQuery<T>) {
        query.cancel();
    }

    /// Number of live queries currently registered.
    pub fn live_query_count(&self) -> usize {
        self.inner.tracker.subscriber_count()
    }
}
