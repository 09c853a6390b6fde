//! Request-scoped batch load coordinator
//!
//! Resolvers ask for entities by [`BatchKey`]; the loader collects those
//! requests and dispatches them together once every running resolver of the
//! current execution level has either finished or is itself waiting on the
//! loader. One dispatch issues one fetch per entity type with the
//! deduplicated key set, and every result (errors included) is cached for
//! the rest of the request.
//!
//! ```text
//!   resolver A ──load(Author, 1)──┐
//!   resolver B ──load(Author, 2)──┼──► pending ──dispatch──► fetch(Author, [1, 2])
//!   resolver C ──load(Author, 1)──┘                             │
//!        ▲                                                      │
//!        └────────────── completed cache ◄──────────────────────┘
//! ```

use super::fetcher::FetcherRegistry;
use super::key::BatchKey;
use crate::core::error::LoadError;
use futures::future::join_all;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, oneshot};

type LoadResult = Result<Value, LoadError>;

/// Identifies the resolver task a load belongs to
///
/// Several loads awaited concurrently by one resolver count as one blocked
/// task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Default)]
struct LoaderState {
    completed: HashMap<BatchKey, LoadResult>,
    /// Keys waiting for the next dispatch, by entity type, in request order
    pending: IndexMap<String, IndexSet<BatchKey>>,
    in_flight: HashSet<BatchKey>,
    waiters: HashMap<BatchKey, Vec<oneshot::Sender<LoadResult>>>,
    /// Number of outstanding waits per task
    blocked: HashMap<TaskId, usize>,
    fetch_calls: usize,
    cancelled: bool,
}

/// A load that is either already answered or waiting for a dispatch
pub enum PendingLoad {
    Ready(LoadResult),
    Waiting(oneshot::Receiver<LoadResult>),
}

impl PendingLoad {
    pub fn is_ready(&self) -> bool {
        matches!(self, PendingLoad::Ready(_))
    }

    pub async fn wait(self) -> LoadResult {
        match self {
            PendingLoad::Ready(result) => result,
            // The sender is only dropped without a value when the request is
            // torn down
            PendingLoad::Waiting(rx) => rx.await.unwrap_or(Err(LoadError::Cancelled)),
        }
    }
}

/// Per-request batch load coordinator
pub struct BatchLoader {
    fetchers: Arc<FetcherRegistry>,
    max_batch_size: Option<usize>,
    state: Mutex<LoaderState>,
    notify: Notify,
}

impl BatchLoader {
    pub fn new(fetchers: Arc<FetcherRegistry>) -> Self {
        Self {
            fetchers,
            max_batch_size: None,
            state: Mutex::new(LoaderState::default()),
            notify: Notify::new(),
        }
    }

    /// Split the keys of one entity type into fetch calls of at most `size` keys
    pub fn with_max_batch_size(mut self, size: Option<usize>) -> Self {
        self.max_batch_size = size.filter(|size| *size > 0);
        self
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in a key without dispatching
    pub fn enqueue(&self, key: BatchKey) -> PendingLoad {
        let mut state = self.lock();
        if state.cancelled {
            return PendingLoad::Ready(Err(LoadError::Cancelled));
        }
        if let Some(result) = state.completed.get(&key) {
            return PendingLoad::Ready(result.clone());
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.entry(key.clone()).or_default().push(tx);
        if !state.in_flight.contains(&key) {
            state
                .pending
                .entry(key.entity_type().to_string())
                .or_default()
                .insert(key);
        }
        PendingLoad::Waiting(rx)
    }

    /// Load one key on behalf of a resolver task
    ///
    /// Does not dispatch: the executor driving the task decides when the
    /// level is ready (see [`should_dispatch`](Self::should_dispatch)).
    pub async fn load_in(&self, task: TaskId, key: BatchKey) -> LoadResult {
        match self.enqueue(key) {
            PendingLoad::Ready(result) => result,
            pending => {
                let _blocked = self.block(task);
                pending.wait().await
            }
        }
    }

    /// Load several keys on behalf of a resolver task, preserving order
    pub async fn load_many_in(&self, task: TaskId, keys: Vec<BatchKey>) -> Result<Vec<Value>, LoadError> {
        let pending: Vec<PendingLoad> = keys.into_iter().map(|key| self.enqueue(key)).collect();
        let _blocked = (!pending.iter().all(PendingLoad::is_ready)).then(|| self.block(task));

        let mut values = Vec::with_capacity(pending.len());
        for load in pending {
            values.push(load.wait().await?);
        }
        Ok(values)
    }

    /// Load one key outside of an executor, dispatching right away
    pub async fn load(&self, key: BatchKey) -> LoadResult {
        match self.enqueue(key) {
            PendingLoad::Ready(result) => result,
            pending => {
                self.dispatch().await;
                pending.wait().await
            }
        }
    }

    /// Load several keys outside of an executor with a single dispatch
    pub async fn load_many(&self, keys: Vec<BatchKey>) -> Vec<LoadResult> {
        let pending: Vec<PendingLoad> = keys.into_iter().map(|key| self.enqueue(key)).collect();
        if !pending.iter().all(PendingLoad::is_ready) {
            self.dispatch().await;
        }
        let mut results = Vec::with_capacity(pending.len());
        for load in pending {
            results.push(load.wait().await);
        }
        results
    }

    fn block(&self, task: TaskId) -> BlockedGuard<'_> {
        *self.lock().blocked.entry(task).or_insert(0) += 1;
        self.notify.notify_one();
        BlockedGuard { loader: self, task }
    }

    /// Resolves when a task starts waiting on the loader
    pub async fn blocked_changed(&self) {
        self.notify.notified().await;
    }

    /// Whether keys are pending and all `running` tasks are waiting on them
    pub fn should_dispatch(&self, running: usize) -> bool {
        let state = self.lock();
        !state.pending.is_empty() && state.blocked.len() >= running
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    /// Fetch every pending key: one call per entity type (or per chunk of
    /// `max_batch_size` keys), all calls running concurrently
    pub async fn dispatch(&self) {
        let batches: Vec<(String, Vec<BatchKey>)> = {
            let mut state = self.lock();
            let pending = std::mem::take(&mut state.pending);
            let mut batches = Vec::new();
            for (entity_type, keys) in pending {
                let keys: Vec<BatchKey> = keys.into_iter().collect();
                state.in_flight.extend(keys.iter().cloned());
                let chunk_size = self.max_batch_size.unwrap_or(keys.len()).max(1);
                for chunk in keys.chunks(chunk_size) {
                    batches.push((entity_type.clone(), chunk.to_vec()));
                }
            }
            state.fetch_calls += batches.len();
            batches
        };
        if batches.is_empty() {
            return;
        }

        tracing::debug!(batches = batches.len(), "dispatching batch loads");

        let outcomes = join_all(
            batches
                .into_iter()
                .map(|(entity_type, keys)| self.fetch_batch(entity_type, keys)),
        )
        .await;

        let mut state = self.lock();
        if state.cancelled {
            return;
        }
        for (key, result) in outcomes.into_iter().flatten() {
            state.in_flight.remove(&key);
            for waiter in state.waiters.remove(&key).unwrap_or_default() {
                // A dropped receiver means its resolver was abandoned
                let _ = waiter.send(result.clone());
            }
            state.completed.insert(key, result);
        }
    }

    async fn fetch_batch(&self, entity_type: String, keys: Vec<BatchKey>) -> Vec<(BatchKey, LoadResult)> {
        let Some(fetcher) = self.fetchers.get(&entity_type) else {
            tracing::warn!(entity_type = %entity_type, "no batch fetcher registered");
            let err = LoadError::NoFetcher { entity_type };
            return keys.into_iter().map(|key| (key, Err(err.clone()))).collect();
        };

        let values: Vec<Value> = keys.iter().map(|key| key.key().clone()).collect();
        match fetcher.fetch(&entity_type, &values).await {
            Ok(mut results) => keys
                .into_iter()
                .map(|key| {
                    let result = match results.take_fingerprint(key.fingerprint()) {
                        Some(Ok(value)) => Ok(value),
                        Some(Err(message)) => Err(LoadError::Key {
                            entity_type: entity_type.clone(),
                            key: key.fingerprint().to_string(),
                            message,
                        }),
                        None => Ok(Value::Null),
                    };
                    (key, result)
                })
                .collect(),
            Err(e) => {
                tracing::warn!(
                    entity_type = %entity_type,
                    keys = keys.len(),
                    error = %e,
                    "batch fetch failed"
                );
                let err = LoadError::Fetch {
                    entity_type,
                    message: e.to_string(),
                };
                keys.into_iter().map(|key| (key, Err(err.clone()))).collect()
            }
        }
    }

    /// Fail every outstanding waiter with [`LoadError::Cancelled`]
    ///
    /// Later loads fail immediately.
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.cancelled = true;
        state.pending.clear();
        state.in_flight.clear();
        for (_, waiters) in state.waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(LoadError::Cancelled));
            }
        }
    }

    /// Number of fetch calls issued so far
    pub fn fetch_calls(&self) -> usize {
        self.lock().fetch_calls
    }

    /// Number of distinct keys with a cached result
    pub fn cached_keys(&self) -> usize {
        self.lock().completed.len()
    }
}

impl std::fmt::Debug for BatchLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("BatchLoader")
            .field("max_batch_size", &self.max_batch_size)
            .field("pending", &state.pending.values().map(IndexSet::len).sum::<usize>())
            .field("cached", &state.completed.len())
            .field("fetch_calls", &state.fetch_calls)
            .finish()
    }
}

struct BlockedGuard<'a> {
    loader: &'a BatchLoader,
    task: TaskId,
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.loader.lock();
        if let Some(count) = state.blocked.get_mut(&self.task) {
            *count -= 1;
            if *count == 0 {
                state.blocked.remove(&self.task);
            }
        }
    }
}
