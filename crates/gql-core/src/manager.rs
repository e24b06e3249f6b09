//! The query manager: owner of all orchestration state.
//!
//! A [`QueryManager`] is a cheap, cloneable handle over shared state: the
//! operation registry, the transform cache, the in-flight pool, the
//! mutation tracker, poll timers and pending rejections. The operations
//! themselves are implemented across the sibling modules (`fetch`,
//! `mutation`, `subscription`, `poll`, `watch`, `broadcast`).
//!
//! Locks are held only for bookkeeping. No guard is held across an
//! `.await` or while a collaborator (cache, link, resolver, listener) runs.
//!
//! # Example
//!
//! ```ignore
//! let manager = QueryManager::builder()
//!     .link(Arc::new(HttpLink::from_env()))
//!     .config(ClientConfig::from_env())
//!     .build()?;
//! let result = manager.query(QueryOptions::new(doc)).await?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use gql_transport::Link;
use gql_types::Document;

use crate::cache::{Cache, InMemoryCache};
use crate::config::ClientConfig;
use crate::dedup::InflightPool;
use crate::error::ClientError;
use crate::local_state::{LocalResolver, NoLocalState};
use crate::mutation::{MutationRecord, MutationStore};
use crate::options::FetchPolicy;
use crate::poll::PollTimer;
use crate::registry::{ListenerId, QueryListener, QueryRegistry};
use crate::store::{QueryResult, StoreValue};
use crate::transform::{TransformCache, TransformEntry};

/// Runs before every broadcast.
pub type BroadcastHook = Arc<dyn Fn() + Send + Sync>;

/// Reject capabilities for futures awaiting the network, keyed by
/// `"query:<id>"` or `"fetchRequest:<id>"`.
#[derive(Default)]
pub(crate) struct PendingRejections {
    entries: Mutex<HashMap<String, (u64, oneshot::Sender<ClientError>)>>,
    next_token: AtomicU64,
}

impl PendingRejections {
    /// Register `key`, replacing any earlier registration under it.
    pub(crate) fn register(&self, key: String) -> (u64, oneshot::Receiver<ClientError>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(key, (token, tx));
        (token, rx)
    }

    /// Remove `key` if it is still the registration identified by `token`.
    pub(crate) fn release(&self, key: &str, token: u64) {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|(t, _)| *t == token) {
            entries.remove(key);
        }
    }

    pub(crate) fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Reject every registered future with `error`; returns how many there were.
    pub(crate) fn reject_all(&self, error: ClientError) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (_, (_, tx)) in drained {
            let _ = tx.send(error.clone());
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

pub(crate) struct ManagerInner {
    pub(crate) link: Arc<dyn Link>,
    pub(crate) cache: Arc<dyn Cache>,
    pub(crate) local_state: Arc<dyn LocalResolver>,
    pub(crate) config: ClientConfig,
    pub(crate) on_broadcast: Option<BroadcastHook>,
    pub(crate) registry: Mutex<QueryRegistry>,
    pub(crate) transforms: TransformCache,
    pub(crate) inflight: InflightPool,
    pub(crate) mutation_store: Mutex<MutationStore>,
    pub(crate) polls: Mutex<HashMap<String, PollTimer>>,
    pub(crate) rejections: PendingRejections,
    next_query_id: AtomicU64,
    next_request_id: AtomicU64,
}

#[derive(Clone)]
pub struct QueryManager {
    pub(crate) inner: Arc<ManagerInner>,
}

/// Non-owning handle, held by objects the manager itself may own.
#[derive(Clone)]
pub struct WeakQueryManager {
    inner: Weak<ManagerInner>,
}

impl WeakQueryManager {
    pub fn upgrade(&self) -> Option<QueryManager> {
        self.inner.upgrade().map(|inner| QueryManager { inner })
    }
}

#[derive(Default)]
pub struct QueryManagerBuilder {
    link: Option<Arc<dyn Link>>,
    cache: Option<Arc<dyn Cache>>,
    local_state: Option<Arc<dyn LocalResolver>>,
    config: ClientConfig,
    on_broadcast: Option<BroadcastHook>,
}

impl QueryManagerBuilder {
    pub fn link(mut self, link: Arc<dyn Link>) -> Self {
        self.link = Some(link);
        self
    }

    /// Defaults to an [`InMemoryCache`].
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Defaults to [`NoLocalState`].
    pub fn local_state(mut self, local_state: Arc<dyn LocalResolver>) -> Self {
        self.local_state = Some(local_state);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_broadcast(mut self, hook: BroadcastHook) -> Self {
        self.on_broadcast = Some(hook);
        self
    }

    pub fn build(self) -> Result<QueryManager, ClientError> {
        let link = self
            .link
            .ok_or_else(|| ClientError::invalid("a link is required to build a QueryManager"))?;
        Ok(QueryManager {
            inner: Arc::new(ManagerInner {
                link,
                cache: self.cache.unwrap_or_else(|| Arc::new(InMemoryCache::new())),
                local_state: self.local_state.unwrap_or_else(|| Arc::new(NoLocalState)),
                config: self.config,
                on_broadcast: self.on_broadcast,
                registry: Mutex::new(QueryRegistry::new()),
                transforms: TransformCache::new(),
                inflight: InflightPool::new(),
                mutation_store: Mutex::new(MutationStore::default()),
                polls: Mutex::new(HashMap::new()),
                rejections: PendingRejections::default(),
                next_query_id: AtomicU64::new(1),
                next_request_id: AtomicU64::new(1),
            }),
        })
    }
}

impl QueryManager {
    pub fn builder() -> QueryManagerBuilder {
        QueryManagerBuilder::default()
    }

    pub fn downgrade(&self) -> WeakQueryManager {
        WeakQueryManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn cache(&self) -> Arc<dyn Cache> {
        self.inner.cache.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn generate_query_id(&self) -> String {
        self.inner
            .next_query_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string()
    }

    /// Next value of the request sequence shared by all operations.
    pub(crate) fn next_request_id(&self) -> u64 {
        self.inner.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn transform(&self, document: &Document) -> Arc<TransformEntry> {
        self.inner.transforms.transform(
            document,
            self.inner.cache.as_ref(),
            self.inner.local_state.as_ref(),
        )
    }

    // ==================== Listeners ====================

    pub fn add_query_listener(&self, query_id: &str, listener: QueryListener) -> ListenerId {
        self.inner.registry.lock().add_listener(query_id, listener)
    }

    pub fn remove_query_listener(&self, query_id: &str, listener_id: ListenerId) {
        self.inner
            .registry
            .lock()
            .remove_listener(query_id, listener_id);
    }

    // ==================== Diagnostics ====================

    /// Every tracked store value, keyed by operation id.
    pub fn query_store_snapshot(&self) -> BTreeMap<String, StoreValue> {
        self.inner.registry.lock().store_snapshot()
    }

    pub fn query_store_value(&self, query_id: &str) -> Option<StoreValue> {
        self.inner.registry.lock().store_value(query_id)
    }

    pub fn mutation_store_snapshot(&self) -> BTreeMap<String, MutationRecord> {
        self.inner.mutation_store.lock().snapshot()
    }

    /// Number of operations with a registry record.
    pub fn operation_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn pending_rejections(&self) -> usize {
        self.inner.rejections.len()
    }

    /// Number of documents with a memoized transform.
    pub fn transform_count(&self) -> usize {
        self.inner.transforms.len()
    }

    // ==================== Teardown ====================

    /// Stop an operation and forget it. Unknown ids are ignored.
    pub fn stop_query(&self, query_id: &str) {
        self.stop_query_no_broadcast(query_id);
        self.broadcast_queries();
    }

    pub(crate) fn stop_query_no_broadcast(&self, query_id: &str) {
        self.stop_polling_query(query_id);
        let record = {
            let mut registry = self.inner.registry.lock();
            registry.stop_query_store(query_id);
            registry.remove(query_id)
        };
        self.inner.rejections.delete(&format!("query:{}", query_id));
        self.inner
            .rejections
            .delete(&format!("fetchRequest:{}", query_id));

        if let Some(record) = record {
            if let Some(cancel) = record.cancel {
                cancel.cancel();
            }
            for (_, abort) in record.subscriptions {
                abort.abort();
            }
        }
    }

    /// Stop every operation. Futures still awaiting the network fail with
    /// [`ClientError::Shutdown`].
    pub fn stop(&self) {
        let rejected = self.inner.rejections.reject_all(ClientError::Shutdown);
        debug!(rejected, "query manager stopping");
        let ids = self.inner.registry.lock().ids();
        for id in ids {
            self.stop_query_no_broadcast(&id);
        }
        self.inner.mutation_store.lock().reset();
    }

    /// Fail in-flight futures with [`ClientError::StoreReset`], reset store
    /// values, the mutation tracker and the cache. Watched queries survive in
    /// the `loading` state.
    pub async fn clear_store(&self) {
        let rejected = self.inner.rejections.reject_all(ClientError::StoreReset);
        debug!(rejected, "store reset rejected pending requests");
        self.inner.registry.lock().reset_store();
        self.inner.mutation_store.lock().reset();
        self.inner.cache.reset().await;
    }

    /// [`clear_store`](Self::clear_store), then refetch every active watched query.
    pub async fn reset_store(&self) -> Vec<Result<QueryResult, ClientError>> {
        self.clear_store().await;
        self.refetch_observable_queries(false).await
    }

    /// Refetch every watched query except `cache-only` ones (and `standby`
    /// ones unless `include_standby`).
    pub async fn refetch_observable_queries(
        &self,
        include_standby: bool,
    ) -> Vec<Result<QueryResult, ClientError>> {
        let handles = self.inner.registry.lock().handles();
        let mut refetches = Vec::new();
        for (id, handle) in handles {
            let policy = handle.options().fetch_policy;
            handle.reset_last_results();
            if policy != FetchPolicy::CacheOnly
                && (include_standby || policy != FetchPolicy::Standby)
            {
                refetches.push(async move { handle.refetch().await });
            }
            let mut registry = self.inner.registry.lock();
            registry.update(&id, |record| record.last_diff = None);
            registry.mark_dirty(&id);
        }
        self.broadcast_queries();
        join_all(refetches).await
    }
}
