//! Watched queries.
//!
//! [`QueryManager::watch_query`] registers a [`WatchedQuery`] handle and
//! returns it together with a [`QuerySubscription`] stream. The handle's
//! listener turns each broadcast `(StoreValue, diff)` pair into a
//! [`QueryResult`], dropping deliveries equal to the previous one.
//! Dropping the subscription tears the query down.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context as TaskContext, Poll};

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use gql_types::{merge_variables, Document, OperationKind, Variables};

use crate::cache::{CacheDiff, CacheWrite, DiffOptions};
use crate::error::ClientError;
use crate::manager::{QueryManager, WeakQueryManager};
use crate::options::{ErrorPolicy, FetchPolicy, FetchType, QueryOptions};
use crate::registry::QueryListener;
use crate::store::{NetworkStatus, QueryResult, StoreValue};

/// A caller-visible query handle, as seen by the core.
///
/// Mutations use it to find queries by name (for updaters and named
/// refetches); store resets use it to refetch everything still watched.
#[async_trait]
pub trait QueryHandle: Send + Sync {
    fn id(&self) -> String;

    /// Operation name of the watched document.
    fn name(&self) -> Option<String>;

    fn options(&self) -> QueryOptions;

    fn last_result(&self) -> Option<QueryResult>;

    fn last_error(&self) -> Option<ClientError>;

    fn reset_last_results(&self);

    async fn refetch(&self) -> Result<QueryResult, ClientError>;
}

/// Result of [`WatchedQuery::current_result`].
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentResult {
    pub result: QueryResult,
    /// The cache could not fully satisfy the query.
    pub partial: bool,
    pub error: Option<ClientError>,
}

/// Extra page requested by [`WatchedQuery::fetch_more`].
#[derive(Debug, Clone, Default)]
pub struct FetchMoreOptions {
    /// Fetch a different document; defaults to the watched one.
    pub document: Option<Document>,
    /// Merged over the watched query's variables.
    pub variables: Variables,
}

/// What the merge function of [`WatchedQuery::fetch_more`] receives.
#[derive(Debug, Clone)]
pub struct FetchMoreResult {
    pub data: Option<Value>,
    pub variables: Variables,
}

type Delivery = Result<QueryResult, ClientError>;

struct WatchState {
    options: QueryOptions,
    last_result: Option<QueryResult>,
    last_error: Option<ClientError>,
    /// Watch diff already turned into a delivery.
    consumed_diff: Option<CacheDiff>,
    torn_down: bool,
    sender: Option<UnboundedSender<Delivery>>,
}

/// Handle over one watched query.
pub struct WatchedQuery {
    id: String,
    name: Option<String>,
    manager: WeakQueryManager,
    state: Mutex<WatchState>,
}

impl WatchedQuery {
    fn manager(&self) -> Result<QueryManager, ClientError> {
        self.manager.upgrade().ok_or(ClientError::Shutdown)
    }

    pub fn variables(&self) -> Variables {
        self.state.lock().options.variables.clone()
    }

    /// Refetch from the network, optionally with new variables merged over
    /// the current ones.
    pub async fn refetch_with(
        &self,
        variables: Option<Variables>,
    ) -> Result<QueryResult, ClientError> {
        let options = {
            let mut state = self.state.lock();
            if state.options.fetch_policy == FetchPolicy::CacheOnly {
                return Err(ClientError::invalid(
                    "cache-only fetch policy cannot be used together with refetch",
                ));
            }
            if let Some(variables) = variables {
                state.options.variables = merge_variables(&state.options.variables, &variables);
            }
            let mut options = state.options.clone();
            if !matches!(
                options.fetch_policy,
                FetchPolicy::NoCache | FetchPolicy::CacheAndNetwork
            ) {
                options.fetch_policy = FetchPolicy::NetworkOnly;
            }
            options
        };
        self.manager()?
            .fetch_query(&self.id, options, FetchType::Refetch, None)
            .await
    }

    /// Switch to new variables and fetch for them.
    ///
    /// Without `try_fetch`, unchanged variables only return the current result.
    pub async fn set_variables(
        &self,
        variables: Variables,
        try_fetch: bool,
    ) -> Result<QueryResult, ClientError> {
        let (options, observed) = {
            let mut state = self.state.lock();
            state.torn_down = false;
            if !try_fetch && state.options.variables == variables {
                drop(state);
                return Ok(self.current_result().result);
            }
            state.options.variables = variables;
            (state.options.clone(), state.sender.is_some())
        };
        if !observed {
            return Ok(self.current_result().result);
        }

        let manager = self.manager()?;
        if manager.polling_interval(&self.id).is_some() {
            manager.start_polling_query(&options, &self.id, None)?;
        }
        manager
            .fetch_query(&self.id, options, FetchType::Normal, None)
            .await
    }

    /// Fetch another page under a temporary id and fold it into this
    /// query's cached result with `merge`.
    pub async fn fetch_more<F>(
        &self,
        more: FetchMoreOptions,
        merge: F,
    ) -> Result<QueryResult, ClientError>
    where
        F: FnOnce(Option<&Value>, &FetchMoreResult) -> Option<Value>,
    {
        let manager = self.manager()?;
        let base = self.options();
        let options = match more.document {
            Some(document) => QueryOptions::new(document).with_variables(more.variables),
            None => QueryOptions {
                variables: merge_variables(&base.variables, &more.variables),
                ..base
            },
        }
        .with_fetch_policy(FetchPolicy::NetworkOnly);
        let variables = options.variables.clone();

        let temporary_id = manager.generate_query_id();
        let outcome = manager
            .fetch_query(&temporary_id, options, FetchType::Normal, Some(&self.id))
            .await;
        if let Ok(result) = &outcome {
            let more = FetchMoreResult {
                data: result.data.clone(),
                variables,
            };
            self.update_query(|previous, _| merge(previous, &more));
        }
        manager.stop_query(&temporary_id);
        outcome
    }

    /// Rewrite this query's cached result and broadcast.
    ///
    /// `map` sees the current non-optimistic cached data (if any) and the
    /// query's variables; returning `None` leaves the cache untouched.
    pub fn update_query<F>(&self, map: F)
    where
        F: FnOnce(Option<&Value>, &Variables) -> Option<Value>,
    {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let options = self.options();
        let entry = manager.transform(&options.document);
        let variables = merge_variables(&entry.default_variables, &options.variables);
        let previous = manager
            .inner
            .cache
            .diff(&DiffOptions::new(&entry.document, &variables));

        if let Some(next) = map(previous.result.as_ref(), &variables) {
            manager.inner.cache.write(CacheWrite {
                result: next,
                data_id: OperationKind::Query.root_id().to_string(),
                document: entry.document.clone(),
                variables,
            });
            manager.broadcast_queries();
        }
    }

    pub fn start_polling(&self, interval: std::time::Duration) -> Result<(), ClientError> {
        let options = {
            let mut state = self.state.lock();
            check_pollable(state.options.fetch_policy)?;
            state.options.poll_interval = Some(interval);
            state.options.clone()
        };
        self.manager()?.start_polling_query(&options, &self.id, None)
    }

    pub fn stop_polling(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.stop_polling_query(&self.id);
        }
        self.state.lock().options.poll_interval = None;
    }

    /// Best current answer without waiting for the network.
    pub fn current_result(&self) -> CurrentResult {
        let manager = self.manager.upgrade();
        let (torn_down, last_result, last_error, options) = {
            let state = self.state.lock();
            (
                state.torn_down,
                state.last_result.clone(),
                state.last_error.clone(),
                state.options.clone(),
            )
        };

        let Some(manager) = manager.filter(|_| !torn_down) else {
            let data = match &last_error {
                None => last_result.and_then(|r| r.data),
                Some(_) => None,
            };
            return CurrentResult {
                result: QueryResult {
                    data,
                    network_status: NetworkStatus::Error,
                    ..Default::default()
                },
                partial: false,
                error: last_error,
            };
        };

        let (data, partial) = manager.get_current_query_result(self, true);
        let policy = options.fetch_policy;
        let result = match manager.query_store_value(&self.id) {
            Some(store) => {
                if let Some(error) = store_error(&store, options.error_policy) {
                    return CurrentResult {
                        result: QueryResult {
                            data: None,
                            loading: false,
                            network_status: store.network_status,
                            ..Default::default()
                        },
                        partial,
                        error: Some(error),
                    };
                }
                {
                    let mut state = self.state.lock();
                    state.options.variables =
                        merge_variables(&state.options.variables, &store.variables);
                }
                QueryResult {
                    data,
                    errors: if options.error_policy == ErrorPolicy::All {
                        store.graphql_errors.clone()
                    } else {
                        Vec::new()
                    },
                    loading: store.network_status.is_in_flight(),
                    network_status: store.network_status,
                    stale: false,
                }
            }
            None => {
                let loading =
                    policy.is_network_only() || (partial && policy != FetchPolicy::CacheOnly);
                QueryResult {
                    data,
                    loading,
                    network_status: if loading {
                        NetworkStatus::Loading
                    } else {
                        NetworkStatus::Ready
                    },
                    ..Default::default()
                }
            }
        };

        if !partial {
            self.state.lock().last_result = Some(result.clone());
        }
        CurrentResult {
            result,
            partial,
            error: None,
        }
    }

    /// Listener body: turn a broadcast into at most one delivery.
    fn observe(&self, store: &StoreValue, diff: Option<&CacheDiff>) {
        let (options, last_result, last_error, consumed) = {
            let state = self.state.lock();
            (
                state.options.clone(),
                state.last_result.clone(),
                state.last_error.clone(),
                state.consumed_diff.clone(),
            )
        };
        let policy = options.fetch_policy;
        if policy == FetchPolicy::Standby {
            return;
        }

        let status = store.network_status;
        let loading = status.is_in_flight();
        let new_data = diff.filter(|d| consumed.as_ref() != Some(*d));
        let status_changed = last_result
            .as_ref()
            .is_some_and(|r| r.network_status != status);
        let notify_if_loading = options.return_partial_data
            || (new_data.is_none() && store.previous_variables.is_some())
            || (status_changed && options.notify_on_network_status_change)
            || matches!(policy, FetchPolicy::CacheOnly | FetchPolicy::CacheAndNetwork);
        if loading && !notify_if_loading {
            return;
        }

        if let Some(error) = store_error(store, options.error_policy) {
            self.deliver(Err(error));
            return;
        }

        let (data, missing) = match new_data {
            Some(diff) => {
                if !policy.is_network_only() {
                    self.state.lock().consumed_diff = Some(diff.clone());
                }
                (diff.result.clone(), !diff.complete)
            }
            None => {
                let previous_errors = last_error
                    .as_ref()
                    .map(ClientError::graphql_errors)
                    .unwrap_or_default();
                let error_status_changed = options.error_policy != ErrorPolicy::None
                    && previous_errors != store.graphql_errors.as_slice();
                match last_result.as_ref().and_then(|r| r.data.clone()) {
                    Some(data) if !error_status_changed => (Some(data), false),
                    _ => {
                        let Some(manager) = self.manager.upgrade() else {
                            return;
                        };
                        let variables = store
                            .previous_variables
                            .as_ref()
                            .unwrap_or(&store.variables);
                        let diff = manager.inner.cache.diff(
                            &DiffOptions::new(&store.document, variables).optimistic(true),
                        );
                        (diff.result, !diff.complete)
                    }
                }
            }
        };

        let stale =
            missing && !(options.return_partial_data || policy == FetchPolicy::CacheOnly);
        let errors = if options.error_policy == ErrorPolicy::All {
            store.graphql_errors.clone()
        } else {
            Vec::new()
        };
        self.deliver(Ok(QueryResult {
            data: if stale {
                last_result.and_then(|r| r.data)
            } else {
                data
            },
            errors,
            loading,
            network_status: status,
            stale,
        }));
    }

    fn deliver(&self, item: Delivery) {
        let mut state = self.state.lock();
        match item {
            Ok(result) => {
                if state.last_error.is_none() && state.last_result.as_ref() == Some(&result) {
                    return;
                }
                state.last_error = None;
                state.last_result = Some(result.clone());
                if let Some(tx) = &state.sender {
                    let _ = tx.send(Ok(result));
                }
            }
            Err(error) => {
                let mut last = state.last_result.clone().unwrap_or_default();
                last.errors = error.graphql_errors().to_vec();
                last.network_status = NetworkStatus::Error;
                last.loading = false;
                state.last_result = Some(last);
                state.last_error = Some(error.clone());
                if let Some(tx) = &state.sender {
                    let _ = tx.send(Err(error));
                }
            }
        }
    }

    /// A failure returned by the initial fetch; listeners usually saw it first.
    fn on_fetch_error(&self, error: ClientError) {
        if matches!(error, ClientError::Stopped { .. }) {
            return;
        }
        if self.state.lock().last_error.as_ref() == Some(&error) {
            return;
        }
        self.deliver(Err(error));
    }

    fn tear_down(&self) {
        {
            let mut state = self.state.lock();
            state.torn_down = true;
            state.sender = None;
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.stop_query(&self.id);
        }
    }
}

#[async_trait]
impl QueryHandle for WatchedQuery {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn options(&self) -> QueryOptions {
        self.state.lock().options.clone()
    }

    fn last_result(&self) -> Option<QueryResult> {
        self.state.lock().last_result.clone()
    }

    fn last_error(&self) -> Option<ClientError> {
        self.state.lock().last_error.clone()
    }

    fn reset_last_results(&self) {
        let mut state = self.state.lock();
        state.last_result = None;
        state.last_error = None;
        state.consumed_diff = None;
        state.torn_down = false;
    }

    async fn refetch(&self) -> Result<QueryResult, ClientError> {
        self.refetch_with(None).await
    }
}

/// The error a store value reports under `policy`, if any.
fn store_error(store: &StoreValue, policy: ErrorPolicy) -> Option<ClientError> {
    if let Some(error) = &store.network_error {
        return Some(error.clone());
    }
    if policy == ErrorPolicy::None && !store.graphql_errors.is_empty() {
        return Some(ClientError::GraphQL(store.graphql_errors.clone()));
    }
    None
}

fn check_pollable(policy: FetchPolicy) -> Result<(), ClientError> {
    if matches!(policy, FetchPolicy::CacheFirst | FetchPolicy::CacheOnly) {
        return Err(ClientError::invalid(
            "queries that specify the cache-first and cache-only fetch policies cannot also be polling queries",
        ));
    }
    Ok(())
}

/// Results of a watched query. Dropping it stops the query.
pub struct QuerySubscription {
    handle: Arc<WatchedQuery>,
    results: UnboundedReceiverStream<Delivery>,
}

impl QuerySubscription {
    pub fn query_id(&self) -> &str {
        &self.handle.id
    }

    pub fn cancel(self) {}
}

impl Stream for QuerySubscription {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.results.poll_next_unpin(cx)
    }
}

impl Drop for QuerySubscription {
    fn drop(&mut self) {
        self.handle.tear_down();
    }
}

fn observer_listener(handle: Weak<WatchedQuery>) -> QueryListener {
    Arc::new(
        move |store: &StoreValue, diff: Option<&CacheDiff>| -> anyhow::Result<()> {
            if let Some(handle) = handle.upgrade() {
                handle.observe(store, diff);
            }
            Ok(())
        },
    )
}

impl QueryManager {
    /// Watch a query: fetch it now and keep delivering results as the
    /// cache and network status change.
    pub fn watch_query(
        &self,
        options: QueryOptions,
    ) -> Result<(Arc<WatchedQuery>, QuerySubscription), ClientError> {
        if options.document.kind != OperationKind::Query {
            return Err(ClientError::invalid(format!(
                "watch_query() expects a query document, got a {}",
                options.document.kind
            )));
        }
        if options.fetch_policy == FetchPolicy::Standby {
            return Err(ClientError::invalid(
                "watch_query cannot be called with the standby fetch policy",
            ));
        }
        if options.poll_interval.is_some() {
            check_pollable(options.fetch_policy)?;
        }

        let query_id = self.generate_query_id();
        let name = self
            .transform(&options.document)
            .document
            .operation_name()
            .map(String::from);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(WatchedQuery {
            id: query_id.clone(),
            name,
            manager: self.downgrade(),
            state: Mutex::new(WatchState {
                options: options.clone(),
                last_result: None,
                last_error: None,
                consumed_diff: None,
                torn_down: false,
                sender: Some(tx),
            }),
        });

        self.inner
            .registry
            .lock()
            .attach_handle(&query_id, handle.clone());
        if options.poll_interval.is_some() {
            if let Err(e) = self.start_polling_query(&options, &query_id, None) {
                self.stop_query(&query_id);
                return Err(e);
            }
        }
        self.add_query_listener(&query_id, observer_listener(Arc::downgrade(&handle)));

        let manager = self.clone();
        let fetching = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = manager
                .fetch_query(&fetching.id, options, FetchType::Normal, None)
                .await
            {
                debug!(query_id = %fetching.id, error = %e, "initial fetch of watched query failed");
                fetching.on_fetch_error(e);
            }
        });

        let subscription = QuerySubscription {
            handle: handle.clone(),
            results: UnboundedReceiverStream::new(rx),
        };
        Ok((handle, subscription))
    }

    /// What the cache (or the latest watch diff) can answer for `query`
    /// right now, and whether that answer is partial.
    pub fn get_current_query_result(
        &self,
        query: &WatchedQuery,
        optimistic: bool,
    ) -> (Option<Value>, bool) {
        let options = query.options();
        let latest = self.inner.registry.lock().get(&query.id).last_diff;
        if let Some(diff) = latest.filter(|d| d.complete) {
            return (diff.result, false);
        }
        if options.fetch_policy.is_network_only() {
            return (None, false);
        }

        let entry = self.transform(&options.document);
        let variables = merge_variables(&entry.default_variables, &options.variables);
        let diff = self
            .inner
            .cache
            .diff(&DiffOptions::new(&entry.document, &variables).optimistic(optimistic));
        let data = if diff.complete || options.return_partial_data {
            diff.result
        } else {
            None
        };
        (data, !diff.complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gql_transport::{MockLink, MockResponse, TransportError};
    use serde_json::json;

    fn todos() -> Document {
        Document::query("query Todos { todos }").name("Todos").build()
    }

    fn manager(link: &Arc<MockLink>) -> QueryManager {
        QueryManager::builder().link(link.clone()).build().unwrap()
    }

    #[tokio::test]
    async fn test_watch_delivers_network_result() {
        let link = Arc::new(MockLink::new());
        link.push("Todos", None, MockResponse::data(json!({"todos": [1]})));
        let manager = manager(&link);

        let (handle, mut results) = manager.watch_query(QueryOptions::new(todos())).unwrap();
        let first = results.next().await.unwrap().unwrap();
        assert_eq!(first.data, Some(json!({"todos": [1]})));
        assert_eq!(first.network_status, NetworkStatus::Ready);
        assert!(!first.stale);
        assert_eq!(handle.last_result(), Some(first));
        assert_eq!(handle.name().as_deref(), Some("Todos"));
    }

    #[tokio::test]
    async fn test_update_query_rewrites_cache_and_notifies() {
        let link = Arc::new(MockLink::new());
        link.push("Todos", None, MockResponse::data(json!({"todos": [1]})));
        let manager = manager(&link);

        let (handle, mut results) = manager.watch_query(QueryOptions::new(todos())).unwrap();
        results.next().await.unwrap().unwrap();

        handle.update_query(|previous, _| {
            crate::mutation::append_to_list(previous?, "todos", json!(2))
        });
        let next = results.next().await.unwrap().unwrap();
        assert_eq!(next.data, Some(json!({"todos": [1, 2]})));
    }

    #[tokio::test]
    async fn test_network_error_reaches_subscriber_once() {
        let link = Arc::new(MockLink::new());
        link.push(
            "Todos",
            None,
            MockResponse::error(TransportError::Request("boom".into())),
        );
        let manager = manager(&link);

        let (handle, mut results) = manager.watch_query(QueryOptions::new(todos())).unwrap();
        let err = results.next().await.unwrap().unwrap_err();
        assert!(err.network_error().is_some());
        assert_eq!(handle.last_error(), Some(err));
        assert_eq!(
            handle.last_result().unwrap().network_status,
            NetworkStatus::Error
        );

        // Nothing else is queued for the same failure.
        tokio::task::yield_now().await;
        drop(handle);
        results.cancel();
        assert_eq!(manager.operation_count(), 0);
    }

    #[tokio::test]
    async fn test_refetch_rejects_cache_only() {
        let link = Arc::new(MockLink::new());
        let manager = manager(&link);
        let options = QueryOptions::new(todos()).with_fetch_policy(FetchPolicy::CacheOnly);
        let (handle, _results) = manager.watch_query(options).unwrap();
        let err = handle.refetch().await.unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(link.call_count(), 0);
    }

    #[tokio::test]
    async fn test_watch_preconditions() {
        let link = Arc::new(MockLink::new());
        let manager = manager(&link);
        let standby = QueryOptions::new(todos()).with_fetch_policy(FetchPolicy::Standby);
        assert!(manager.watch_query(standby).is_err());

        let polled_cache_first =
            QueryOptions::new(todos()).with_poll_interval(std::time::Duration::from_secs(1));
        assert!(manager.watch_query(polled_cache_first).is_err());
        assert_eq!(manager.operation_count(), 0);
    }

    #[tokio::test]
    async fn test_current_result_reads_cache() {
        let link = Arc::new(MockLink::new());
        link.push("Todos", None, MockResponse::data(json!({"todos": []})));
        let manager = manager(&link);

        let (handle, mut results) = manager.watch_query(QueryOptions::new(todos())).unwrap();
        results.next().await.unwrap().unwrap();

        let current = handle.current_result();
        assert!(!current.partial);
        assert!(current.error.is_none());
        assert_eq!(current.result.data, Some(json!({"todos": []})));
        assert!(!current.result.loading);
    }
}
