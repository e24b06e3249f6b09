//! The fetch orchestrator.
//!
//! Decides per fetch whether to answer from the cache, the network, or
//! both, and reconciles overlapping requests for the same operation id:
//! every network attempt takes a number from one shared sequence, and a
//! result is applied only while its number is the newest issued for the id.

use std::sync::Arc;

use futures::future::{AbortHandle, Abortable};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use gql_types::{merge_variables, Document, ExecutionResult, GraphQLError, OperationKind, Variables};

use crate::cache::{CacheDiff, CacheWatch, CacheWrite, DiffOptions, WatchCancel};
use crate::dedup::OperationStream;
use crate::error::ClientError;
use crate::local_state::ResolverRequest;
use crate::manager::QueryManager;
use crate::options::{ErrorPolicy, FetchPolicy, FetchType, QueryOptions};
use crate::store::{InitQuery, NetworkStatus, QueryResult};

/// How a network request failed.
enum RequestFailure {
    /// The link or a local resolver failed; nothing has been recorded yet.
    Link(ClientError),
    /// Already reflected in the store, or raised by a teardown.
    Settled(ClientError),
}

/// One network attempt for an operation.
struct FetchRequest {
    request_id: u64,
    query_id: String,
    document: Document,
    /// Variables already merged with defaults and exports.
    options: QueryOptions,
    fetch_more_for_id: Option<String>,
}

#[derive(Default)]
struct RequestOutcome {
    data: Option<Value>,
    errors: Vec<GraphQLError>,
}

impl QueryManager {
    /// Run a one-shot query and forget it afterwards.
    pub async fn query(&self, options: QueryOptions) -> Result<QueryResult, ClientError> {
        if options.document.kind != OperationKind::Query {
            return Err(ClientError::invalid(format!(
                "query() expects a query document, got a {}",
                options.document.kind
            )));
        }
        if options.poll_interval.is_some() {
            return Err(ClientError::invalid(
                "poll_interval is only supported on watched queries",
            ));
        }
        if options.return_partial_data {
            return Err(ClientError::invalid(
                "return_partial_data is only supported on watched queries",
            ));
        }
        if options.fetch_policy == FetchPolicy::CacheAndNetwork {
            return Err(ClientError::invalid(
                "cache-and-network yields two results; use watch_query instead",
            ));
        }

        let query_id = self.generate_query_id();
        let key = format!("query:{}", query_id);
        let (token, mut rejected) = self.inner.rejections.register(key.clone());

        let outcome = tokio::select! {
            biased;
            Ok(error) = &mut rejected => Err(error),
            result = self.fetch_query(&query_id, options, FetchType::Normal, None) => result,
        };

        self.inner.rejections.release(&key, token);
        self.stop_query(&query_id);
        outcome
    }

    /// Fetch `options` for operation `query_id`.
    ///
    /// Resolves with the network result, except under `cache-and-network`
    /// (and whenever no network request is made), where it resolves with
    /// the cached data at once. In that case network failures are recorded
    /// for listeners but not returned.
    pub async fn fetch_query(
        &self,
        query_id: &str,
        options: QueryOptions,
        fetch_type: FetchType,
        fetch_more_for_id: Option<&str>,
    ) -> Result<QueryResult, ClientError> {
        let entry = self.transform(&options.document);
        let document = entry.document.clone();
        let mut variables = merge_variables(&entry.default_variables, &options.variables);
        if entry.has_client_exports {
            variables = self
                .inner
                .local_state
                .add_exported_variables(&document, variables, &options.context)
                .await?;
        }
        let options = QueryOptions {
            document: document.clone(),
            variables: variables.clone(),
            ..options
        };
        let fetch_policy = options.fetch_policy;

        let mut store_result = None;
        let need_to_fetch = match fetch_policy {
            FetchPolicy::Standby => false,
            policy if policy.is_network_only() => true,
            _ => {
                let diff = self
                    .inner
                    .cache
                    .diff(&DiffOptions::new(&document, &variables));
                store_result = diff.result;
                !diff.complete || fetch_policy == FetchPolicy::CacheAndNetwork
            }
        };
        let should_fetch = document.has_directive("live")
            || (need_to_fetch && fetch_policy != FetchPolicy::CacheOnly);

        let request_id = self.next_request_id();
        let watch = if fetch_policy != FetchPolicy::NoCache {
            Some(self.update_query_watch(query_id, &document, &variables))
        } else {
            None
        };

        let (previous_cancel, init) = {
            let mut registry = self.inner.registry.lock();
            let previous_cancel = registry.update(query_id, |record| {
                record.document = Some(document.clone());
                record.last_request_id = request_id;
                record.dirty = true;
                match watch {
                    Some((cancel, initial)) => {
                        record.last_diff = Some(initial);
                        record.cancel.replace(cancel)
                    }
                    None => record.cancel.take(),
                }
            });
            if let Some(target) = fetch_more_for_id {
                registry.mark_dirty(target);
            }
            let init = registry.init_query(
                query_id,
                InitQuery {
                    document: document.clone(),
                    variables: variables.clone(),
                    store_previous_variables: should_fetch,
                    is_poll: fetch_type == FetchType::Poll,
                    is_refetch: fetch_type == FetchType::Refetch,
                    fetch_more_for_id: fetch_more_for_id.map(String::from),
                },
            );
            (previous_cancel, init)
        };
        if let Some(cancel) = previous_cancel {
            cancel.cancel();
        }
        init?;
        self.broadcast_queries();

        let request = should_fetch.then(|| FetchRequest {
            request_id,
            query_id: query_id.to_string(),
            document: document.clone(),
            options: options.clone(),
            fetch_more_for_id: fetch_more_for_id.map(String::from),
        });
        let background = match request {
            Some(request) if fetch_policy != FetchPolicy::CacheAndNetwork => {
                return self.run_network_fetch(request).await;
            }
            request => request,
        };

        // Settle the client-side status before a background refresh can
        // record its own outcome.
        {
            let mut registry = self.inner.registry.lock();
            registry.mark_query_result_client(query_id, !should_fetch);
            registry.mark_dirty(query_id);
            if let Some(target) = fetch_more_for_id {
                registry.mark_dirty(target);
            }
        }

        if let Some(request) = background {
            let manager = self.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.run_network_fetch(request).await {
                    debug!(error = %e, "cache-and-network refresh failed");
                }
            });
        }

        if entry.has_forced_resolvers {
            let result = self
                .inner
                .local_state
                .run_resolvers(ResolverRequest {
                    document: document.clone(),
                    remote_result: ExecutionResult {
                        data: store_result,
                        ..Default::default()
                    },
                    context: options.context.clone(),
                    variables: variables.clone(),
                    only_forced: true,
                })
                .await?;
            self.write_query_result(query_id, &document, &result, &options, fetch_more_for_id);
            self.broadcast_queries();
            return Ok(self.local_result(query_id, result.data));
        }

        self.broadcast_queries();
        Ok(self.local_result(query_id, store_result))
    }

    /// A result that did not come from the network, tagged with the current status.
    fn local_result(&self, query_id: &str, data: Option<Value>) -> QueryResult {
        let status = self
            .inner
            .registry
            .lock()
            .store_value(query_id)
            .map(|store| store.network_status)
            .unwrap_or(NetworkStatus::Ready);
        QueryResult {
            data,
            errors: Vec::new(),
            loading: status.is_in_flight(),
            network_status: status,
            stale: false,
        }
    }

    /// Replace the operation's cache watch. Returns the new watch and the
    /// diff it starts from.
    fn update_query_watch(
        &self,
        query_id: &str,
        document: &Document,
        variables: &Variables,
    ) -> (WatchCancel, CacheDiff) {
        let cache = &self.inner.cache;
        let initial = cache.diff(&DiffOptions::new(document, variables).optimistic(true));

        let manager = self.downgrade();
        let id = query_id.to_string();
        let cancel = cache.watch(CacheWatch {
            document: document.clone(),
            variables: variables.clone(),
            optimistic: true,
            callback: Arc::new(move |diff: CacheDiff| {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                let mut registry = manager.inner.registry.lock();
                if registry.contains(&id) {
                    registry.update(&id, |record| record.last_diff = Some(diff));
                }
            }),
        });
        (cancel, initial)
    }

    /// Store a result for `query_id`: in the cache, or on the record under `no-cache`.
    fn write_query_result(
        &self,
        query_id: &str,
        document: &Document,
        result: &ExecutionResult,
        options: &QueryOptions,
        fetch_more_for_id: Option<&str>,
    ) {
        if options.fetch_policy == FetchPolicy::NoCache {
            let diff = CacheDiff {
                result: result.data.clone(),
                complete: true,
            };
            self.inner
                .registry
                .lock()
                .update(query_id, |record| record.last_diff = Some(diff));
            return;
        }

        let ignore_errors = matches!(options.error_policy, ErrorPolicy::Ignore | ErrorPolicy::All);
        let writable = !result.has_errors() || (ignore_errors && result.data.is_some());
        if fetch_more_for_id.is_some() || !writable {
            return;
        }
        if let Some(data) = &result.data {
            self.inner.cache.write(CacheWrite {
                result: data.clone(),
                data_id: document.kind.root_id().to_string(),
                document: document.clone(),
                variables: options.variables.clone(),
            });
        }
    }

    async fn run_network_fetch(&self, request: FetchRequest) -> Result<QueryResult, ClientError> {
        let query_id = request.query_id.clone();
        let request_id = request.request_id;
        let fetch_more_for_id = request.fetch_more_for_id.clone();

        match self.fetch_request(request).await {
            Ok(result) => Ok(result),
            Err(RequestFailure::Settled(error)) => Err(error),
            Err(RequestFailure::Link(error)) => {
                let current = {
                    let mut registry = self.inner.registry.lock();
                    let current = registry.is_current(&query_id, request_id);
                    if current {
                        registry.mark_query_error(
                            &query_id,
                            error.clone(),
                            fetch_more_for_id.as_deref(),
                        );
                        registry.mark_dirty(&query_id);
                        if let Some(target) = &fetch_more_for_id {
                            registry.mark_dirty(target);
                        }
                    }
                    current
                };
                if current {
                    self.broadcast_queries();
                }
                Err(error)
            }
        }
    }

    async fn fetch_request(&self, request: FetchRequest) -> Result<QueryResult, RequestFailure> {
        let (abort, registration) = AbortHandle::new_pair();
        let Some(subscription) = self
            .inner
            .registry
            .lock()
            .add_subscription(&request.query_id, abort)
        else {
            return Err(RequestFailure::Settled(ClientError::Stopped {
                id: request.query_id.clone(),
            }));
        };

        let key = format!("fetchRequest:{}", request.query_id);
        let (token, rejected) = self.inner.rejections.register(key.clone());
        let stream = self.obtain(
            &request.document,
            &request.options.context,
            &request.options.variables,
            self.inner.config.query_deduplication,
        );

        let outcome =
            Abortable::new(self.consume_request(&request, stream, rejected), registration).await;

        self.inner.rejections.release(&key, token);
        self.inner
            .registry
            .lock()
            .remove_subscription(&request.query_id, subscription);

        match outcome {
            Ok(result) => result,
            Err(_aborted) => Err(RequestFailure::Settled(ClientError::Stopped {
                id: request.query_id.clone(),
            })),
        }
    }

    async fn consume_request(
        &self,
        request: &FetchRequest,
        mut stream: OperationStream,
        mut rejected: oneshot::Receiver<ClientError>,
    ) -> Result<QueryResult, RequestFailure> {
        let mut outcome = RequestOutcome::default();
        let mut rejection_open = true;
        loop {
            tokio::select! {
                biased;
                rejection = &mut rejected, if rejection_open => match rejection {
                    Ok(error) => return Err(RequestFailure::Settled(error)),
                    // Superseded registration; the request keeps running.
                    Err(_) => rejection_open = false,
                },
                item = stream.next() => match item {
                    Some(Ok(result)) => self
                        .on_request_result(request, result, &mut outcome)
                        .map_err(RequestFailure::Settled)?,
                    Some(Err(error)) => return Err(RequestFailure::Link(error)),
                    None => {
                        return Ok(QueryResult {
                            data: outcome.data,
                            errors: outcome.errors,
                            loading: false,
                            network_status: NetworkStatus::Ready,
                            stale: false,
                        })
                    }
                },
            }
        }
    }

    fn on_request_result(
        &self,
        request: &FetchRequest,
        result: ExecutionResult,
        outcome: &mut RequestOutcome,
    ) -> Result<(), ClientError> {
        let query_id = request.query_id.as_str();
        let fetch_more_for_id = request.fetch_more_for_id.as_deref();
        let options = &request.options;

        let current = self
            .inner
            .registry
            .lock()
            .is_current(query_id, request.request_id);
        if current {
            self.write_query_result(query_id, &request.document, &result, options, fetch_more_for_id);
            {
                let mut registry = self.inner.registry.lock();
                registry.mark_query_result(query_id, &result, fetch_more_for_id);
                registry.mark_dirty(query_id);
                if let Some(target) = fetch_more_for_id {
                    registry.mark_dirty(target);
                }
            }
            self.broadcast_queries();
        } else {
            debug!(
                query_id,
                request_id = request.request_id,
                "discarding result of superseded request"
            );
        }

        if options.error_policy == ErrorPolicy::None && result.has_errors() {
            return Err(ClientError::GraphQL(result.errors));
        }
        if options.error_policy == ErrorPolicy::All {
            outcome.errors = result.errors.clone();
        }

        if fetch_more_for_id.is_some() || options.fetch_policy == FetchPolicy::NoCache {
            outcome.data = result.data;
        } else {
            let diff = self
                .inner
                .cache
                .diff(&DiffOptions::new(&request.document, &options.variables));
            if diff.complete || options.return_partial_data {
                outcome.data = diff.result;
            }
        }
        Ok(())
    }
}
