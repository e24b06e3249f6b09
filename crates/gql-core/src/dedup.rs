//! Transport deduplication and multiplexing.
//!
//! Identical in-flight operations (same server document, same variables)
//! share one link execution. The shared upstream is driven by a spawned
//! task that fans every item out to each attached subscriber; the pool
//! entry is dropped on the first event, so later requesters start a fresh
//! execution instead of joining a finished one.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use gql_transport::{Context, Link, Operation, ResultStream};
use gql_types::{stable_key, Document, DocumentId, ExecutionResult, Variables};

use crate::error::ClientError;
use crate::local_state::ResolverRequest;
use crate::manager::QueryManager;

pub type OperationStream = BoxStream<'static, Result<ExecutionResult, ClientError>>;

type Item = Result<ExecutionResult, ClientError>;
type InflightKey = (DocumentId, String);

/// One upstream execution with any number of downstream subscribers.
struct Multiplexed {
    subscribers: Mutex<Vec<UnboundedSender<Item>>>,
}

impl Multiplexed {
    fn subscribe(&self) -> OperationStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }

    /// Deliver `item` to every live subscriber; returns how many received it.
    fn fan_out(&self, item: Item) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(item.clone()).is_ok());
        subscribers.len()
    }

    fn close(&self) {
        self.subscribers.lock().clear();
    }
}

type Entries = Arc<Mutex<HashMap<InflightKey, Arc<Multiplexed>>>>;

/// Table of shared in-flight executions.
#[derive(Default)]
pub struct InflightPool {
    entries: Entries,
}

impl InflightPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of executions currently shared.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute `operation` on `link`, joining an identical in-flight
    /// execution when `dedupe` is set.
    pub fn execute(&self, link: &dyn Link, operation: Operation, dedupe: bool) -> OperationStream {
        if !dedupe {
            return link
                .execute(operation)
                .map(|item| item.map_err(ClientError::from))
                .boxed();
        }

        let key = (operation.document.id(), stable_key(&operation.variables));
        let mut entries = self.entries.lock();
        if let Some(shared) = entries.get(&key) {
            trace!(
                operation = operation.operation_name.as_deref().unwrap_or("<anonymous>"),
                "joining in-flight request"
            );
            return shared.subscribe();
        }

        trace!(
            operation = operation.operation_name.as_deref().unwrap_or("<anonymous>"),
            "starting shared request"
        );
        let shared = Arc::new(Multiplexed {
            subscribers: Mutex::new(Vec::new()),
        });
        let first = shared.subscribe();
        entries.insert(key.clone(), shared.clone());
        drop(entries);

        let upstream = link.execute(operation);
        tokio::spawn(drive(upstream, shared, self.entries.clone(), key));
        first
    }
}

/// Remove `key` only if it still points at `shared`.
fn release(entries: &Entries, key: &InflightKey, shared: &Arc<Multiplexed>) {
    let mut entries = entries.lock();
    if entries
        .get(key)
        .is_some_and(|current| Arc::ptr_eq(current, shared))
    {
        entries.remove(key);
    }
}

async fn drive(
    mut upstream: ResultStream,
    shared: Arc<Multiplexed>,
    entries: Entries,
    key: InflightKey,
) {
    let mut released = false;
    while let Some(item) = upstream.next().await {
        if !released {
            release(&entries, &key, &shared);
            released = true;
        }
        let listening = shared.fan_out(item.map_err(ClientError::from));
        if listening == 0 {
            break;
        }
    }
    if !released {
        release(&entries, &key, &shared);
    }
    shared.close();
}

impl QueryManager {
    /// Stream of results for `document`, after splitting off its client part.
    ///
    /// Documents without a server part never reach the link and yield a
    /// single empty result. Client parts are resolved locally on every item.
    pub(crate) fn obtain(
        &self,
        document: &Document,
        context: &Context,
        variables: &Variables,
        dedupe: bool,
    ) -> OperationStream {
        let inner = &self.inner;
        let entry = self.transform(document);

        let results: OperationStream = match &entry.server_query {
            Some(server) => {
                let mut context = context.clone();
                context.insert("forceFetch".to_string(), Value::Bool(!dedupe));
                let context = inner.local_state.prepare_context(context);
                let operation =
                    Operation::new(server.clone(), variables.clone()).with_context(context);
                inner.inflight.execute(inner.link.as_ref(), operation, dedupe)
            }
            None => stream::once(async { Ok(ExecutionResult::from_data(json!({}))) }).boxed(),
        };

        let Some(client_query) = entry.client_query.clone() else {
            return results;
        };
        let local_state = inner.local_state.clone();
        let context = context.clone();
        let variables = variables.clone();
        results
            .then(move |item| {
                let local_state = local_state.clone();
                let request = item.map(|remote_result| ResolverRequest {
                    document: client_query.clone(),
                    remote_result,
                    context: context.clone(),
                    variables: variables.clone(),
                    only_forced: false,
                });
                async move { local_state.run_resolvers(request?).await }
            })
            .boxed()
    }
}
