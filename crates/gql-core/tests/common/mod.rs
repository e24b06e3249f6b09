#![allow(dead_code, unused_imports)]
//! Shared test utilities for gql-core integration tests.
//!
//! - documents used across scenarios (`todos_query`, `add_todo`)
//! - manager construction over a scripted [`MockLink`]
//! - a recording listener for observing broadcasts
//! - a scripted [`LocalResolver`] for `@client` and `@export` scenarios
//! - small async helpers for driving spawned work
//! - an in-memory log writer for asserting on warnings

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing_subscriber::fmt::MakeWriter;

use gql_core::{
    CacheDiff, ClientConfig, ClientError, InMemoryCache, LocalResolver, NetworkStatus,
    QueryListener, QueryManager, ResolverRequest, StoreValue,
};
use gql_transport::{Context, MockLink};
use gql_types::{merge_variables, variables_from, Document, ExecutionResult, Variables};

pub fn todos_query() -> Document {
    Document::query("query Todos($page: Int) { todos(page: $page) { id text } }")
        .name("Todos")
        .build()
}

pub fn add_todo() -> Document {
    Document::mutation("mutation AddTodo($text: String!) { addTodo(text: $text) { id text } }")
        .name("AddTodo")
        .build()
}

pub fn vars(value: Value) -> Variables {
    variables_from(value)
}

/// A manager over `link` with an in-memory cache the test can inspect.
pub fn manager_with_cache(link: &Arc<MockLink>) -> (QueryManager, Arc<InMemoryCache>) {
    let cache = Arc::new(InMemoryCache::new());
    let manager = QueryManager::builder()
        .link(link.clone())
        .cache(cache.clone())
        .build()
        .unwrap();
    (manager, cache)
}

pub fn manager(link: &Arc<MockLink>) -> QueryManager {
    manager_with_cache(link).0
}

/// A manager over `link` whose local state is `resolver`.
pub fn manager_with_resolver(
    link: &Arc<MockLink>,
    resolver: &Arc<ScriptedResolver>,
) -> (QueryManager, Arc<InMemoryCache>) {
    let cache = Arc::new(InMemoryCache::new());
    let manager = QueryManager::builder()
        .link(link.clone())
        .cache(cache.clone())
        .local_state(resolver.clone())
        .build()
        .unwrap();
    (manager, cache)
}

pub fn manager_with_config(link: &Arc<MockLink>, config: ClientConfig) -> QueryManager {
    QueryManager::builder()
        .link(link.clone())
        .config(config)
        .build()
        .unwrap()
}

/// One listener call: the status it saw and the diff it was given.
#[derive(Debug, Clone)]
pub struct Notification {
    pub status: NetworkStatus,
    pub diff: Option<CacheDiff>,
}

/// Listener that records every notification it receives.
pub fn recording_listener() -> (QueryListener, Arc<Mutex<Vec<Notification>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: QueryListener = Arc::new(
        move |store: &StoreValue, diff: Option<&CacheDiff>| -> anyhow::Result<()> {
            sink.lock().push(Notification {
                status: store.network_status,
                diff: diff.cloned(),
            });
            Ok(())
        },
    );
    (listener, seen)
}

/// Yield to spawned tasks until `condition` holds.
///
/// # Panics
///
/// Panics if the condition is still false after many scheduler turns.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Sleep-based variant of [`wait_until`] for multi-threaded runtimes.
///
/// # Panics
///
/// Panics if the condition is still false after five seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..5000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Local resolver with fixed behaviour:
///
/// - `@export` adds `exports` to the variables
/// - documents with client fields split into a client part and (unless
///   client-only) a server part
/// - unforced runs add `"theme": "dark"`; forced runs set `"now"` to
///   `100 + run number`
#[derive(Default)]
pub struct ScriptedResolver {
    pub exports: Variables,
    pub force: bool,
    pub runs: Mutex<Vec<ResolverRequest>>,
    forced_runs: AtomicUsize,
}

impl ScriptedResolver {
    pub fn exporting(exports: Value) -> Self {
        Self {
            exports: variables_from(exports),
            ..Self::default()
        }
    }

    pub fn forcing() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().len()
    }
}

#[async_trait]
impl LocalResolver for ScriptedResolver {
    async fn add_exported_variables(
        &self,
        _document: &Document,
        variables: Variables,
        _context: &Context,
    ) -> Result<Variables, ClientError> {
        Ok(merge_variables(&variables, &self.exports))
    }

    async fn run_resolvers(
        &self,
        request: ResolverRequest,
    ) -> Result<ExecutionResult, ClientError> {
        self.runs.lock().push(request.clone());
        let mut data = request.remote_result.data.clone().unwrap_or_else(|| json!({}));
        if let Some(fields) = data.as_object_mut() {
            if request.only_forced {
                let run = self.forced_runs.fetch_add(1, Ordering::SeqCst) + 1;
                fields.insert("now".into(), json!(100 + run));
            } else {
                fields.insert("theme".into(), json!("dark"));
            }
        }
        Ok(ExecutionResult {
            data: Some(data),
            ..request.remote_result
        })
    }

    fn should_force_resolvers(&self, _document: &Document) -> bool {
        self.force
    }

    fn client_query(&self, document: &Document) -> Option<Document> {
        document
            .has_client_fields
            .then(|| document.derive(|node| node.source.push_str(" #client")))
    }

    fn server_query(&self, document: &Document) -> Option<Document> {
        if !document.has_server_fields {
            return None;
        }
        if !document.has_client_fields {
            return Some(document.clone());
        }
        Some(document.derive(|node| {
            node.source.push_str(" #server");
            node.has_client_fields = false;
        }))
    }
}

/// Shared buffer that a `tracing_subscriber` fmt layer writes into.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

pub struct LogBufferWriter(Arc<Mutex<Vec<u8>>>);

impl Write for LogBufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogBufferWriter(self.0.clone())
    }
}

/// Route warnings on this thread into a buffer until the guard is dropped.
pub fn capture_warnings() -> (tracing::subscriber::DefaultGuard, LogBuffer) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();
    (tracing::subscriber::set_default(subscriber), buffer)
}
