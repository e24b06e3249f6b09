//! In-memory reference cache.
//!
//! Results are stored whole, keyed by `(data id, document source, variables)`.
//! There is no normalization: two queries only share data if they are the
//! same document with the same variables. Optimistic writes go to stacked
//! layers that shadow the base map and can be dropped individually.
//!
//! # Example
//!
//! ```ignore
//! let cache = InMemoryCache::new();
//! cache.write(CacheWrite { result: json!({"todos": []}), data_id: "ROOT_QUERY".into(), document: doc.clone(), variables: vars.clone() });
//! assert!(cache.diff(&DiffOptions::new(&doc, &vars)).complete);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use gql_types::{stable_key, Document, Variables};

use super::{Cache, CacheDiff, CacheWatch, CacheWrite, DiffOptions, WatchCallback, WatchCancel};

/// Storage key of one cached result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub data_id: String,
    pub document: String,
    pub variables: String,
}

impl EntryKey {
    fn new(data_id: &str, document: &Document, variables: &Variables) -> Self {
        Self {
            data_id: data_id.to_string(),
            document: document.source.clone(),
            variables: stable_key(variables),
        }
    }

    fn for_read(document: &Document, variables: &Variables) -> Self {
        Self::new(document.kind.root_id(), document, variables)
    }
}

struct Layer {
    id: String,
    entries: HashMap<EntryKey, Value>,
}

struct WatchEntry {
    options: DiffOptions,
    callback: WatchCallback,
    last: CacheDiff,
}

#[derive(Default)]
struct CacheState {
    base: HashMap<EntryKey, Value>,
    layers: Vec<Layer>,
    /// Layer receiving writes while an optimistic transaction runs.
    write_layer: Option<String>,
    batch_depth: usize,
    watches: BTreeMap<u64, WatchEntry>,
    next_watch: u64,
}

impl CacheState {
    fn lookup(&self, key: &EntryKey, optimistic: bool) -> Option<&Value> {
        // Inside an optimistic transaction every read sees the layers.
        if optimistic || self.write_layer.is_some() {
            for layer in self.layers.iter().rev() {
                if let Some(value) = layer.entries.get(key) {
                    return Some(value);
                }
            }
        }
        self.base.get(key)
    }

    fn read(&self, options: &DiffOptions) -> CacheDiff {
        let key = EntryKey::for_read(&options.document, &options.variables);
        match self.lookup(&key, options.optimistic) {
            Some(value) => CacheDiff::complete(value.clone()),
            None => CacheDiff::missing(),
        }
    }
}

/// Thread-safe [`Cache`] backed by hash maps.
#[derive(Default)]
pub struct InMemoryCache {
    state: Arc<Mutex<CacheState>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of results in the base (non-optimistic) store.
    pub fn len(&self) -> usize {
        self.state.lock().base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn optimistic_layers(&self) -> usize {
        self.state.lock().layers.len()
    }

    pub fn watch_count(&self) -> usize {
        self.state.lock().watches.len()
    }

    /// Copy of every stored result, seen through the optimistic layers if asked.
    pub fn extract(&self, optimistic: bool) -> BTreeMap<EntryKey, Value> {
        let state = self.state.lock();
        let mut out: BTreeMap<EntryKey, Value> = state
            .base
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if optimistic {
            for layer in &state.layers {
                for (k, v) in &layer.entries {
                    out.insert(k.clone(), v.clone());
                }
            }
        }
        out
    }

    /// Notify every watch whose diff changed. Callbacks run after the lock is released.
    fn broadcast_watches(&self) {
        let pending: Vec<(WatchCallback, CacheDiff)> = {
            let mut state = self.state.lock();
            if state.batch_depth > 0 {
                return;
            }
            let diffs: Vec<(u64, CacheDiff)> = state
                .watches
                .iter()
                .map(|(id, watch)| (*id, state.read(&watch.options)))
                .collect();
            let mut pending = Vec::new();
            for (id, diff) in diffs {
                if let Some(watch) = state.watches.get_mut(&id) {
                    if watch.last != diff {
                        watch.last = diff.clone();
                        pending.push((watch.callback.clone(), diff));
                    }
                }
            }
            pending
        };

        if !pending.is_empty() {
            trace!(count = pending.len(), "notifying cache watches");
        }
        for (callback, diff) in pending {
            callback(diff);
        }
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    fn diff(&self, options: &DiffOptions) -> CacheDiff {
        self.state.lock().read(options)
    }

    fn write(&self, write: CacheWrite) {
        {
            let mut state = self.state.lock();
            let key = EntryKey::new(&write.data_id, &write.document, &write.variables);
            let target = state.write_layer.clone();
            match target {
                Some(layer_id) => {
                    if let Some(layer) = state.layers.iter_mut().rev().find(|l| l.id == layer_id) {
                        layer.entries.insert(key, write.result);
                    }
                }
                None => {
                    state.base.insert(key, write.result);
                }
            }
        }
        self.broadcast_watches();
    }

    fn watch(&self, watch: CacheWatch) -> WatchCancel {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_watch;
            state.next_watch += 1;
            let options = DiffOptions::new(&watch.document, &watch.variables)
                .optimistic(watch.optimistic);
            let last = state.read(&options);
            state.watches.insert(
                id,
                WatchEntry {
                    options,
                    callback: watch.callback,
                    last,
                },
            );
            id
        };

        let state = Arc::downgrade(&self.state);
        WatchCancel::new(move || {
            if let Some(state) = state.upgrade() {
                state.lock().watches.remove(&id);
            }
        })
    }

    fn perform_transaction(&self, transaction: &mut dyn FnMut(&dyn Cache)) {
        self.state.lock().batch_depth += 1;
        transaction(self);
        self.state.lock().batch_depth -= 1;
        self.broadcast_watches();
    }

    fn record_optimistic_transaction(&self, transaction: &mut dyn FnMut(&dyn Cache), id: &str) {
        let previous = {
            let mut state = self.state.lock();
            state.layers.push(Layer {
                id: id.to_string(),
                entries: HashMap::new(),
            });
            state.batch_depth += 1;
            state.write_layer.replace(id.to_string())
        };
        transaction(self);
        {
            let mut state = self.state.lock();
            state.write_layer = previous;
            state.batch_depth -= 1;
        }
        self.broadcast_watches();
    }

    fn remove_optimistic(&self, id: &str) {
        let removed = {
            let mut state = self.state.lock();
            let before = state.layers.len();
            state.layers.retain(|layer| layer.id != id);
            before != state.layers.len()
        };
        if removed {
            self.broadcast_watches();
        }
    }

    async fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.base.clear();
            state.layers.clear();
            state.write_layer = None;
        }
        self.broadcast_watches();
    }
}
