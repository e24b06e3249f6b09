//! Per-document transform memoization.
//!
//! Every operation passes through [`TransformCache::transform`] before it
//! touches the cache or the link. The result is computed once per document
//! identity and stored under four aliases (the original document, the
//! cache-transformed one, and its client and server parts), so handing any
//! of them back later is a hit.
//!
//! The table only holds documents weakly. An entry is dropped on the next
//! insert once nothing outside the table holds the entry or any of its
//! documents.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use gql_types::{Document, DocumentId, Variables, WeakDocument};

use crate::cache::Cache;
use crate::local_state::LocalResolver;

/// Everything the core needs to know about one document.
#[derive(Debug, Clone)]
pub struct TransformEntry {
    /// The document after the cache's transform.
    pub document: Document,
    pub has_client_exports: bool,
    pub has_forced_resolvers: bool,
    pub client_query: Option<Document>,
    /// `None` when nothing must be sent to the server.
    pub server_query: Option<Document>,
    pub default_variables: Variables,
}

impl TransformEntry {
    /// How many of this entry's own handles point at `id`.
    fn holds(&self, id: DocumentId) -> usize {
        [
            Some(&self.document),
            self.client_query.as_ref(),
            self.server_query.as_ref(),
        ]
        .into_iter()
        .flatten()
        .filter(|document| document.id() == id)
        .count()
    }
}

struct Slot {
    /// Identities this slot owns in the alias index.
    aliases: Vec<WeakDocument>,
    entry: Arc<TransformEntry>,
}

impl Slot {
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.entry) > 1
            || self
                .aliases
                .iter()
                .any(|alias| alias.strong_count() > self.entry.holds(alias.id()))
    }
}

#[derive(Default)]
struct Table {
    /// Keyed by the identity of the document the entry was computed for.
    slots: HashMap<DocumentId, Slot>,
    aliases: HashMap<DocumentId, DocumentId>,
}

impl Table {
    fn get(&self, id: DocumentId) -> Option<Arc<TransformEntry>> {
        let key = self.aliases.get(&id)?;
        self.slots.get(key).map(|slot| slot.entry.clone())
    }

    fn prune(&mut self) {
        let dead: Vec<DocumentId> = self
            .slots
            .iter()
            .filter(|(_, slot)| !slot.in_use())
            .map(|(key, _)| *key)
            .collect();
        for key in dead {
            let Some(slot) = self.slots.remove(&key) else {
                continue;
            };
            for alias in slot.aliases {
                if self.aliases.get(&alias.id()) == Some(&key) {
                    self.aliases.remove(&alias.id());
                }
            }
        }
    }
}

/// Identity-keyed table of [`TransformEntry`] values.
///
/// Weak handles keep each key's allocation reserved, so a key's address
/// cannot be reused by an unrelated document while the entry exists.
#[derive(Default)]
pub struct TransformCache {
    table: Mutex<Table>,
}

impl TransformCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transform(
        &self,
        document: &Document,
        cache: &dyn Cache,
        local_state: &dyn LocalResolver,
    ) -> Arc<TransformEntry> {
        if let Some(entry) = self.table.lock().get(document.id()) {
            return entry;
        }

        // Collaborators run without the table locked.
        let transformed = cache.transform_document(document);
        let for_link = cache.transform_for_link(&transformed);
        let entry = Arc::new(TransformEntry {
            has_client_exports: document.exports_variables,
            has_forced_resolvers: local_state.should_force_resolvers(document),
            client_query: local_state.client_query(&transformed),
            server_query: local_state.server_query(&for_link),
            default_variables: document.default_variables.clone(),
            document: transformed,
        });

        let mut table = self.table.lock();
        if let Some(raced) = table.get(document.id()) {
            return raced;
        }
        table.prune();

        let key = document.id();
        let mut owned = Vec::new();
        let aliases = [
            Some(document),
            Some(&entry.document),
            entry.client_query.as_ref(),
            entry.server_query.as_ref(),
        ];
        for alias in aliases.into_iter().flatten() {
            if !table.aliases.contains_key(&alias.id()) {
                table.aliases.insert(alias.id(), key);
                owned.push(alias.downgrade());
            }
        }
        table.slots.insert(
            key,
            Slot {
                aliases: owned,
                entry: entry.clone(),
            },
        );
        entry
    }

    /// Number of memoized entries.
    pub fn len(&self) -> usize {
        self.table.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of document identities that resolve to an entry.
    pub fn alias_count(&self) -> usize {
        self.table.lock().aliases.len()
    }
}
