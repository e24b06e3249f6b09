//! The operation registry: one record per query, mutation or subscription id.
//!
//! The registry is the only process-wide mutable state of the core. It is
//! owned by the query manager behind a single mutex; every method here runs
//! with that lock held and never calls out to collaborators.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::AbortHandle;

use gql_types::{Document, ExecutionResult};

use crate::cache::{CacheDiff, WatchCancel};
use crate::error::ClientError;
use crate::store::{InitQuery, NetworkStatus, StoreValue};
use crate::watch::QueryHandle;

/// Called on every broadcast in which the operation is dirty.
pub type QueryListener =
    Arc<dyn Fn(&StoreValue, Option<&CacheDiff>) -> anyhow::Result<()> + Send + Sync>;

pub type ListenerId = u64;

/// Live state of one operation.
#[derive(Clone, Default)]
pub struct OperationRecord {
    pub listeners: Vec<(ListenerId, QueryListener)>,
    pub dirty: bool,
    /// Last diff delivered by the operation's cache watch.
    pub last_diff: Option<CacheDiff>,
    pub document: Option<Document>,
    /// Sequence number of the newest network request issued for this id.
    pub last_request_id: u64,
    pub handle: Option<Arc<dyn QueryHandle>>,
    /// In-flight fetches, aborted when the operation is stopped.
    pub subscriptions: Vec<(u64, AbortHandle)>,
    pub cancel: Option<WatchCancel>,
    pub store: Option<StoreValue>,
}

impl OperationRecord {
    pub fn network_status(&self) -> Option<NetworkStatus> {
        self.store.as_ref().map(|s| s.network_status)
    }
}

/// A dirty operation collected for notification.
pub struct DirtyOperation {
    pub id: String,
    pub listeners: Vec<QueryListener>,
    pub store: StoreValue,
    pub diff: Option<CacheDiff>,
}

#[derive(Default)]
pub struct QueryRegistry {
    records: BTreeMap<String, OperationRecord>,
    /// Operation name of an attached handle -> ids.
    names: HashMap<String, BTreeSet<String>>,
    next_listener: ListenerId,
    next_subscription: u64,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a record; a default record if the id is unknown.
    pub fn get(&self, id: &str) -> OperationRecord {
        self.records.get(id).cloned().unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    /// Apply `patch` to the record (creating it if needed). The record turns
    /// dirty when its cache diff changed.
    pub fn update<R>(&mut self, id: &str, patch: impl FnOnce(&mut OperationRecord) -> R) -> R {
        let record = self.records.entry(id.to_string()).or_default();
        let previous = record.last_diff.clone();
        let out = patch(record);
        if record.last_diff != previous {
            record.dirty = true;
        }
        out
    }

    /// Mark an existing record dirty. Unknown ids are ignored.
    pub fn mark_dirty(&mut self, id: &str) {
        if let Some(record) = self.records.get_mut(id) {
            record.dirty = true;
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<OperationRecord> {
        let record = self.records.remove(id)?;
        if let Some(name) = record.handle.as_ref().and_then(|h| h.name()) {
            self.unindex(&name, id);
        }
        Some(record)
    }

    fn unindex(&mut self, name: &str, id: &str) {
        if let Some(ids) = self.names.get_mut(name) {
            ids.remove(id);
            if ids.is_empty() {
                self.names.remove(name);
            }
        }
    }

    // ==================== Handles ====================

    pub fn attach_handle(&mut self, id: &str, handle: Arc<dyn QueryHandle>) {
        if let Some(name) = handle.name() {
            self.names
                .entry(name)
                .or_default()
                .insert(id.to_string());
        }
        let previous = self.update(id, |record| record.handle.replace(handle));
        if let Some(name) = previous.and_then(|h| h.name()) {
            // The new handle re-inserted the id if it has the same name.
            let still_named = self
                .records
                .get(id)
                .and_then(|r| r.handle.as_ref())
                .and_then(|h| h.name())
                .is_some_and(|n| n == name);
            if !still_named {
                self.unindex(&name, id);
            }
        }
    }

    pub fn detach_handle(&mut self, id: &str) -> Option<Arc<dyn QueryHandle>> {
        let handle = self.records.get_mut(id)?.handle.take()?;
        if let Some(name) = handle.name() {
            self.unindex(&name, id);
        }
        Some(handle)
    }

    pub fn handle(&self, id: &str) -> Option<Arc<dyn QueryHandle>> {
        self.records.get(id).and_then(|r| r.handle.clone())
    }

    pub fn handles(&self) -> Vec<(String, Arc<dyn QueryHandle>)> {
        self.records
            .iter()
            .filter_map(|(id, r)| r.handle.clone().map(|h| (id.clone(), h)))
            .collect()
    }

    /// Ids whose attached handle carries `name`.
    pub fn ids_for_name(&self, name: &str) -> Vec<String> {
        self.names
            .get(name)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ==================== Listeners and fetches ====================

    pub fn add_listener(&mut self, id: &str, listener: QueryListener) -> ListenerId {
        self.next_listener += 1;
        let listener_id = self.next_listener;
        self.update(id, |record| record.listeners.push((listener_id, listener)));
        listener_id
    }

    pub fn remove_listener(&mut self, id: &str, listener_id: ListenerId) {
        if let Some(record) = self.records.get_mut(id) {
            record.listeners.retain(|(lid, _)| *lid != listener_id);
        }
    }

    /// Track an in-flight fetch. Returns `None` (and tracks nothing) if the
    /// operation is gone.
    pub fn add_subscription(&mut self, id: &str, abort: AbortHandle) -> Option<u64> {
        let record = self.records.get_mut(id)?;
        self.next_subscription += 1;
        let subscription_id = self.next_subscription;
        record.subscriptions.push((subscription_id, abort));
        Some(subscription_id)
    }

    pub fn remove_subscription(&mut self, id: &str, subscription_id: u64) {
        if let Some(record) = self.records.get_mut(id) {
            record.subscriptions.retain(|(sid, _)| *sid != subscription_id);
        }
    }

    /// A result of request `request_id` may still be applied to `id`.
    pub fn is_current(&self, id: &str, request_id: u64) -> bool {
        self.records
            .get(id)
            .is_some_and(|record| request_id >= record.last_request_id)
    }

    /// Clear every dirty flag, returning the records whose listeners must run.
    /// Records without a store value are skipped.
    pub fn take_dirty(&mut self) -> Vec<DirtyOperation> {
        let mut out = Vec::new();
        for (id, record) in self.records.iter_mut() {
            if !record.dirty {
                continue;
            }
            record.dirty = false;
            let Some(store) = record.store.clone() else {
                continue;
            };
            if record.listeners.is_empty() {
                continue;
            }
            out.push(DirtyOperation {
                id: id.clone(),
                listeners: record.listeners.iter().map(|(_, l)| l.clone()).collect(),
                store,
                diff: record.last_diff.clone(),
            });
        }
        out
    }

    // ==================== Store state machine ====================

    /// Start (or restart) a fetch for `id`.
    ///
    /// Fails if `id` already holds a store value for a different document.
    pub fn init_query(&mut self, id: &str, query: InitQuery) -> Result<(), ClientError> {
        let previous = self.records.get(id).and_then(|r| r.store.as_ref());
        if let Some(previous) = previous {
            if !previous.document.same_document(&query.document) {
                return Err(ClientError::invariant(
                    "may not update existing query string in store",
                ));
            }
        }
        let value = StoreValue::init(previous, &query);
        self.update(id, |record| record.store = Some(value));

        if let Some(target) = query.fetch_more_for_id.as_deref() {
            if let Some(store) = self.store_mut(target) {
                store.network_status = NetworkStatus::FetchMore;
            }
        }
        Ok(())
    }

    pub fn mark_query_result(
        &mut self,
        id: &str,
        result: &ExecutionResult,
        fetch_more_for_id: Option<&str>,
    ) {
        let Some(store) = self.store_mut(id) else {
            return;
        };
        store.mark_result(result);
        if let Some(target) = fetch_more_for_id.and_then(|t| self.store_mut(t)) {
            target.network_status = NetworkStatus::Ready;
        }
    }

    pub fn mark_query_error(
        &mut self,
        id: &str,
        error: ClientError,
        fetch_more_for_id: Option<&str>,
    ) {
        let Some(store) = self.store_mut(id) else {
            return;
        };
        store.mark_error(error);
        if let Some(target) = fetch_more_for_id {
            self.mark_query_result_client(target, true);
        }
    }

    pub fn mark_query_result_client(&mut self, id: &str, complete: bool) {
        if let Some(store) = self.store_mut(id) {
            store.mark_client_result(complete);
        }
    }

    /// Drop the store value only; the record survives.
    pub fn stop_query_store(&mut self, id: &str) {
        if let Some(record) = self.records.get_mut(id) {
            record.store = None;
        }
    }

    /// Global reset: ids with a handle go back to `loading`, all others lose
    /// their store value.
    pub fn reset_store(&mut self) {
        for record in self.records.values_mut() {
            if record.handle.is_some() {
                if let Some(store) = record.store.as_mut() {
                    store.network_status = NetworkStatus::Loading;
                }
            } else {
                record.store = None;
            }
        }
    }

    pub fn store_value(&self, id: &str) -> Option<StoreValue> {
        self.records.get(id).and_then(|r| r.store.clone())
    }

    pub fn store_snapshot(&self) -> BTreeMap<String, StoreValue> {
        self.records
            .iter()
            .filter_map(|(id, r)| r.store.clone().map(|s| (id.clone(), s)))
            .collect()
    }

    fn store_mut(&mut self, id: &str) -> Option<&mut StoreValue> {
        self.records.get_mut(id).and_then(|r| r.store.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gql_types::{variables_from, Variables};
    use serde_json::json;

    fn doc() -> Document {
        Document::query("query Q { a }").name("Q").build()
    }

    #[test]
    fn test_get_does_not_create() {
        let registry = QueryRegistry::new();
        let record = registry.get("1");
        assert!(record.store.is_none());
        assert!(!record.dirty);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_marks_dirty_on_diff_change() {
        let mut registry = QueryRegistry::new();
        registry.update("1", |r| r.last_request_id = 3);
        assert!(!registry.get("1").dirty);

        registry.update("1", |r| r.last_diff = Some(CacheDiff::complete(json!({"a": 1}))));
        assert!(registry.get("1").dirty);

        registry.take_dirty();
        registry.update("1", |r| r.last_diff = Some(CacheDiff::complete(json!({"a": 1}))));
        assert!(!registry.get("1").dirty);
    }

    #[test]
    fn test_init_rejects_different_document() {
        let mut registry = QueryRegistry::new();
        registry
            .init_query("1", InitQuery::new(doc(), Variables::new()))
            .unwrap();
        // Structurally equal is accepted.
        registry
            .init_query("1", InitQuery::new(doc(), Variables::new()))
            .unwrap();

        let other = Document::query("query R { b }").name("R").build();
        let err = registry
            .init_query("1", InitQuery::new(other, Variables::new()))
            .unwrap_err();
        assert!(matches!(err, ClientError::Invariant(_)));
    }

    #[test]
    fn test_fetch_more_target_status() {
        let mut registry = QueryRegistry::new();
        registry
            .init_query("1", InitQuery::new(doc(), Variables::new()))
            .unwrap();
        registry.mark_query_result("1", &ExecutionResult::default(), None);

        let mut more = InitQuery::new(doc(), variables_from(json!({"after": 10})));
        more.fetch_more_for_id = Some("1".into());
        registry.init_query("2", more).unwrap();
        assert_eq!(registry.get("1").network_status(), Some(NetworkStatus::FetchMore));

        registry.mark_query_error("2", ClientError::StoreReset, Some("1"));
        assert_eq!(registry.get("2").network_status(), Some(NetworkStatus::Error));
        assert_eq!(registry.get("1").network_status(), Some(NetworkStatus::Ready));
    }

    #[test]
    fn test_reset_store_without_handles_drops_values() {
        let mut registry = QueryRegistry::new();
        registry
            .init_query("1", InitQuery::new(doc(), Variables::new()))
            .unwrap();
        registry.reset_store();
        assert!(registry.contains("1"));
        assert!(registry.store_value("1").is_none());
        assert!(registry.store_snapshot().is_empty());
    }

    #[test]
    fn test_take_dirty_skips_records_without_store() {
        let mut registry = QueryRegistry::new();
        let listener: QueryListener =
            Arc::new(|_: &StoreValue, _: Option<&CacheDiff>| -> anyhow::Result<()> { Ok(()) });
        registry.add_listener("1", listener.clone());
        registry.add_listener("2", listener);
        registry
            .init_query("2", InitQuery::new(doc(), Variables::new()))
            .unwrap();
        registry.mark_dirty("1");
        registry.mark_dirty("2");
        registry.mark_dirty("unknown");

        let dirty = registry.take_dirty();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].id, "2");
        assert!(!registry.get("1").dirty);
        assert!(!registry.contains("unknown"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = QueryRegistry::new();
        registry.update("1", |_| ());
        assert!(registry.remove("1").is_some());
        assert!(registry.remove("1").is_none());
        assert!(registry.remove("never").is_none());
    }
}
