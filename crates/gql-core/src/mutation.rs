//! The mutation pipeline: optimistic apply, execution, confirmed apply,
//! query-updater fan-out, refetches and rollback.

use std::collections::{BTreeMap, HashMap};

use futures::future::{join_all, BoxFuture, FutureExt};
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use gql_types::{merge_variables, Document, ExecutionResult, OperationKind, Variables};

use crate::cache::{Cache, CacheWrite, DiffOptions};
use crate::error::ClientError;
use crate::manager::QueryManager;
use crate::options::{
    ErrorPolicy, FetchPolicy, MutationOptions, MutationUpdateFn, QueryOptions, QueryUpdater,
    RefetchQuery, UpdateQueryOptions,
};
use crate::store::QueryResult;

/// Tracker entry for one mutation.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub document: Document,
    pub variables: Variables,
    pub loading: bool,
    pub error: Option<ClientError>,
}

/// Bookkeeping of mutations, for diagnostics.
#[derive(Debug, Default)]
pub struct MutationStore {
    records: BTreeMap<String, MutationRecord>,
}

impl MutationStore {
    pub fn init(&mut self, mutation_id: &str, document: &Document, variables: &Variables) {
        self.records.insert(
            mutation_id.to_string(),
            MutationRecord {
                document: document.clone(),
                variables: variables.clone(),
                loading: true,
                error: None,
            },
        );
    }

    pub fn mark_result(&mut self, mutation_id: &str) {
        if let Some(record) = self.records.get_mut(mutation_id) {
            record.loading = false;
            record.error = None;
        }
    }

    pub fn mark_error(&mut self, mutation_id: &str, error: ClientError) {
        if let Some(record) = self.records.get_mut(mutation_id) {
            record.loading = false;
            record.error = Some(error);
        }
    }

    pub fn get(&self, mutation_id: &str) -> Option<&MutationRecord> {
        self.records.get(mutation_id)
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }

    pub fn snapshot(&self) -> BTreeMap<String, MutationRecord> {
        self.records.clone()
    }
}

/// An updater matched to a live query, with that query's document and variables.
struct PendingUpdate {
    query_id: String,
    updater: QueryUpdater,
    document: Document,
    variables: Variables,
}

/// Everything a confirmed or optimistic write needs.
struct MutationWrite<'a> {
    mutation_id: &'a str,
    document: &'a Document,
    variables: &'a Variables,
    result: &'a ExecutionResult,
    updaters: &'a [PendingUpdate],
    update: Option<&'a MutationUpdateFn>,
}

/// Write the mutation result, run the matched updaters against complete
/// cached queries, then commit everything in one transaction.
fn apply_mutation_result(cache: &dyn Cache, write: &MutationWrite<'_>) {
    if write.result.has_errors() {
        return;
    }

    let mut writes = Vec::new();
    if let Some(data) = &write.result.data {
        writes.push(CacheWrite {
            result: data.clone(),
            data_id: OperationKind::Mutation.root_id().to_string(),
            document: write.document.clone(),
            variables: write.variables.clone(),
        });
    }

    for pending in write.updaters {
        let diff = cache.diff(&DiffOptions::new(&pending.document, &pending.variables));
        let (true, Some(current)) = (diff.complete, diff.result) else {
            continue;
        };
        let options = UpdateQueryOptions {
            mutation_result: write.result.clone(),
            query_name: pending.document.operation_name().map(String::from),
            query_variables: pending.variables.clone(),
        };
        match (pending.updater)(&current, &options) {
            Ok(Some(next)) => writes.push(CacheWrite {
                result: next,
                data_id: OperationKind::Query.root_id().to_string(),
                document: pending.document.clone(),
                variables: pending.variables.clone(),
            }),
            Ok(None) => {}
            Err(e) => error!(
                mutation_id = write.mutation_id,
                query_id = %pending.query_id,
                error = %e,
                "query updater failed"
            ),
        }
    }

    cache.perform_transaction(&mut |cache| {
        for w in &writes {
            cache.write(w.clone());
        }
        if let Some(update) = write.update {
            if let Err(e) = update(cache, write.result) {
                error!(mutation_id = write.mutation_id, error = %e, "mutation update function failed");
            }
        }
    });
}

impl QueryManager {
    /// Execute a mutation.
    ///
    /// An optimistic response is applied as its own cache layer at once and
    /// removed when the mutation settles. Mutations are never deduplicated.
    pub async fn mutate(&self, options: MutationOptions) -> Result<ExecutionResult, ClientError> {
        let MutationOptions {
            document,
            variables,
            optimistic_response,
            update_queries,
            refetch_queries,
            await_refetch_queries,
            update,
            error_policy,
            fetch_policy,
            context,
        } = options;

        let document = document.ok_or_else(|| {
            ClientError::invalid("a mutation document is required to call mutate()")
        })?;
        if fetch_policy.is_some_and(|policy| policy != FetchPolicy::NoCache) {
            return Err(ClientError::invalid(
                "mutations only support a no-cache fetch policy",
            ));
        }

        let mutation_id = self.generate_query_id();
        let entry = self.transform(&document);
        let document = entry.document.clone();
        self.inner
            .registry
            .lock()
            .update(&mutation_id, |record| record.document = Some(document.clone()));

        let mut variables = merge_variables(&entry.default_variables, &variables);
        if entry.has_client_exports {
            match self
                .inner
                .local_state
                .add_exported_variables(&document, variables, &context)
                .await
            {
                Ok(exported) => variables = exported,
                Err(e) => {
                    self.inner.registry.lock().remove(&mutation_id);
                    return Err(e);
                }
            }
        }

        self.inner
            .mutation_store
            .lock()
            .init(&mutation_id, &document, &variables);

        let optimistic = optimistic_response.map(|response| response.resolve(&variables));
        if let Some(data) = &optimistic {
            let result = ExecutionResult::from_data(data.clone());
            let updaters = self.collect_updaters(&update_queries);
            let write = MutationWrite {
                mutation_id: &mutation_id,
                document: &document,
                variables: &variables,
                result: &result,
                updaters: &updaters,
                update: update.as_ref(),
            };
            self.inner.cache.record_optimistic_transaction(
                &mut |cache| apply_mutation_result(cache, &write),
                &mutation_id,
            );
        }
        self.broadcast_queries();

        let mut context = context;
        if let Some(data) = &optimistic {
            context.insert("optimisticResponse".to_string(), data.clone());
        }
        let mut results = self.obtain(&document, &context, &variables, false);

        let mut store_result: Option<ExecutionResult> = None;
        let mut graphql_error: Option<ClientError> = None;
        while let Some(item) = results.next().await {
            match item {
                Ok(result) => {
                    if error_policy == ErrorPolicy::None && result.has_errors() {
                        graphql_error = Some(ClientError::GraphQL(result.errors));
                        continue;
                    }
                    self.inner.mutation_store.lock().mark_result(&mutation_id);
                    if fetch_policy != Some(FetchPolicy::NoCache) {
                        let updaters = self.collect_updaters(&update_queries);
                        let write = MutationWrite {
                            mutation_id: &mutation_id,
                            document: &document,
                            variables: &variables,
                            result: &result,
                            updaters: &updaters,
                            update: update.as_ref(),
                        };
                        apply_mutation_result(self.inner.cache.as_ref(), &write);
                    }
                    store_result = Some(result);
                }
                Err(e) => {
                    self.inner
                        .mutation_store
                        .lock()
                        .mark_error(&mutation_id, e.clone());
                    if optimistic.is_some() {
                        self.inner.cache.remove_optimistic(&mutation_id);
                    }
                    self.broadcast_queries();
                    self.inner.registry.lock().remove(&mutation_id);
                    return Err(e);
                }
            }
        }

        if let Some(e) = &graphql_error {
            self.inner
                .mutation_store
                .lock()
                .mark_error(&mutation_id, e.clone());
        }
        if optimistic.is_some() {
            self.inner.cache.remove_optimistic(&mutation_id);
        }
        self.broadcast_queries();
        if let Some(e) = graphql_error {
            self.inner.registry.lock().remove(&mutation_id);
            return Err(e);
        }

        let mut result = store_result.unwrap_or_default();
        let refetches = self.refetch_actions(refetch_queries.resolve(&result));
        if await_refetch_queries {
            for outcome in join_all(refetches).await {
                if let Err(e) = outcome {
                    warn!(mutation_id = %mutation_id, error = %e, "refetch after mutation failed");
                }
            }
        } else {
            for refetch in refetches {
                tokio::spawn(async move {
                    if let Err(e) = refetch.await {
                        debug!(error = %e, "background refetch after mutation failed");
                    }
                });
            }
        }

        self.inner.registry.lock().remove(&mutation_id);
        if error_policy == ErrorPolicy::Ignore {
            result.errors.clear();
        }
        Ok(result)
    }

    /// Match updaters to live watched queries by operation name.
    fn collect_updaters(&self, update_queries: &HashMap<String, QueryUpdater>) -> Vec<PendingUpdate> {
        if update_queries.is_empty() {
            return Vec::new();
        }
        let registry = self.inner.registry.lock();
        let mut pending = Vec::new();
        for (name, updater) in update_queries {
            for query_id in registry.ids_for_name(name) {
                if let Some(store) = registry.store_value(&query_id) {
                    pending.push(PendingUpdate {
                        query_id,
                        updater: updater.clone(),
                        document: store.document,
                        variables: store.variables,
                    });
                }
            }
        }
        pending.sort_by(|a, b| a.query_id.cmp(&b.query_id));
        pending
    }

    /// Turn refetch targets into independent futures.
    fn refetch_actions(
        &self,
        targets: Vec<RefetchQuery>,
    ) -> Vec<BoxFuture<'static, Result<QueryResult, ClientError>>> {
        let mut actions = Vec::new();
        for target in targets {
            match target {
                RefetchQuery::Named(name) => {
                    let handles = {
                        let registry = self.inner.registry.lock();
                        registry
                            .ids_for_name(&name)
                            .into_iter()
                            .filter_map(|id| registry.handle(&id))
                            .collect::<Vec<_>>()
                    };
                    if handles.is_empty() {
                        warn!(name = %name, "unknown query named in refetch_queries");
                    }
                    for handle in handles {
                        actions.push(async move { handle.refetch().await }.boxed());
                    }
                }
                RefetchQuery::Document {
                    document,
                    variables,
                    context,
                } => {
                    let mut options = QueryOptions::new(document)
                        .with_variables(variables)
                        .with_fetch_policy(FetchPolicy::NetworkOnly);
                    if let Some(context) = context {
                        options = options.with_context(context);
                    }
                    let manager = self.clone();
                    actions.push(async move { manager.query(options).await }.boxed());
                }
            }
        }
        actions
    }
}

/// Convenience for updaters that append to a list field.
///
/// Returns `previous` with `item` pushed onto the array at `field`, or
/// `None` if that field is not an array.
pub fn append_to_list(previous: &Value, field: &str, item: Value) -> Option<Value> {
    let mut next = previous.clone();
    next.get_mut(field)?.as_array_mut()?.push(item);
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mutation_store_lifecycle() {
        let doc = Document::mutation("mutation M { m }").name("M").build();
        let mut store = MutationStore::default();
        store.init("1", &doc, &Variables::new());
        assert!(store.get("1").unwrap().loading);

        store.mark_error("1", ClientError::StoreReset);
        let record = store.get("1").unwrap();
        assert!(!record.loading);
        assert_eq!(record.error, Some(ClientError::StoreReset));

        store.mark_result("1");
        assert!(store.get("1").unwrap().error.is_none());
        // Unknown ids are ignored.
        store.mark_result("2");
        assert_eq!(store.snapshot().len(), 1);

        store.reset();
        assert!(store.get("1").is_none());
    }

    #[test]
    fn test_append_to_list() {
        let previous = json!({"todos": [{"id": "1"}]});
        let next = append_to_list(&previous, "todos", json!({"id": "2"})).unwrap();
        assert_eq!(next["todos"].as_array().unwrap().len(), 2);
        assert!(append_to_list(&previous, "missing", json!(1)).is_none());
    }
}
