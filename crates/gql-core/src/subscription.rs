//! GraphQL subscriptions.
//!
//! A subscription never joins the dedup pool. Every result is written to
//! the cache under the subscription root (unless `no-cache`) so watched
//! queries observe it, and the stream ends at the first failure.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::future::{AbortHandle, Abortable};
use futures::stream::{self, BoxStream, Stream, StreamExt};

use gql_types::{merge_variables, ExecutionResult, OperationKind};

use crate::cache::CacheWrite;
use crate::error::ClientError;
use crate::manager::{QueryManager, WeakQueryManager};
use crate::options::{FetchPolicy, SubscriptionOptions};

/// Stream of subscription results. Dropping it stops the subscription.
pub struct SubscriptionStream {
    id: String,
    manager: WeakQueryManager,
    inner: BoxStream<'static, Result<ExecutionResult, ClientError>>,
}

impl SubscriptionStream {
    /// Operation id the subscription is registered under.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Stream for SubscriptionStream {
    type Item = Result<ExecutionResult, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.stop_query(&self.id);
        }
    }
}

impl QueryManager {
    /// Open a subscription.
    pub async fn subscribe(
        &self,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionStream, ClientError> {
        if options.document.kind != OperationKind::Subscription {
            return Err(ClientError::invalid(format!(
                "subscribe() expects a subscription document, got a {}",
                options.document.kind
            )));
        }

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

        let id = self.generate_query_id();
        let (abort, registration) = AbortHandle::new_pair();
        {
            let mut registry = self.inner.registry.lock();
            registry.update(&id, |record| record.document = Some(document.clone()));
            registry.add_subscription(&id, abort);
        }

        let write_results = options.fetch_policy != Some(FetchPolicy::NoCache);
        let manager = self.downgrade();
        let results = self
            .obtain(&document, &options.context, &variables, false)
            .map(move |item| {
                let result = item?;
                if write_results {
                    if let Some(manager) = manager.upgrade() {
                        if let (false, Some(data)) = (result.has_errors(), &result.data) {
                            manager.inner.cache.write(CacheWrite {
                                result: data.clone(),
                                data_id: OperationKind::Subscription.root_id().to_string(),
                                document: document.clone(),
                                variables: variables.clone(),
                            });
                        }
                        manager.broadcast_queries();
                    }
                }
                if result.has_errors() {
                    return Err(ClientError::GraphQL(result.errors));
                }
                Ok(result)
            });

        // Terminate after the first error.
        let results = stream::unfold((results.boxed(), false), |(mut results, failed)| async move {
            if failed {
                return None;
            }
            let item = results.next().await?;
            let failed = item.is_err();
            Some((item, (results, failed)))
        });

        Ok(SubscriptionStream {
            id,
            manager: self.downgrade(),
            inner: Abortable::new(results, registration).boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gql_transport::{MockLink, MockResponse, TransportError};
    use gql_types::Document;
    use serde_json::json;

    use super::*;
    use crate::cache::DiffOptions;

    fn manager(link: &Arc<MockLink>) -> QueryManager {
        QueryManager::builder().link(link.clone()).build().unwrap()
    }

    fn ticker() -> Document {
        Document::subscription("subscription Tick { tick }")
            .name("Tick")
            .build()
    }

    #[tokio::test]
    async fn test_results_are_written_under_subscription_root() {
        let link = Arc::new(MockLink::new());
        link.push(
            "Tick",
            None,
            MockResponse::sequence(vec![
                Ok(ExecutionResult::from_data(json!({"tick": 1}))),
                Ok(ExecutionResult::from_data(json!({"tick": 2}))),
            ]),
        );
        let manager = manager(&link);
        let doc = ticker();

        let results: Vec<_> = manager
            .subscribe(SubscriptionOptions::new(doc.clone()))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(results.len(), 2);

        let diff = manager
            .cache()
            .diff(&DiffOptions::new(&doc, &Default::default()));
        assert_eq!(diff.result, Some(json!({"tick": 2})));
        // Dropping the stream removed the operation.
        assert_eq!(manager.operation_count(), 0);
    }

    #[tokio::test]
    async fn test_graphql_errors_end_the_stream() {
        let link = Arc::new(MockLink::new());
        link.push(
            "Tick",
            None,
            MockResponse::sequence(vec![
                Ok(ExecutionResult::from_errors(vec![
                    gql_types::GraphQLError::new("nope"),
                ])),
                Ok(ExecutionResult::from_data(json!({"tick": 2}))),
            ]),
        );
        let manager = manager(&link);

        let results: Vec<_> = manager
            .subscribe(SubscriptionOptions::new(ticker()))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap_err().graphql_errors().len(), 1);
    }

    #[tokio::test]
    async fn test_no_cache_skips_writes() {
        let link = Arc::new(MockLink::new());
        link.push("Tick", None, MockResponse::data(json!({"tick": 1})));
        link.push(
            "Tick",
            None,
            MockResponse::error(TransportError::Request("gone".into())),
        );
        let manager = manager(&link);
        let doc = ticker();

        let options = SubscriptionOptions::new(doc.clone()).with_fetch_policy(FetchPolicy::NoCache);
        let first: Vec<_> = manager.subscribe(options).await.unwrap().collect().await;
        assert!(first[0].is_ok());
        let diff = manager
            .cache()
            .diff(&DiffOptions::new(&doc, &Default::default()));
        assert!(!diff.complete);

        let second: Vec<_> = manager
            .subscribe(SubscriptionOptions::new(doc))
            .await
            .unwrap()
            .collect()
            .await;
        assert!(matches!(second[0], Err(ClientError::Network(_))));
    }

    #[tokio::test]
    async fn test_rejects_non_subscription_documents() {
        let link = Arc::new(MockLink::new());
        let manager = manager(&link);
        let doc = Document::query("{ a }").build();
        let err = manager
            .subscribe(SubscriptionOptions::new(doc))
            .await
            .err()
            .unwrap();
        assert!(err.is_precondition());
        assert_eq!(link.call_count(), 0);
    }
}
