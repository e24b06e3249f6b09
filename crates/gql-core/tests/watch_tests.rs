//! Watched queries: paging with fetch_more and switching variables.

mod common;

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};

use common::{manager_with_cache, todos_query, vars, wait_until};
use gql_core::{
    Cache, DiffOptions, FetchMoreOptions, FetchMoreResult, NetworkStatus, QueryHandle, QueryOptions,
};
use gql_transport::{MockLink, MockResponse};

fn append_page(previous: Option<&Value>, more: &FetchMoreResult) -> Option<Value> {
    let mut todos = previous
        .and_then(|p| p["todos"].as_array().cloned())
        .unwrap_or_default();
    todos.extend(more.data.as_ref()?["todos"].as_array()?.iter().cloned());
    Some(json!({ "todos": todos }))
}

#[tokio::test]
async fn test_fetch_more_merges_into_watched_result() {
    let link = Arc::new(MockLink::new());
    let page_one = vars(json!({"page": 1}));
    let page_two = vars(json!({"page": 2}));
    link.push("Todos", Some(&page_one), MockResponse::data(json!({"todos": [1]})));
    let (more, gate) = MockResponse::data(json!({"todos": [2]})).gated();
    link.push("Todos", Some(&page_two), more);
    let (manager, cache) = manager_with_cache(&link);

    let options = QueryOptions::new(todos_query()).with_variables(page_one.clone());
    let (handle, mut results) = manager.watch_query(options).unwrap();
    let first = results.next().await.unwrap().unwrap();
    assert_eq!(first.data, Some(json!({"todos": [1]})));

    let pending = tokio::spawn({
        let handle = handle.clone();
        let page_two = page_two.clone();
        async move {
            handle
                .fetch_more(
                    FetchMoreOptions {
                        document: None,
                        variables: page_two,
                    },
                    append_page,
                )
                .await
        }
    });
    wait_until(|| link.call_count() == 2).await;
    let store = manager.query_store_value(&handle.id()).unwrap();
    assert_eq!(store.network_status, NetworkStatus::FetchMore);

    gate.open();
    let page = pending.await.unwrap().unwrap();
    assert_eq!(page.data, Some(json!({"todos": [2]})));

    let store = manager.query_store_value(&handle.id()).unwrap();
    assert_eq!(store.network_status, NetworkStatus::Ready);
    assert_eq!(store.variables, page_one);
    let merged = cache.diff(&DiffOptions::new(&todos_query(), &page_one));
    assert_eq!(merged.result, Some(json!({"todos": [1, 2]})));
    // Page two was never written under its own variables.
    assert!(!cache.diff(&DiffOptions::new(&todos_query(), &page_two)).complete);
    assert_eq!(manager.operation_count(), 1);
}

#[tokio::test]
async fn test_set_variables_tracks_previous_variables() {
    let link = Arc::new(MockLink::new());
    let page_one = vars(json!({"page": 1}));
    let page_two = vars(json!({"page": 2}));
    link.push("Todos", Some(&page_one), MockResponse::data(json!({"todos": [1]})));
    let (next, gate) = MockResponse::data(json!({"todos": [2]})).gated();
    link.push("Todos", Some(&page_two), next);
    let (manager, _cache) = manager_with_cache(&link);

    let options = QueryOptions::new(todos_query()).with_variables(page_one.clone());
    let (handle, mut results) = manager.watch_query(options).unwrap();
    results.next().await.unwrap().unwrap();

    let pending = tokio::spawn({
        let handle = handle.clone();
        let page_two = page_two.clone();
        async move { handle.set_variables(page_two, false).await }
    });
    wait_until(|| link.call_count() == 2).await;
    let store = manager.query_store_value(&handle.id()).unwrap();
    assert_eq!(store.network_status, NetworkStatus::SetVariables);
    assert_eq!(store.previous_variables, Some(page_one));
    assert_eq!(store.variables, page_two);

    gate.open();
    let switched = pending.await.unwrap().unwrap();
    assert_eq!(switched.data, Some(json!({"todos": [2]})));
    let store = manager.query_store_value(&handle.id()).unwrap();
    assert_eq!(store.network_status, NetworkStatus::Ready);
    assert!(store.previous_variables.is_none());
    assert_eq!(handle.variables(), page_two);
}
