//! `HttpLink` against a local mock GraphQL server.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gql_transport::{HttpLink, Link, Operation, TransportError};
use gql_types::{variables_from, Document, ExecutionResult};

fn link_for(server: &MockServer) -> HttpLink {
    HttpLink::with_timeouts(
        &format!("{}/graphql", server.uri()),
        Duration::from_secs(5),
        Duration::from_secs(2),
    )
}

fn todos_operation() -> Operation {
    let doc = Document::query("query Todos($page: Int) { todos(page: $page) { id } }")
        .name("Todos")
        .build();
    Operation::new(doc, variables_from(json!({"page": 2})))
}

async fn execute_once(
    link: &HttpLink,
    operation: Operation,
) -> Result<ExecutionResult, TransportError> {
    let mut results = link.execute(operation);
    let item = results.next().await.expect("one item");
    assert!(results.next().await.is_none());
    item
}

#[tokio::test]
async fn test_posts_request_body_and_headers() {
    let server = MockServer::start().await;
    let expected_body = json!({
        "query": "query Todos($page: Int) { todos(page: $page) { id } }",
        "operationName": "Todos",
        "variables": {"page": 2},
    });
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer secret"))
        .and(header("content-type", "application/json"))
        .and(body_json(&expected_body))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"todos": [{"id": 1}]}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let link = link_for(&server).with_header("Authorization", "Bearer secret");
    let result = execute_once(&link, todos_operation()).await.unwrap();
    assert_eq!(result.data, Some(json!({"todos": [{"id": 1}]})));
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn test_graphql_errors_are_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"todos": null},
            "errors": [{"message": "not allowed", "path": ["todos"]}],
        })))
        .mount(&server)
        .await;

    let result = execute_once(&link_for(&server), todos_operation())
        .await
        .unwrap();
    assert_eq!(result.data, Some(json!({"todos": null})));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].message, "not allowed");
}

#[tokio::test]
async fn test_non_success_status_maps_to_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = execute_once(&link_for(&server), todos_operation())
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::http(502, "bad gateway"));
}

#[tokio::test]
async fn test_non_graphql_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hello": "world"})))
        .mount(&server)
        .await;
    let err = execute_once(&link_for(&server), todos_operation())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Decode(_)));

    server.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;
    let err = execute_once(&link_for(&server), todos_operation())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Decode(_)));

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["operationName"], "Todos");
}
