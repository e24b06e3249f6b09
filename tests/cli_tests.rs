use std::net::TcpListener;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mount a POST `/graphql` mock answering `body`, optionally only for one
/// operation name and a limited number of times.
async fn respond(
    server: &MockServer,
    operation: Option<&str>,
    body: Value,
    times: Option<u64>,
) {
    let mut mock = Mock::given(method("POST")).and(path("/graphql"));
    if let Some(name) = operation {
        mock = mock.and(body_partial_json(json!({ "operationName": name })));
    }
    let mut mock = mock.respond_with(ResponseTemplate::new(200).set_body_json(body));
    if let Some(times) = times {
        mock = mock.up_to_n_times(times);
    }
    mock.mount(server).await;
}

fn endpoint(server: &MockServer) -> String {
    format!("{}/graphql", server.uri())
}

/// Bodies of every request the server has seen, in order.
async fn request_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| serde_json::from_slice(&request.body).unwrap())
        .collect()
}

fn gql() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("gql").unwrap();
    cmd.env_remove("GQL_ENDPOINT").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    gql()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("query"))
        .stdout(predicate::str::contains("mutate"));
}

#[tokio::test]
async fn test_query_prints_result() {
    let server = MockServer::start().await;
    respond(&server, None, json!({"data": {"todos": [{"id": 1}]}}), None).await;

    gql()
        .args(["--endpoint", &endpoint(&server), "query"])
        .arg("query Todos($page: Int) { todos(page: $page) { id } }")
        .args(["--variables", r#"{"page": 2}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"networkStatus\": \"ready\""))
        .stdout(predicate::str::contains("\"todos\""));

    let requests = request_bodies(&server).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["operationName"], "Todos");
    assert_eq!(requests[0]["variables"]["page"], 2);
}

#[tokio::test]
async fn test_query_graphql_errors_fail() {
    let server = MockServer::start().await;
    respond(
        &server,
        None,
        json!({"data": null, "errors": [{"message": "denied"}]}),
        None,
    )
    .await;

    gql()
        .args(["--endpoint", &endpoint(&server), "query", "query Secret { secret }"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("graphQLErrors"))
        .stdout(predicate::str::contains("denied"));
}

#[tokio::test]
async fn test_mutate_with_refetch() {
    let server = MockServer::start().await;
    respond(&server, Some("AddTodo"), json!({"data": {"addTodo": {"id": 7}}}), None).await;
    respond(&server, Some("Todos"), json!({"data": {"todos": [{"id": 7}]}}), None).await;

    gql()
        .args(["--endpoint", &endpoint(&server), "mutate"])
        .arg("mutation AddTodo($text: String!) { addTodo(text: $text) { id } }")
        .args(["--variables", r#"{"text": "ship"}"#])
        .args(["--refetch", "query Todos { todos { id } }"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"addTodo\""));

    let requests = request_bodies(&server).await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["operationName"], "AddTodo");
    assert_eq!(requests[0]["variables"]["text"], "ship");
    assert_eq!(requests[1]["operationName"], "Todos");
}

#[tokio::test]
async fn test_polling_prints_each_settled_result() {
    let server = MockServer::start().await;
    respond(&server, None, json!({"data": {"tick": 1}}), Some(1)).await;
    respond(&server, None, json!({"data": {"tick": 2}}), None).await;

    let output = gql()
        .args(["--endpoint", &endpoint(&server), "query", "query Tick { tick }"])
        .args(["--poll-ms", "50", "--polls", "2"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).unwrap();
    assert!(stdout.contains("\"tick\": 1"));
    assert!(stdout.contains("\"tick\": 2"));
    assert!(request_bodies(&server).await.len() >= 2);
}

#[test]
fn test_invalid_variables_rejected() {
    gql()
        .args(["query", "{ todos { id } }", "--variables", "[1, 2]"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be a JSON object"));
}

#[test]
fn test_unknown_fetch_policy_rejected() {
    gql()
        .args(["query", "{ todos { id } }", "--fetch-policy", "cache-maybe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown fetch policy"));
}

#[test]
fn test_polls_requires_poll_ms() {
    gql()
        .args(["query", "{ todos { id } }", "--polls", "2"])
        .assert()
        .failure();
}

#[test]
fn test_unreachable_endpoint_reports_network_error() {
    // Bind and drop to get a port nothing listens on.
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    gql()
        .args(["--endpoint", &format!("http://127.0.0.1:{}/graphql", port)])
        .args(["query", "query Todos { todos { id } }"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("networkError"));
}

#[test]
#[ignore = "requires a live GraphQL endpoint in GQL_ENDPOINT"]
fn test_live_endpoint_typename() {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("gql").unwrap();
    cmd.args(["query", "query Typename { __typename }"])
        .assert()
        .success()
        .stdout(predicate::str::contains("__typename"));
}
