//! Scriptable in-memory link for tests.
//!
//! Responses are queued per operation name (falling back to the document
//! source for anonymous operations), optionally restricted to one set of
//! variables. Every `execute` call is recorded, which is what deduplication
//! tests count.
//!
//! # Example
//!
//! ```ignore
//! let link = MockLink::new();
//! link.push("GetTodos", None, MockResponse::data(json!({"todos": []})));
//! let (response, gate) = MockResponse::data(json!({"todos": [1]})).gated();
//! link.push("GetTodos", None, response);
//! // ... start a fetch, inspect in-flight state ...
//! gate.open();
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use gql_types::{stable_key, ExecutionResult, GraphQLError, Variables};

use crate::error::TransportError;
use crate::link::{Link, Operation, ResultStream};

/// Releases a gated [`MockResponse`]. Dropping the gate also releases it.
pub struct Gate(oneshot::Sender<()>);

impl Gate {
    pub fn open(self) {
        let _ = self.0.send(());
    }
}

/// One scripted answer: the items the stream yields, plus optional gating.
pub struct MockResponse {
    results: Vec<Result<ExecutionResult, TransportError>>,
    gate: Option<oneshot::Receiver<()>>,
    delay: Option<Duration>,
}

impl MockResponse {
    pub fn data(data: Value) -> Self {
        Self::result(ExecutionResult::from_data(data))
    }

    pub fn graphql_errors(data: Option<Value>, messages: &[&str]) -> Self {
        Self::result(ExecutionResult {
            data,
            errors: messages.iter().map(|m| GraphQLError::new(*m)).collect(),
            extensions: None,
        })
    }

    pub fn error(error: TransportError) -> Self {
        Self::sequence(vec![Err(error)])
    }

    pub fn result(result: ExecutionResult) -> Self {
        Self::sequence(vec![Ok(result)])
    }

    /// Several stream items, as a subscription would produce.
    pub fn sequence(results: Vec<Result<ExecutionResult, TransportError>>) -> Self {
        Self {
            results,
            gate: None,
            delay: None,
        }
    }

    /// Hold the response back until the returned [`Gate`] is opened.
    pub fn gated(mut self) -> (Self, Gate) {
        let (tx, rx) = oneshot::channel();
        self.gate = Some(rx);
        (self, Gate(tx))
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn into_stream(self) -> ResultStream {
        let MockResponse {
            results,
            gate,
            delay,
        } = self;
        stream::once(async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            stream::iter(results)
        })
        .flatten()
        .boxed()
    }
}

type ScriptKey = (String, Option<String>);

#[derive(Default)]
struct MockState {
    scripted: HashMap<ScriptKey, VecDeque<MockResponse>>,
    calls: Vec<Operation>,
}

/// In-memory [`Link`] returning scripted responses.
#[derive(Default)]
pub struct MockLink {
    state: Mutex<MockState>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn operation_key(operation: &Operation) -> String {
        operation
            .operation_name
            .clone()
            .unwrap_or_else(|| operation.document.source.clone())
    }

    /// Queue a response for `operation` (name, or source when anonymous).
    /// `variables: None` matches any variables.
    pub fn push(&self, operation: &str, variables: Option<&Variables>, response: MockResponse) {
        let key = (operation.to_string(), variables.map(stable_key));
        self.state
            .lock()
            .scripted
            .entry(key)
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn calls_for(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|op| Self::operation_key(op) == operation)
            .count()
    }

    /// Responses queued but never requested.
    pub fn pending(&self) -> usize {
        self.state.lock().scripted.values().map(VecDeque::len).sum()
    }

    fn take(&self, operation: &Operation) -> Option<MockResponse> {
        let name = Self::operation_key(operation);
        let mut state = self.state.lock();
        state.calls.push(operation.clone());

        let exact = (name.clone(), Some(stable_key(&operation.variables)));
        if let Some(found) = state.scripted.get_mut(&exact).and_then(VecDeque::pop_front) {
            return Some(found);
        }
        state
            .scripted
            .get_mut(&(name, None))
            .and_then(VecDeque::pop_front)
    }
}

impl Link for MockLink {
    fn execute(&self, operation: Operation) -> ResultStream {
        match self.take(&operation) {
            Some(response) => response.into_stream(),
            None => {
                let name = Self::operation_key(&operation);
                stream::once(async move {
                    Err(TransportError::Request(format!(
                        "no mocked response for {}",
                        name
                    )))
                })
                .boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gql_types::{variables_from, Document};
    use serde_json::json;

    fn op(name: &str, vars: Value) -> Operation {
        let doc = Document::query(format!("query {} {{ a }}", name))
            .name(name)
            .build();
        Operation::new(doc, variables_from(vars))
    }

    #[tokio::test]
    async fn test_exact_variables_before_wildcard() {
        let link = MockLink::new();
        link.push("Q", None, MockResponse::data(json!({"a": "any"})));
        link.push(
            "Q",
            Some(&variables_from(json!({"id": 1}))),
            MockResponse::data(json!({"a": "one"})),
        );

        let first = link.execute(op("Q", json!({"id": 1}))).next().await;
        assert_eq!(first.unwrap().unwrap().data, Some(json!({"a": "one"})));

        let second = link.execute(op("Q", json!({"id": 2}))).next().await;
        assert_eq!(second.unwrap().unwrap().data, Some(json!({"a": "any"})));

        assert_eq!(link.call_count(), 2);
        assert_eq!(link.calls_for("Q"), 2);
        assert_eq!(link.pending(), 0);
    }

    #[tokio::test]
    async fn test_unscripted_operation_fails() {
        let link = MockLink::new();
        let item = link.execute(op("Missing", json!({}))).next().await.unwrap();
        assert!(matches!(item, Err(TransportError::Request(_))));
    }

    #[tokio::test]
    async fn test_gate_holds_response() {
        let link = MockLink::new();
        let (response, gate) = MockResponse::data(json!({"a": 1})).gated();
        link.push("Q", None, response);

        let handle = tokio::spawn({
            let mut stream = link.execute(op("Q", json!({})));
            async move { stream.next().await }
        });
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        gate.open();
        let item = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(item.data, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_sequence_yields_every_item() {
        let link = MockLink::new();
        link.push(
            "S",
            None,
            MockResponse::sequence(vec![
                Ok(ExecutionResult::from_data(json!({"n": 1}))),
                Ok(ExecutionResult::from_data(json!({"n": 2}))),
            ]),
        );
        let items: Vec<_> = link.execute(op("S", json!({}))).collect().await;
        assert_eq!(items.len(), 2);
    }
}
