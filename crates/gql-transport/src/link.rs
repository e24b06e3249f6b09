//! The transport contract consumed by the client core.

use futures::stream::BoxStream;
use serde_json::{Map, Value};

use gql_types::{Document, ExecutionResult, Variables};

use crate::error::TransportError;

/// Per-operation context handed down the link chain.
pub type Context = Map<String, Value>;

/// Stream of results for one operation. Queries and mutations are expected
/// to yield exactly one item; subscriptions yield until the server completes.
pub type ResultStream = BoxStream<'static, Result<ExecutionResult, TransportError>>;

/// An operation as it is sent over the wire.
#[derive(Debug, Clone)]
pub struct Operation {
    pub document: Document,
    pub variables: Variables,
    pub operation_name: Option<String>,
    pub context: Context,
}

impl Operation {
    pub fn new(document: Document, variables: Variables) -> Self {
        let operation_name = document.operation_name().map(String::from);
        Self {
            document,
            variables,
            operation_name,
            context: Context::new(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Request body per the GraphQL-over-HTTP convention.
    pub fn to_request_body(&self) -> Value {
        serde_json::json!({
            "query": self.document.source,
            "variables": Value::Object(self.variables.clone()),
            "operationName": self.operation_name,
        })
    }
}

/// A network transport able to execute operations.
///
/// Implementations start work when the returned stream is first polled or
/// earlier; dropping the stream abandons the operation.
pub trait Link: Send + Sync {
    fn execute(&self, operation: Operation) -> ResultStream;
}
