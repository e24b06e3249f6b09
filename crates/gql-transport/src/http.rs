//! GraphQL-over-HTTP link.
//!
//! Posts `{query, variables, operationName}` as JSON and decodes the response
//! into an [`ExecutionResult`]. The HTTP client is blocking, so each request
//! runs on tokio's blocking pool and surfaces as a single-item stream.
//!
//! ```ignore
//! let link = HttpLink::from_env().with_header("Authorization", "Bearer ...");
//! let mut results = link.execute(Operation::new(doc, variables));
//! let first = results.next().await;
//! ```

use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tracing::trace;

use gql_types::ExecutionResult;

use crate::error::TransportError;
use crate::link::{Link, Operation, ResultStream};
use crate::network::{default_timeouts, resolve_endpoint};

#[derive(Clone)]
pub struct HttpLink {
    endpoint: String,
    agent: ureq::Agent,
    headers: Vec<(String, String)>,
}

impl HttpLink {
    fn build_agent(timeout: Duration, connect_timeout: Duration) -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout(timeout)
            .timeout_connect(connect_timeout)
            .build()
    }

    /// Create a link with a custom endpoint and env-configured timeouts.
    pub fn new(endpoint: &str) -> Self {
        let (timeout, connect_timeout) = default_timeouts();
        Self::with_timeouts(endpoint, timeout, connect_timeout)
    }

    /// Create a link for the endpoint named by `GQL_ENDPOINT` (or the default).
    pub fn from_env() -> Self {
        Self::new(&resolve_endpoint(None))
    }

    pub fn with_timeouts(endpoint: &str, timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            agent: Self::build_agent(timeout, connect_timeout),
            headers: Vec::new(),
        }
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post(&self, body: &Value) -> Result<ExecutionResult, TransportError> {
        let mut request = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json");
        for (name, value) in &self.headers {
            request = request.set(name, value);
        }

        let response = match request.send_json(body) {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(TransportError::http(status, body));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(TransportError::Request(err.to_string()));
            }
        };

        let value: Value = response
            .into_json()
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        decode_response(value)
    }
}

/// Turn a raw response body into a result; a body with neither `data` nor
/// `errors` is not a GraphQL response.
pub(crate) fn decode_response(value: Value) -> Result<ExecutionResult, TransportError> {
    if value.get("data").is_none() && value.get("errors").is_none() {
        return Err(TransportError::Decode(
            "response has neither data nor errors".to_string(),
        ));
    }
    ExecutionResult::from_response(value).map_err(|e| TransportError::Decode(e.to_string()))
}

impl Link for HttpLink {
    fn execute(&self, operation: Operation) -> ResultStream {
        let link = self.clone();
        futures::stream::once(async move {
            trace!(
                endpoint = %link.endpoint,
                operation = operation.operation_name.as_deref().unwrap_or("<anonymous>"),
                "posting operation"
            );
            let body = operation.to_request_body();
            match tokio::task::spawn_blocking(move || link.post(&body)).await {
                Ok(result) => result,
                Err(join_err) => Err(TransportError::Aborted(join_err.to_string())),
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_link_creation() {
        let link = HttpLink::new("https://custom.endpoint/graphql").with_header("X-Test", "1");
        assert_eq!(link.endpoint(), "https://custom.endpoint/graphql");
        assert_eq!(link.headers.len(), 1);
    }

    #[test]
    fn test_decode_response() {
        let ok = decode_response(json!({"data": {"a": 1}})).unwrap();
        assert_eq!(ok.data, Some(json!({"a": 1})));

        let errs = decode_response(json!({"errors": [{"message": "boom"}]})).unwrap();
        assert_eq!(errs.errors[0].message, "boom");
        assert!(errs.data.is_none());

        assert!(matches!(
            decode_response(json!({"hello": "world"})),
            Err(TransportError::Decode(_))
        ));
    }

    /// Run with: cargo test -p gql-transport test_unreachable_endpoint -- --ignored
    #[tokio::test]
    #[ignore = "opens a TCP connection to a closed local port"]
    async fn test_unreachable_endpoint() {
        use gql_types::Document;

        let link = HttpLink::with_timeouts(
            "http://127.0.0.1:9/graphql",
            Duration::from_secs(2),
            Duration::from_secs(1),
        );
        let doc = Document::query("{ ping }").build();
        let mut stream = link.execute(Operation::new(doc, Default::default()));
        let item = stream.next().await.expect("one item");
        assert!(matches!(item, Err(TransportError::Request(_))));
    }
}
