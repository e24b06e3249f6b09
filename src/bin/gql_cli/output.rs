//! JSON output for the `gql` CLI.

use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use gql_core::ClientError;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Machine-readable form of an operation error.
pub fn error_json(error: &ClientError) -> serde_json::Value {
    let mut out = json!({ "error": error.to_string() });
    if !error.graphql_errors().is_empty() {
        out["graphQLErrors"] = json!(error.graphql_errors());
    }
    if let Some(network) = error.network_error() {
        out["networkError"] = json!(network.to_string());
    }
    out
}

/// Print `error` as JSON and hand it back for the exit status.
pub fn print_error(error: &ClientError) -> anyhow::Error {
    println!("{}", error_json(error));
    anyhow::anyhow!("{}", error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gql_transport::TransportError;
    use gql_types::GraphQLError;

    #[test]
    fn test_error_json_shapes() {
        let graphql = error_json(&ClientError::GraphQL(vec![GraphQLError::new("denied")]));
        assert_eq!(graphql["graphQLErrors"][0]["message"], "denied");
        assert!(graphql.get("networkError").is_none());

        let network = error_json(&ClientError::Network(TransportError::http(503, "down")));
        assert!(network["networkError"].as_str().unwrap().contains("503"));
        assert!(network.get("graphQLErrors").is_none());
    }
}
