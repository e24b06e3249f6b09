//! Shared plumbing for the `gql` subcommands.

pub mod mutate;
pub mod output;
pub mod query;

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use serde_json::Value;

use gql_core::{ClientConfig, QueryManager};
use gql_transport::HttpLink;
use gql_types::{DocumentBuilder, Variables};

/// Document and variables flags shared by every operation command.
#[derive(Debug, Args)]
pub struct OperationArgs {
    /// GraphQL document text, or `@path` to read it from a file
    pub document: String,

    /// Variables as a JSON object
    #[arg(long, value_name = "JSON")]
    pub variables: Option<String>,

    /// Operation name sent to the server (inferred from the document when omitted)
    #[arg(long, value_name = "NAME")]
    pub operation_name: Option<String>,
}

impl OperationArgs {
    pub fn source(&self) -> Result<String> {
        match self.document.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(Path::new(path))
                .with_context(|| format!("Failed to read document from {}", path)),
            None => Ok(self.document.clone()),
        }
    }

    pub fn variables(&self) -> Result<Variables> {
        parse_variables(self.variables.as_deref())
    }

    /// Apply the operation name, explicit or inferred, to a document builder.
    pub fn named(&self, builder: DocumentBuilder, source: &str) -> DocumentBuilder {
        let name = self
            .operation_name
            .clone()
            .or_else(|| infer_operation_name(source));
        match name {
            Some(name) => builder.name(&name),
            None => builder,
        }
    }
}

/// Parse `--variables`; absent means no variables.
pub fn parse_variables(raw: Option<&str>) -> Result<Variables> {
    let Some(raw) = raw else {
        return Ok(Variables::new());
    };
    let value: Value = serde_json::from_str(raw).context("--variables is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!(
            "--variables must be a JSON object, got {}",
            json_kind(&other)
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Name of the first operation in `source`, e.g. `Todos` in `query Todos($page: Int) {..}`.
pub fn infer_operation_name(source: &str) -> Option<String> {
    let mut words = source.split_whitespace();
    while let Some(word) = words.next() {
        let keyword = word.trim_start_matches('{');
        if matches!(keyword, "query" | "mutation" | "subscription") {
            let name: String = words
                .next()?
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            return (!name.is_empty()).then_some(name);
        }
        if word.starts_with('{') {
            return None;
        }
    }
    None
}

/// Build a query manager over an HTTP link.
pub fn connect(endpoint: Option<&str>) -> Result<QueryManager> {
    let link = match endpoint {
        Some(url) => HttpLink::new(&gql_transport::network::resolve_endpoint(Some(url))),
        None => HttpLink::from_env(),
    };
    tracing::debug!(endpoint = link.endpoint(), "connecting");
    QueryManager::builder()
        .link(Arc::new(link))
        .config(ClientConfig::from_env())
        .build()
        .map_err(|e| anyhow!("Failed to build query manager: {}", e))
}

pub fn require_positive(value: u64, flag: &str) -> Result<u64> {
    if value == 0 {
        bail!("{} must be greater than zero", flag);
    }
    Ok(value)
}
