//! Local (client-side) resolution contract.
//!
//! Documents may mix server fields with `@client` fields resolved in-process.
//! The core asks the resolver to split documents, derive `@export`ed
//! variables, and post-process results. [`NoLocalState`] is the pass-through
//! used when no local resolvers are configured.

use async_trait::async_trait;

use gql_transport::Context;
use gql_types::{Document, ExecutionResult, Variables};

use crate::error::ClientError;

/// Input to [`LocalResolver::run_resolvers`].
#[derive(Debug, Clone)]
pub struct ResolverRequest {
    pub document: Document,
    pub remote_result: ExecutionResult,
    pub context: Context,
    pub variables: Variables,
    /// Run only resolvers marked `@client(always: true)`.
    pub only_forced: bool,
}

#[async_trait]
pub trait LocalResolver: Send + Sync {
    /// Fill in variables exported by `@export` fields.
    async fn add_exported_variables(
        &self,
        document: &Document,
        variables: Variables,
        context: &Context,
    ) -> Result<Variables, ClientError>;

    async fn run_resolvers(&self, request: ResolverRequest) -> Result<ExecutionResult, ClientError>;

    /// Whether the document has resolvers that run even on a cache hit.
    fn should_force_resolvers(&self, document: &Document) -> bool;

    /// The `@client` part of the document, if any.
    fn client_query(&self, document: &Document) -> Option<Document>;

    /// The document with `@client` fields removed, or `None` if nothing is left for the server.
    fn server_query(&self, document: &Document) -> Option<Document>;

    fn prepare_context(&self, context: Context) -> Context {
        context
    }
}

/// Resolver used when the client has no local state configured.
///
/// Client-only documents have no server part and resolve to empty data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocalState;

#[async_trait]
impl LocalResolver for NoLocalState {
    async fn add_exported_variables(
        &self,
        _document: &Document,
        variables: Variables,
        _context: &Context,
    ) -> Result<Variables, ClientError> {
        Ok(variables)
    }

    async fn run_resolvers(&self, request: ResolverRequest) -> Result<ExecutionResult, ClientError> {
        Ok(request.remote_result)
    }

    fn should_force_resolvers(&self, _document: &Document) -> bool {
        false
    }

    fn client_query(&self, _document: &Document) -> Option<Document> {
        None
    }

    fn server_query(&self, document: &Document) -> Option<Document> {
        if document.has_server_fields {
            Some(document.clone())
        } else {
            None
        }
    }
}
