//! Shared types for the gql-orchestrator workspace.
//!
//! - [`document`]: identity-carrying GraphQL documents
//! - [`variables`]: operation variables and their stable serialization
//! - [`result`]: execution results and GraphQL errors

pub mod document;
pub mod result;
pub mod variables;

pub use document::{
    Document, DocumentBuilder, DocumentId, DocumentNode, OperationKind, WeakDocument,
};
pub use result::{ExecutionResult, GraphQLError};
pub use variables::{merge_variables, stable_key, variables_from, Variables};
